// SPDX-FileCopyrightText: 2025 opsweep contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use ini::{Ini, Properties};
use log::{debug, info, warn};
use opsweep_common::settings::{parse_bool, parse_class_list, Settings};
use opsweep_common::ADDRESS_BITS;

const CONFIG_DIR: &str = "opsweep";
const CONFIG_FILE: &str = "opsweep.ini";

/// Locate opsweep.ini under the user's config directory.
pub fn find_config_path() -> Option<PathBuf> {
    // $XDG_CONFIG_HOME/opsweep/opsweep.ini
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(&xdg).join(CONFIG_DIR).join(CONFIG_FILE);
        if path.exists() {
            return Some(path);
        }
    }

    // ~/.config/opsweep/opsweep.ini
    if let Ok(home) = std::env::var("HOME") {
        let path = PathBuf::from(&home)
            .join(".config")
            .join(CONFIG_DIR)
            .join(CONFIG_FILE);
        if path.exists() {
            return Some(path);
        }
    }

    None
}

/// Load settings from an INI file, falling back to defaults.
pub fn load_config(path: Option<&PathBuf>) -> Settings {
    let mut settings = Settings::default();

    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                warn!("Config file not found: {}", p.display());
                return settings;
            }
            p.clone()
        }
        None => match find_config_path() {
            Some(p) => p,
            None => {
                debug!("No opsweep config found, using defaults");
                return settings;
            }
        },
    };

    info!("Loading config from: {}", config_path.display());

    let conf = match Ini::load_from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to parse config: {}", e);
            return settings;
        }
    };

    apply_config(&conf, &mut settings);
    settings
}

/// Parse `key` from `section`, keeping `current` when absent or invalid.
fn parse_key<T>(section: &Properties, name: &str, key: &str, current: T) -> T
where
    T: FromStr + Display,
{
    let Some(raw) = section.get(key) else {
        return current;
    };
    match raw.trim().parse() {
        Ok(v) => v,
        Err(_) => {
            warn!("[{}] {}: invalid value {:?}, using {}", name, key, raw, current);
            current
        }
    }
}

/// Overlay the recognised sections of `conf` onto `settings`.
pub fn apply_config(conf: &Ini, settings: &mut Settings) {
    // [Sweep]
    if let Some(section) = conf.section(Some("Sweep")) {
        let workers = parse_key(section, "Sweep", "workers", settings.workers.unwrap_or(0));
        settings.workers = (workers > 0).then_some(workers);
        settings.progress_interval =
            parse_key(section, "Sweep", "progress_interval", settings.progress_interval);
        settings.window_bits = parse_key(section, "Sweep", "window_bits", settings.window_bits);

        let bits = parse_key(section, "Sweep", "address_bits", settings.address_bits);
        if bits <= ADDRESS_BITS {
            settings.address_bits = bits;
        } else {
            warn!("[Sweep] address_bits: {} exceeds {}, ignored", bits, ADDRESS_BITS);
        }
        debug!(
            "Sweep: workers={:?} progress_interval={} window_bits={} address_bits={}",
            settings.workers, settings.progress_interval, settings.window_bits, settings.address_bits
        );
    }

    // [Table]
    if let Some(section) = conf.section(Some("Table")) {
        settings.chunk_entries = parse_key(section, "Table", "chunk_entries", settings.chunk_entries);
    }

    // [Extract]
    if let Some(section) = conf.section(Some("Extract")) {
        if let Some(classes) = section.get("classes") {
            settings.classes = parse_class_list(classes);
            debug!("Extract classes: {:?}", settings.classes);
        }
        if let Some(base_only) = section.get("base_only") {
            match parse_bool(base_only) {
                Some(v) => settings.base_only = v,
                None => warn!("[Extract] base_only: invalid value {:?}", base_only),
            }
        }
    }
}
