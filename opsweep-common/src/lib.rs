// SPDX-FileCopyrightText: 2025 opsweep contributors
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod settings;
pub mod types;

pub use settings::Settings;
pub use types::*;
