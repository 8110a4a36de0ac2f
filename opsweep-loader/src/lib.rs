// SPDX-FileCopyrightText: 2025 opsweep contributors
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod codec;
pub mod record;
pub mod xml;

pub use record::Record;
