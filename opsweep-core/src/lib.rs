// SPDX-FileCopyrightText: 2025 opsweep contributors
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod catalog;
pub mod codegen;
pub mod density;
pub mod diagram;
pub mod engine;
pub mod table;

pub use catalog::PredicateCatalog;
pub use engine::ClassificationEngine;
pub use table::ClassificationTable;
