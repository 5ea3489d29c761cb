// src/core/mod.rs

pub mod cache;
pub mod checker;
pub mod ini;
pub mod macros;
pub mod parser;
pub mod project;
pub mod script;
pub mod section;
pub mod ui;
pub mod update;
pub mod variables;
