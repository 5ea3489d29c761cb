pub mod constants;
pub mod core;
pub mod models;
