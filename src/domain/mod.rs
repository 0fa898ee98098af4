pub mod models;
pub mod navigation;
pub mod settings;
