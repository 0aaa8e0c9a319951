pub mod camera;
pub mod config;
pub mod console;
pub mod control;
pub mod http;
pub mod prompt_loader;
pub mod speaker;
