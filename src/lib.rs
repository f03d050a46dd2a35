pub mod command;
pub mod config;
pub mod encoding;
pub mod errors;
pub mod logging;
pub mod process;
pub mod report;
pub mod session;
pub mod settings;
pub mod ui;
pub mod workflow;
