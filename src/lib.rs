pub mod clients;
pub mod commands;
pub mod config;
pub mod mirror;
pub mod store;
pub mod version;

mod app;

// Re-export App and Config from modules
pub use app::App;
pub use config::Config;

// Disable colors for all tests to get clean output
#[cfg(test)]
#[ctor::ctor]
fn init_tests() {
    colored::control::set_override(false);
}
