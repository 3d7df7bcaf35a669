//! One module per subcommand, each adding a `cmd_*` method to [`crate::App`].

pub mod add;
pub mod diff;
pub mod remove;
pub mod setup;
pub mod status;
