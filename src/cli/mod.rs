/// Command Line Interface for wgtune
/// (c) 2024 Ross Younger
mod args;
mod cli_main;
mod store;
pub(crate) mod styles;
pub use cli_main::cli;
