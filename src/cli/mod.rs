pub mod args;
pub mod cert;
pub mod commands;

// Re-export commonly used items
pub use args::{Cli, Commands, RunArgs};
pub use commands::execute_command;
