/// Command enum, argument parsing and per-command handlers
pub mod commands;
/// Update routing into the command handlers
pub mod handlers;
