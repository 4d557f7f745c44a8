//! Subcommand implementations

pub mod outbox;
pub mod route;
pub mod settings;
pub mod simulate;
pub mod tail;
