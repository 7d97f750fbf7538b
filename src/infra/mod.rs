pub mod command;
pub mod notifier;
