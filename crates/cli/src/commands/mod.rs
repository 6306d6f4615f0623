pub mod config;
pub mod utils;
pub mod watch;

pub use config::{handle_config_command, ConfigCommands};
pub use watch::{watch_resource, WatchOptions};
