//! Controller configuration: schema, loading and hot reload

mod loader;
mod types;
pub mod watcher;

pub use loader::{
    compile_patterns, parse_clock, parse_time_zone, read_config, read_config_from_str, validate,
};
pub use types::*;
pub use watcher::{ChangeFilter, ConfigWatcher};
