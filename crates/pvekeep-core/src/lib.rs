pub mod config;
pub mod types;

pub use config::{KeeperConfig, parse_duration, parse_utc_offset};
pub use types::*;
