pub mod config;
pub mod error;
pub mod instance;
pub mod state;

pub use config::{Config, ScheduleConfig};
pub use error::*;
pub use instance::InstanceId;
pub use state::*;
