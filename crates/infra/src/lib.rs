//! Infrastructure layer: record stores, collaborators, export services,
//! config.

pub mod clock;
pub mod config;
pub mod exports;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ExportConfig};
