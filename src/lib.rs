pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod settings;
pub mod store;
pub mod tz;
pub mod wal;
