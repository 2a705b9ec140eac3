pub mod accumulator;
pub mod appliance;
pub mod association;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod logs;
pub mod mqtt;
pub mod phase;
pub mod platform;
pub mod report;
pub mod service;
pub mod settings;
pub mod telemetry;
pub mod topology;

pub use config::Config;
pub use engine::{Engine, WindowReport};
pub use error::{AppError, Result};
pub use topology::SystemTopology;
