pub mod settings;

pub use settings::{AppConfig, JobConfig, ServerConfig, UpstreamConfig};
