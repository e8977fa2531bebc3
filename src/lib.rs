pub mod checks;
pub mod client;
pub mod config;
pub mod data_source;
pub mod engine;
pub mod errors;
pub mod metrics;
pub mod percentiles;
pub mod report;
pub mod request;
pub mod summary;
pub mod thresholds;
pub mod utils;
pub mod worker;
pub mod yaml_config;
