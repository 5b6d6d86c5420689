pub mod app;
pub mod estimate;
pub mod export;
pub mod metrics;
pub mod settings;
pub mod upload;
