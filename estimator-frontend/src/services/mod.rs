pub mod estimator;
pub mod imaging;
pub mod markdown;
pub mod metrics;
pub mod providers;
