pub mod platform;
pub mod scan;
pub mod thresholds;
