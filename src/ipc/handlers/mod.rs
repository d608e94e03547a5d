pub mod core;
pub mod corrections;
pub mod grading;
pub mod stats;
