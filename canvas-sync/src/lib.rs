pub mod config;
pub mod course;
pub mod logging;
pub mod sync;
