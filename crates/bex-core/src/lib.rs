pub mod config;
pub mod logging;

// Core modules
pub mod checksum;
pub mod control;
pub mod error;
pub mod execution;
pub mod job;
pub mod pool;
pub mod preflight;
pub mod progress;
pub mod reserve;
pub mod retry;
pub mod scan;
pub mod sink;
pub mod transfer;

mod worker;
