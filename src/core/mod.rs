//! Core types: errors, configuration, scenario model, clock.

pub mod clock;
pub mod config;
pub mod errors;
pub mod scenario;
