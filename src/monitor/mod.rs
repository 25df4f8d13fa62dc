//! Experiment monitoring: the state file external tools and `chv status` read.

pub mod experiment;
