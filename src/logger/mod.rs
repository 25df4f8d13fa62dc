//! Structured event logging: month-partitioned JSONL with graceful degradation.

pub mod context;
pub mod jsonl;
