//! Automated remediation: danger-threshold detection and rollback.

pub mod auto_heal;
pub mod rollback;
