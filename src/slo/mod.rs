//! SLO measurement: providers, measurement values and the validator.

pub mod measurement;
pub mod provider;
pub mod validator;
