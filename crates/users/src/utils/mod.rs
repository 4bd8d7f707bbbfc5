//! Internal utilities shared by the services.

pub mod validation;

pub use validation::*;
