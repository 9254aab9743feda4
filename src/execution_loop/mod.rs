pub mod controller;
pub mod error_classifier;
pub mod state_machine;

pub use controller::*;
pub use error_classifier::*;
pub use state_machine::*;
