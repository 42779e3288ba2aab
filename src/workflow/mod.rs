pub mod error;
pub mod state_machine;
pub mod validate;
