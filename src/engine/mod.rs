//! Plan display and interactive execution
//!
//! The reconciliation itself lives in the `reconcile` crate; this module
//! renders plans, asks for confirmation and reports results.

pub mod differ;
pub mod executor;

pub use executor::{ExecuteOptions, PromptConfirm, execute};
