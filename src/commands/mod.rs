// Reconciliation against the instance
pub mod apply;
pub mod get;

// Local configuration
pub mod config;
