//! # elabapi
//!
//! Blocking client for the eLabFTW v2 REST API.
//!
//! The [`Client`] implements [`reconcile::RemoteApi`], so the reconciliation
//! engine can list, create, update and delete items, item categories,
//! experiments and experiment templates on a live instance.
//!
//! ## Example
//!
//! ```no_run
//! use elabapi::{Client, ClientConfig};
//! use reconcile::{EntityKind, RemoteApi};
//!
//! let config = ClientConfig::new("https://elab.example.org", "3-abcdef");
//! let client = Client::new(&config).expect("invalid configuration");
//!
//! for record in client.list(EntityKind::ItemCategory).expect("list failed") {
//!     println!("{}: {}", record.id, record.title);
//! }
//! ```
//!
//! ## Retry Logic
//!
//! Reads, updates and deletes that fail with a network error, a 429 or a 5xx
//! status are retried with exponential backoff. Creates are sent once.
//! Configure retry behavior with [`RetryConfig`].

pub mod client;
pub mod error;
pub mod retry;
pub mod types;

pub use client::Client;
pub use error::{Error, ErrorCategory, Result};
pub use retry::{LogCallback, NoCallback, RetryCallback, with_retry};
pub use types::{ClientConfig, RetryConfig};
