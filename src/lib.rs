//! POS Partner API Library
//!
//! Re-exports modules for integration testing and the service binaries.

pub mod api;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod db;
pub mod domain;
pub mod error;
pub mod export;
pub mod jobs;
pub mod query;
pub mod rate_limit;
pub mod store;
pub mod webhook;

pub use config::Config;
pub use domain::{DomainError, Money, PartnerIdentity, TxnStatus};
pub use error::{AppError, AppResult};
