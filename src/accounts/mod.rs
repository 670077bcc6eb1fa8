//! Account lifecycle
//!
//! Open, read, update and close accounts. Balances are read-only here; the
//! only writer is [`crate::transfer::TransferOrchestrator`].

pub mod api;
pub mod directory;
pub mod error;
pub mod service;
pub mod validation;

pub use directory::{StaticUserDirectory, TrustedProxyDirectory, UserDirectory};
pub use error::AccountError;
pub use service::AccountService;
pub use validation::{AccountNumber, CurrencyCode, ValidationError};
