//! Remote-mutating operations on todo lists and the key ring they encrypt with.

pub mod error;
pub mod keyring;
pub mod service;
pub mod submit;

#[cfg(test)]
mod testing;

pub use error::{ApiRetryClass, Result, ServiceError};
pub use keyring::KeyRing;
pub use service::TodoService;
pub use submit::{DataSubmission, GroupChange, LedgerSubmitter, SubmitReceipt};
