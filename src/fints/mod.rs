//! Minimal FinTS 3.0 PIN/TAN client: just enough to list SEPA accounts and
//! download MT940 statements.

pub mod client;
pub mod dialog;
pub mod error;
pub mod message;
pub mod segment;
pub mod transport;

pub use client::{normalize_iban, BankClient, PinTanClient, SepaAccount, DEFAULT_PRODUCT_ID};
pub use dialog::DialogConfig;
pub use error::{FintsError, FintsResult};
pub use message::{ReturnCode, ONE_STEP_TAN};
pub use transport::{HttpsTransport, Transport};
