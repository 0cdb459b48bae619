// pushfin - Core Library
// Fetches bank transactions over FinTS and pushes one notification per booking

pub mod config;
pub mod fetcher;
pub mod fints;     // FinTS 3.0 PIN/TAN client
pub mod format;
pub mod logging;
pub mod mt940;     // MT940 statement parser
pub mod notify;    // Pushover, Telegram
pub mod pipeline;
pub mod store;     // Dedup of already-notified transactions
pub mod transaction;

// Re-export commonly used types
pub use config::{Config, FintsConfig, PushoverConfig, StatementConfig, TelegramConfig};
pub use fetcher::{fetch_statements, get_transactions, select_account, Credentials};
pub use fints::{BankClient, FintsError, PinTanClient, SepaAccount};
pub use format::MessageFormatter;
pub use mt940::{parse_statements, parse_transactions};
pub use notify::{encode_form, ConsoleNotifier, Notifier, PushoverNotifier, TelegramNotifier};
pub use pipeline::{Pipeline, RunSummary};
pub use store::SeenStore;
pub use transaction::{Amount, Balance, Statement, Transaction, TransactionStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
