//! Push notification backends.

pub mod pushover;
pub mod telegram;

use anyhow::Result;
use std::time::Duration;

pub use pushover::PushoverNotifier;
pub use telegram::TelegramNotifier;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A destination for one message per transaction
pub trait Notifier {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Deliver `message`. Implementations return an error only when the
    /// request could not be sent at all; what the service answers is logged.
    fn notify(&self, message: &str) -> Result<()>;
}

/// `application/x-www-form-urlencoded` body for `fields`, in order
pub fn encode_form(fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Prints messages instead of sending them (`run --dry-run`)
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn name(&self) -> &str {
        "console"
    }

    fn notify(&self, message: &str) -> Result<()> {
        println!("{}", message);
        Ok(())
    }
}

pub(crate) fn http_client() -> Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()?)
}
