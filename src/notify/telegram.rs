use anyhow::{anyhow, Result};
use tracing::{debug, warn};

use super::{encode_form, http_client, Notifier};

pub const TELEGRAM_API: &str = "https://api.telegram.org";

/// Telegram Bot API `sendMessage`
pub struct TelegramNotifier {
    token: String,
    chat_id: String,
    base_url: String,
    client: reqwest::blocking::Client,
}

impl TelegramNotifier {
    pub fn new(token: &str, chat_id: &str) -> Result<Self> {
        Self::with_base_url(token, chat_id, TELEGRAM_API)
    }

    pub fn with_base_url(token: &str, chat_id: &str, base_url: &str) -> Result<Self> {
        Ok(TelegramNotifier {
            token: token.to_string(),
            chat_id: chat_id.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client()?,
        })
    }

    fn url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.base_url, self.token)
    }
}

impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    fn notify(&self, message: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url())
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(encode_form(&[("chat_id", self.chat_id.as_str()), ("text", message)]))
            .send()
            // URL carries the bot token
            .map_err(|e| anyhow!("Failed to reach Telegram API: {}", e.without_url()))?;

        let status = response.status();
        let body = response.text().unwrap_or_default();
        if status.is_success() {
            debug!(%status, "telegram accepted message");
        } else {
            warn!(%status, %body, "telegram rejected message");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::tests::capture_one;

    #[test]
    fn test_url_contains_bot_token() {
        let notifier = TelegramNotifier::new("123:ABC", "42").unwrap();
        assert_eq!(notifier.url(), "https://api.telegram.org/bot123:ABC/sendMessage");
    }

    #[test]
    fn test_posts_chat_id_and_text() {
        let (base, handle) = capture_one(200);
        let notifier = TelegramNotifier::with_base_url("123:ABC", "42", &base).unwrap();

        notifier.notify("-2.50 EUR KIOSK: Kaffee & Kuchen").unwrap();

        let (url, content_type, body) = handle.join().unwrap();
        assert_eq!(url, "/bot123:ABC/sendMessage");
        assert_eq!(content_type, "application/x-www-form-urlencoded");
        assert_eq!(
            body,
            "chat_id=42&text=-2.50%20EUR%20KIOSK%3A%20Kaffee%20%26%20Kuchen"
        );
    }

    #[test]
    fn test_rejected_message_is_not_an_error() {
        let (base, handle) = capture_one(403);
        let notifier = TelegramNotifier::with_base_url("123:ABC", "42", &base).unwrap();

        assert!(notifier.notify("hello").is_ok());
        handle.join().unwrap();
    }

    #[test]
    fn test_send_error_hides_token() {
        let notifier = TelegramNotifier::with_base_url("123:SECRET", "42", "http://127.0.0.1:1").unwrap();
        let err = notifier.notify("hello").unwrap_err();
        assert!(!err.to_string().contains("SECRET"));
    }
}
