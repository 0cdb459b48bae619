use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::{encode_form, http_client, Notifier};

pub const PUSHOVER_API: &str = "https://api.pushover.net";
const MESSAGES_PATH: &str = "/1/messages.json";

/// Pushover message API: one form-encoded POST per message
pub struct PushoverNotifier {
    token: String,
    user: String,
    base_url: String,
    client: reqwest::blocking::Client,
}

impl PushoverNotifier {
    pub fn new(token: &str, user: &str) -> Result<Self> {
        Self::with_base_url(token, user, PUSHOVER_API)
    }

    /// Point at another host, e.g. a local test server
    pub fn with_base_url(token: &str, user: &str, base_url: &str) -> Result<Self> {
        Ok(PushoverNotifier {
            token: token.to_string(),
            user: user.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client()?,
        })
    }

    /// The exact request body sent for `message`
    pub fn form_body(&self, message: &str) -> String {
        encode_form(&[
            ("token", self.token.as_str()),
            ("user", self.user.as_str()),
            ("message", message),
        ])
    }
}

impl Notifier for PushoverNotifier {
    fn name(&self) -> &str {
        "pushover"
    }

    fn notify(&self, message: &str) -> Result<()> {
        let url = format!("{}{}", self.base_url, MESSAGES_PATH);
        let response = self
            .client
            .post(&url)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(self.form_body(message))
            .send()
            .with_context(|| format!("Failed to reach {}", url))?;

        let status = response.status();
        let body = response.text().unwrap_or_default();
        if status.is_success() {
            debug!(%status, "pushover accepted message");
        } else {
            warn!(%status, %body, "pushover rejected message");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::tests::capture_one;

    #[test]
    fn test_form_body_is_token_user_message() {
        let notifier = PushoverNotifier::new("app token", "user+key").unwrap();
        assert_eq!(
            notifier.form_body("Hallo Welt"),
            "token=app%20token&user=user%2Bkey&message=Hallo%20Welt"
        );
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let notifier = PushoverNotifier::with_base_url("t", "u", "http://127.0.0.1:9/").unwrap();
        assert_eq!(notifier.base_url, "http://127.0.0.1:9");
    }

    #[test]
    fn test_posts_form_to_messages_endpoint() {
        let (base, handle) = capture_one(200);
        let notifier = PushoverNotifier::with_base_url("tok", "usr", &base).unwrap();

        notifier.notify("-45.99 EUR Bäcker & Co").unwrap();

        let (url, content_type, body) = handle.join().unwrap();
        assert_eq!(url, "/1/messages.json");
        assert_eq!(content_type, "application/x-www-form-urlencoded");
        assert_eq!(body, notifier.form_body("-45.99 EUR Bäcker & Co"));
    }

    #[test]
    fn test_rejected_message_is_not_an_error() {
        let (base, handle) = capture_one(400);
        let notifier = PushoverNotifier::with_base_url("tok", "usr", &base).unwrap();

        assert!(notifier.notify("hello").is_ok());
        handle.join().unwrap();
    }

    #[test]
    fn test_unreachable_host_is_an_error() {
        let notifier = PushoverNotifier::with_base_url("tok", "usr", "http://127.0.0.1:1").unwrap();
        assert!(notifier.notify("hello").is_err());
    }
}
