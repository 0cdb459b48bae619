// 📝 Message Formatting - {field} templates over the transaction payload

use serde_json::Value;

use crate::transaction::{Balance, Transaction};

pub const DEFAULT_TEMPLATE: &str = "{date} {amount} {currency} {applicant_name}: {purpose}";

/// Renders notification text from a template such as
/// `"{date} {amount} {currency} {applicant_name}: {purpose}"`.
///
/// Placeholders name keys of `Transaction::data()`. Unknown keys and null
/// values render empty; `{{` and `}}` produce literal braces.
#[derive(Debug, Clone)]
pub struct MessageFormatter {
    template: String,
}

impl Default for MessageFormatter {
    fn default() -> Self {
        MessageFormatter::new(DEFAULT_TEMPLATE)
    }
}

impl MessageFormatter {
    pub fn new(template: &str) -> Self {
        MessageFormatter {
            template: template.to_string(),
        }
    }

    pub fn format(&self, tx: &Transaction) -> String {
        let data = tx.data();
        let rendered = render(&self.template, |key| data.get(key).map(value_text));
        collapse_whitespace(&rendered)
    }

    pub fn format_balance(&self, balance: &Balance) -> String {
        format!("Balance: {}", balance)
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render<F>(template: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut key = String::new();
                let mut closed = false;
                for k in chars.by_ref() {
                    if k == '}' {
                        closed = true;
                        break;
                    }
                    key.push(k);
                }
                if closed {
                    out.push_str(&lookup(key.trim()).unwrap_or_default());
                } else {
                    out.push('{');
                    out.push_str(&key);
                }
            }
            _ => out.push(c),
        }
    }

    out
}

/// Empty fields leave double spaces behind; bank texts carry padding too
fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{Amount, TransactionStatus};
    use chrono::NaiveDate;

    fn tx() -> Transaction {
        Transaction::new(
            NaiveDate::from_ymd_opt(2024, 3, 20).unwrap(),
            TransactionStatus::Debit,
            Amount(-4599),
            "EUR",
        )
        .with_applicant("BAECKEREI SCHMIDT", None)
        .with_purpose("Brötchen   und Kaffee")
    }

    #[test]
    fn test_default_template() {
        let text = MessageFormatter::default().format(&tx());
        assert_eq!(text, "2024-03-20 -45.99 EUR BAECKEREI SCHMIDT: Brötchen und Kaffee");
    }

    #[test]
    fn test_unknown_and_null_fields_render_empty() {
        let f = MessageFormatter::new("{amount} [{nope}] [{entry_date}] [{applicant_iban}]");
        assert_eq!(f.format(&tx()), "-45.99 [] [] []");
    }

    #[test]
    fn test_escaped_braces_and_unclosed_placeholder() {
        let f = MessageFormatter::new("{{{currency}}} {amount");
        assert_eq!(f.format(&tx()), "{EUR} {amount");
    }

    #[test]
    fn test_balance() {
        let balance = Balance {
            status: TransactionStatus::Credit,
            date: NaiveDate::from_ymd_opt(2024, 3, 21).unwrap(),
            currency: "EUR".to_string(),
            amount: Amount(295401),
        };
        assert_eq!(
            MessageFormatter::default().format_balance(&balance),
            "Balance: 2954.01 EUR (2024-03-21)"
        );
    }
}
