// 💶 Statement Types - what the bank hands back after MT940 parsing

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

// ============================================================================
// AMOUNT
// ============================================================================

/// Signed amount in minor currency units (cents)
///
/// Serialized as a decimal string ("-12.34") so the dictionary payload stays
/// readable in templates and CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Amount(pub i64);

impl Amount {
    pub fn cents(&self) -> i64 {
        self.0
    }

    /// Parse an MT940 style amount: "1234,5" or "1234,56" (always unsigned)
    pub fn parse_swift(s: &str) -> Option<Self> {
        let (int_part, frac_part) = s.split_once(',').unwrap_or((s, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if !int_part.chars().all(|c| c.is_ascii_digit())
            || !frac_part.chars().all(|c| c.is_ascii_digit())
        {
            return None;
        }

        let units: i64 = if int_part.is_empty() { 0 } else { int_part.parse().ok()? };
        let mut frac = frac_part.to_string();
        frac.truncate(2);
        while frac.len() < 2 {
            frac.push('0');
        }
        let cents: i64 = frac.parse().ok()?;

        units.checked_mul(100)?.checked_add(cents).map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl From<Amount> for String {
    fn from(a: Amount) -> String {
        a.to_string()
    }
}

impl TryFrom<String> for Amount {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.as_str()),
        };
        let parsed = Amount::parse_swift(&digits.replace('.', ","))
            .ok_or_else(|| format!("invalid amount: {}", s))?;
        Ok(if negative { Amount(-parsed.0) } else { parsed })
    }
}

// ============================================================================
// TRANSACTION
// ============================================================================

/// Debit/credit mark of a statement line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    #[serde(rename = "C")]
    Credit,
    #[serde(rename = "D")]
    Debit,
    /// Reversal of a credit (money leaves the account)
    #[serde(rename = "RC")]
    ReversalCredit,
    /// Reversal of a debit (money comes back)
    #[serde(rename = "RD")]
    ReversalDebit,
}

impl TransactionStatus {
    pub fn from_mark(mark: &str) -> Option<Self> {
        match mark {
            "C" => Some(TransactionStatus::Credit),
            "D" => Some(TransactionStatus::Debit),
            "RC" => Some(TransactionStatus::ReversalCredit),
            "RD" => Some(TransactionStatus::ReversalDebit),
            _ => None,
        }
    }

    /// Whether the booked amount reduces the balance
    pub fn is_outgoing(&self) -> bool {
        matches!(self, TransactionStatus::Debit | TransactionStatus::ReversalCredit)
    }
}

/// One booked statement line (:61:) with its details (:86:)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub date: NaiveDate,
    pub entry_date: Option<NaiveDate>,
    pub status: TransactionStatus,
    pub funds_code: Option<String>,
    pub amount: Amount,
    pub currency: String,
    /// SWIFT transaction type, e.g. "NMSC"
    pub id: String,
    pub customer_reference: String,
    pub bank_reference: Option<String>,
    pub extra_details: Option<String>,

    // Structured :86: details (German banks)
    pub transaction_code: Option<String>,
    pub posting_text: Option<String>,
    pub prima_nota: Option<String>,
    pub purpose: Option<String>,
    pub applicant_bin: Option<String>,
    pub applicant_iban: Option<String>,
    pub applicant_name: Option<String>,
    pub return_debit_notes: Option<String>,

    // SEPA keys found inside the purpose
    pub end_to_end_reference: Option<String>,
    pub mandate_reference: Option<String>,
    pub creditor_id: Option<String>,
}

impl Transaction {
    pub fn new(date: NaiveDate, status: TransactionStatus, amount: Amount, currency: &str) -> Self {
        Transaction {
            date,
            entry_date: None,
            status,
            funds_code: None,
            amount,
            currency: currency.to_string(),
            id: String::new(),
            customer_reference: String::new(),
            bank_reference: None,
            extra_details: None,
            transaction_code: None,
            posting_text: None,
            prima_nota: None,
            purpose: None,
            applicant_bin: None,
            applicant_iban: None,
            applicant_name: None,
            return_debit_notes: None,
            end_to_end_reference: None,
            mandate_reference: None,
            creditor_id: None,
        }
    }

    /// Builder pattern: add applicant
    pub fn with_applicant(mut self, name: &str, iban: Option<&str>) -> Self {
        self.applicant_name = Some(name.to_string());
        self.applicant_iban = iban.map(str::to_string);
        self
    }

    /// Builder pattern: add purpose
    pub fn with_purpose(mut self, purpose: &str) -> Self {
        self.purpose = Some(purpose.to_string());
        self
    }

    /// Dictionary view of every field, keyed by field name
    pub fn data(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }

    /// Hash for notification dedup; stable across runs for the same booking
    pub fn idempotency_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.date,
            self.amount,
            self.currency,
            self.applicant_iban.as_deref().unwrap_or(""),
            self.applicant_name.as_deref().unwrap_or(""),
            self.purpose.as_deref().unwrap_or(""),
            self.customer_reference,
        ));
        format!("{:x}", hasher.finalize())
    }

    /// Dedup key for the `occurrence`-th identical booking within one fetch.
    /// Occurrence 0 is `idempotency_hash()` itself.
    pub fn occurrence_hash(&self, occurrence: u32) -> String {
        let base = self.idempotency_hash();
        if occurrence == 0 {
            return base;
        }
        let mut hasher = Sha256::new();
        hasher.update(format!("{}#{}", base, occurrence));
        format!("{:x}", hasher.finalize())
    }
}

// ============================================================================
// STATEMENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub status: TransactionStatus,
    pub date: NaiveDate,
    pub currency: String,
    /// Signed: debit balances are negative
    pub amount: Amount,
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.amount, self.currency, self.date)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub transaction_reference: Option<String>,
    pub account_identification: Option<String>,
    pub statement_number: Option<String>,
    pub opening_balance: Option<Balance>,
    pub closing_balance: Option<Balance>,
    pub available_balance: Option<Balance>,
    pub transactions: Vec<Transaction>,
}
