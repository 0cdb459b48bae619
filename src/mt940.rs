// 🧾 MT940 Parser - SWIFT customer statements as delivered by FinTS HIKAZ
// Handles German structured :86: details and SEPA purpose keys

use anyhow::{anyhow, Context, Result};
use chrono::{Datelike, NaiveDate};
use tracing::warn;

use crate::transaction::{Amount, Balance, Statement, Transaction, TransactionStatus};

/// SEPA keys that can appear inside the :86: purpose text
const SEPA_KEYS: [&str; 11] = [
    "EREF+", "KREF+", "MREF+", "CRED+", "DEBT+", "SVWZ+", "ABWA+", "ABWE+", "COAM+", "OAMT+",
    "IBAN+",
];

// ============================================================================
// ENTRY POINT
// ============================================================================

/// Parse a full MT940 document (one or more statements)
pub fn parse_statements(text: &str) -> Result<Vec<Statement>> {
    let mut statements = Vec::new();
    let mut current: Option<Statement> = None;

    for (tag, value) in split_fields(text) {
        // :20: opens a new statement
        if tag == "20" {
            if let Some(done) = current.take() {
                statements.push(done);
            }
        }
        let stmt = current.get_or_insert_with(Statement::default);

        match tag.as_str() {
            "20" => stmt.transaction_reference = Some(value.trim().to_string()),
            "25" => stmt.account_identification = Some(value.trim().to_string()),
            "28" | "28C" => stmt.statement_number = Some(value.trim().to_string()),
            "60F" | "60M" => {
                stmt.opening_balance = Some(
                    parse_balance(&value).with_context(|| format!("bad opening balance: {}", value))?,
                )
            }
            "61" => {
                let currency = stmt
                    .opening_balance
                    .as_ref()
                    .map(|b| b.currency.clone())
                    .unwrap_or_default();
                let tx = parse_statement_line(&value, &currency)
                    .with_context(|| format!("bad statement line: {}", value))?;
                stmt.transactions.push(tx);
            }
            "86" => match stmt.transactions.last_mut() {
                Some(tx) => apply_details(tx, &value),
                None => warn!("ignoring :86: without preceding :61:"),
            },
            "62F" | "62M" => {
                stmt.closing_balance = Some(
                    parse_balance(&value).with_context(|| format!("bad closing balance: {}", value))?,
                )
            }
            "64" => stmt.available_balance = parse_balance(&value).ok(),
            _ => {}
        }
    }

    if let Some(done) = current {
        statements.push(done);
    }

    Ok(statements)
}

/// Parse and flatten all transactions, in document order
pub fn parse_transactions(text: &str) -> Result<Vec<Transaction>> {
    Ok(parse_statements(text)?
        .into_iter()
        .flat_map(|s| s.transactions)
        .collect())
}

// ============================================================================
// FIELD SPLITTING
// ============================================================================

/// Split the document into (tag, value) pairs; continuation lines stay in the value
fn split_fields(text: &str) -> Vec<(String, String)> {
    // Some banks use "@@" as line separator
    let normalized = text.replace("@@", "\n");
    let mut fields: Vec<(String, String)> = Vec::new();

    for raw in normalized.lines() {
        let line = raw.trim_end_matches('\r');
        if line.trim() == "-" || line.trim().is_empty() {
            continue;
        }

        if let Some((tag, value)) = split_tag(line) {
            fields.push((tag.to_string(), value.to_string()));
        } else if let Some((_, value)) = fields.last_mut() {
            value.push('\n');
            value.push_str(line);
        }
    }

    fields
}

/// ":61:2403200320DR45,99NMSCNONREF" -> ("61", "2403200320DR45,99NMSCNONREF")
fn split_tag(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix(':')?;
    let end = rest.find(':')?;
    let tag = &rest[..end];
    if tag.is_empty() || tag.len() > 3 || !tag.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    if !tag.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    Some((tag, &rest[end + 1..]))
}

// ============================================================================
// BALANCES
// ============================================================================

/// "C240320EUR1234,56"
fn parse_balance(value: &str) -> Result<Balance> {
    let value = value.trim();
    if value.len() < 11 || !value.is_ascii() {
        return Err(anyhow!("balance too short"));
    }
    let status = TransactionStatus::from_mark(&value[..1])
        .ok_or_else(|| anyhow!("unknown balance mark {}", &value[..1]))?;
    let date = parse_yymmdd(&value[1..7])?;
    let currency = value[7..10].to_string();
    let amount = Amount::parse_swift(&value[10..])
        .ok_or_else(|| anyhow!("invalid balance amount {}", &value[10..]))?;
    let amount = if status.is_outgoing() { Amount(-amount.0) } else { amount };

    Ok(Balance {
        status,
        date,
        currency,
        amount,
    })
}

fn parse_yymmdd(s: &str) -> Result<NaiveDate> {
    let n = |r: std::ops::Range<usize>| -> Result<u32> {
        s.get(r)
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| anyhow!("invalid date {}", s))
    };
    let yy = n(0..2)? as i32;
    let year = if yy < 80 { 2000 + yy } else { 1900 + yy };
    NaiveDate::from_ymd_opt(year, n(2..4)?, n(4..6)?).ok_or_else(|| anyhow!("invalid date {}", s))
}

// ============================================================================
// STATEMENT LINE (:61:)
// ============================================================================

fn parse_statement_line(value: &str, currency: &str) -> Result<Transaction> {
    let mut lines = value.splitn(2, '\n');
    let first = lines.next().unwrap_or("").trim();
    let extra = lines
        .next()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    if !first.is_ascii() {
        return Err(anyhow!("non-ASCII statement line"));
    }
    let mut pos = 0;

    // Value date
    let date = parse_yymmdd(first.get(0..6).ok_or_else(|| anyhow!("missing value date"))?)?;
    pos += 6;

    // Optional entry date MMDD
    let mut entry_date = None;
    if let Some(mmdd) = first.get(pos..pos + 4) {
        if mmdd.chars().all(|c| c.is_ascii_digit()) {
            entry_date = Some(entry_date_near(date, &mmdd[..2], &mmdd[2..])?);
            pos += 4;
        }
    }

    // Debit/credit mark
    let mark_len = if first[pos..].starts_with("RC") || first[pos..].starts_with("RD") {
        2
    } else {
        1
    };
    let status = first
        .get(pos..pos + mark_len)
        .and_then(TransactionStatus::from_mark)
        .ok_or_else(|| anyhow!("missing debit/credit mark"))?;
    pos += mark_len;

    // Optional funds code (third letter of the currency code)
    let mut funds_code = None;
    if first[pos..].starts_with(|c: char| c.is_ascii_alphabetic()) {
        funds_code = Some(first[pos..pos + 1].to_string());
        pos += 1;
    }

    // Amount
    let amount_len = first[pos..]
        .find(|c: char| !(c.is_ascii_digit() || c == ','))
        .unwrap_or(first.len() - pos);
    let amount = Amount::parse_swift(&first[pos..pos + amount_len])
        .ok_or_else(|| anyhow!("invalid amount"))?;
    pos += amount_len;
    let amount = if status.is_outgoing() { Amount(-amount.0) } else { amount };

    // Transaction type: N/F/S + 3 characters
    let id = first
        .get(pos..pos + 4)
        .ok_or_else(|| anyhow!("missing transaction type"))?
        .to_string();
    pos += 4;

    // Customer reference, optionally followed by //bank reference
    let references = &first[pos..];
    let (customer_reference, bank_reference) = match references.split_once("//") {
        Some((c, b)) => (c.to_string(), Some(b.to_string()).filter(|b| !b.is_empty())),
        None => (references.to_string(), None),
    };

    let mut tx = Transaction::new(date, status, amount, currency);
    tx.entry_date = entry_date;
    tx.funds_code = funds_code;
    tx.id = id;
    tx.customer_reference = customer_reference;
    tx.bank_reference = bank_reference;
    tx.extra_details = extra;
    Ok(tx)
}

/// Entry dates carry no year; pick the one closest to the value date
fn entry_date_near(value_date: NaiveDate, mm: &str, dd: &str) -> Result<NaiveDate> {
    let month: u32 = mm.parse()?;
    let day: u32 = dd.parse()?;

    let mut year = value_date.year();
    if value_date.month() == 12 && month == 1 {
        year += 1;
    } else if value_date.month() == 1 && month == 12 {
        year -= 1;
    }

    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| anyhow!("invalid entry date {}{}", mm, dd))
}

// ============================================================================
// DETAILS (:86:)
// ============================================================================

fn apply_details(tx: &mut Transaction, value: &str) {
    // Continuation lines are a wrap artefact, not content
    let joined: String = value.split('\n').map(|l| l.trim_end_matches('\r')).collect();

    let structured = joined.len() > 4
        && joined
            .get(..3)
            .map_or(false, |p| p.chars().all(|c| c.is_ascii_digit()))
        && !joined[3..].starts_with(|c: char| c.is_alphanumeric() || c == ' ');

    if !structured {
        apply_purpose(tx, joined.trim());
        return;
    }

    tx.transaction_code = Some(joined[..3].to_string());
    let separator = match joined[3..].chars().next() {
        Some(c) => c,
        None => return,
    };

    let mut purpose = String::new();
    let mut name = String::new();

    for part in joined[3..].split(separator).skip(1) {
        if part.len() < 2 || !part.is_char_boundary(2) {
            continue;
        }
        let (code, content) = part.split_at(2);
        match code {
            "00" => tx.posting_text = Some(content.to_string()),
            "10" => tx.prima_nota = Some(content.to_string()),
            "20" | "21" | "22" | "23" | "24" | "25" | "26" | "27" | "28" | "29" | "60" | "61"
            | "62" | "63" => purpose.push_str(content),
            "30" => tx.applicant_bin = Some(content.to_string()),
            "31" => tx.applicant_iban = Some(content.to_string()),
            "32" | "33" => name.push_str(content),
            "34" => tx.return_debit_notes = Some(content.to_string()),
            _ => {}
        }
    }

    if !name.is_empty() {
        tx.applicant_name = Some(name);
    }
    if !purpose.is_empty() {
        apply_purpose(tx, &purpose);
    }
}

/// Split SEPA keys out of the purpose; SVWZ+ becomes the purpose if present
fn apply_purpose(tx: &mut Transaction, purpose: &str) {
    let keys = sepa_fields(purpose);
    if keys.is_empty() {
        tx.purpose = Some(purpose.to_string()).filter(|p| !p.is_empty());
        return;
    }

    for (key, content) in &keys {
        match *key {
            "EREF+" => tx.end_to_end_reference = Some(content.clone()),
            "MREF+" => tx.mandate_reference = Some(content.clone()),
            "CRED+" => tx.creditor_id = Some(content.clone()),
            _ => {}
        }
    }

    tx.purpose = keys
        .iter()
        .find(|(k, _)| *k == "SVWZ+")
        .map(|(_, v)| v.clone())
        .or_else(|| Some(purpose.to_string()));
}

fn sepa_fields(purpose: &str) -> Vec<(&'static str, String)> {
    let mut found: Vec<(usize, &'static str)> = SEPA_KEYS
        .iter()
        .filter_map(|k| purpose.find(k).map(|pos| (pos, *k)))
        .collect();
    found.sort();

    found
        .iter()
        .enumerate()
        .map(|(i, (pos, key))| {
            let start = pos + key.len();
            let end = found.get(i + 1).map(|(p, _)| *p).unwrap_or(purpose.len());
            (*key, purpose[start..end.max(start)].trim().to_string())
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = ":20:STARTUMSE\r
:25:12345678/0532013000\r
:28C:00001/001\r
:60F:C240319EUR1000,00\r
:61:2403200320DR45,99NMSCNONREF//POS 4711\r
:86:005?00KARTENZAHLUNG?109310?20SVWZ+2024-03-20T08.15 Debitk?21.1 2027-12?30COBADEFFXXX?31DE0\r
2120300000000202051?32BAECKEREI SCHMIDT\r
:61:240321C2000,NTRFNONREF\r
:86:166?00GUTSCHRIFT?20EREF+NOTPROVIDED?21SVWZ+Gehalt Maerz?32ARBEITGEBER GMBH\r
:62F:C240321EUR2954,01\r
-";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_sample_statement() {
        let statements = parse_statements(SAMPLE).unwrap();
        assert_eq!(statements.len(), 1);

        let s = &statements[0];
        assert_eq!(s.transaction_reference.as_deref(), Some("STARTUMSE"));
        assert_eq!(s.account_identification.as_deref(), Some("12345678/0532013000"));
        assert_eq!(s.statement_number.as_deref(), Some("00001/001"));
        assert_eq!(s.opening_balance.as_ref().unwrap().amount, Amount(100000));
        assert_eq!(s.closing_balance.as_ref().unwrap().amount, Amount(295401));
        assert_eq!(s.transactions.len(), 2);
    }

    #[test]
    fn test_debit_line() {
        let txs = parse_transactions(SAMPLE).unwrap();
        let tx = &txs[0];

        assert_eq!(tx.date, date(2024, 3, 20));
        assert_eq!(tx.entry_date, Some(date(2024, 3, 20)));
        assert_eq!(tx.status, TransactionStatus::Debit);
        assert_eq!(tx.funds_code.as_deref(), Some("R"));
        assert_eq!(tx.amount, Amount(-4599));
        assert_eq!(tx.currency, "EUR");
        assert_eq!(tx.id, "NMSC");
        assert_eq!(tx.customer_reference, "NONREF");
        assert_eq!(tx.bank_reference.as_deref(), Some("POS 4711"));
    }

    #[test]
    fn test_structured_details() {
        let txs = parse_transactions(SAMPLE).unwrap();
        let tx = &txs[0];

        assert_eq!(tx.transaction_code.as_deref(), Some("005"));
        assert_eq!(tx.posting_text.as_deref(), Some("KARTENZAHLUNG"));
        assert_eq!(tx.prima_nota.as_deref(), Some("9310"));
        assert_eq!(tx.applicant_bin.as_deref(), Some("COBADEFFXXX"));
        // IBAN was wrapped across two lines
        assert_eq!(tx.applicant_iban.as_deref(), Some("DE02120300000000202051"));
        assert_eq!(tx.applicant_name.as_deref(), Some("BAECKEREI SCHMIDT"));
        assert_eq!(tx.purpose.as_deref(), Some("2024-03-20T08.15 Debitk.1 2027-12"));
    }

    #[test]
    fn test_credit_line_with_sepa_keys() {
        let txs = parse_transactions(SAMPLE).unwrap();
        let tx = &txs[1];

        assert_eq!(tx.status, TransactionStatus::Credit);
        assert_eq!(tx.entry_date, None);
        assert_eq!(tx.funds_code, None);
        assert_eq!(tx.amount, Amount(200000));
        assert_eq!(tx.id, "NTRF");
        assert_eq!(tx.end_to_end_reference.as_deref(), Some("NOTPROVIDED"));
        assert_eq!(tx.purpose.as_deref(), Some("Gehalt Maerz"));
        assert_eq!(tx.applicant_name.as_deref(), Some("ARBEITGEBER GMBH"));
    }

    #[test]
    fn test_entry_date_crosses_year_boundary() {
        let tx = parse_statement_line("2312310102CR10,00NTRFNONREF", "EUR").unwrap();
        assert_eq!(tx.date, date(2023, 12, 31));
        assert_eq!(tx.entry_date, Some(date(2024, 1, 2)));

        let tx = parse_statement_line("2401021231DR10,00NTRFNONREF", "EUR").unwrap();
        assert_eq!(tx.entry_date, Some(date(2023, 12, 31)));
    }

    #[test]
    fn test_reversal_marks() {
        let tx = parse_statement_line("240320RC5,00NRTINONREF", "EUR").unwrap();
        assert_eq!(tx.status, TransactionStatus::ReversalCredit);
        assert_eq!(tx.amount, Amount(-500));

        let tx = parse_statement_line("240320RD5,00NRTINONREF", "EUR").unwrap();
        assert_eq!(tx.status, TransactionStatus::ReversalDebit);
        assert_eq!(tx.amount, Amount(500));
    }

    #[test]
    fn test_supplementary_details() {
        let tx = parse_statement_line("240320D12,00NDDTKREF1//BREF\nSEPA LASTSCHRIFT", "EUR").unwrap();
        assert_eq!(tx.extra_details.as_deref(), Some("SEPA LASTSCHRIFT"));
        assert_eq!(tx.customer_reference, "KREF1");
    }

    #[test]
    fn test_unstructured_details() {
        let mut tx = parse_statement_line("240320D12,00NMSCNONREF", "EUR").unwrap();
        apply_details(&mut tx, "Miete April Wohnung 3");
        assert_eq!(tx.transaction_code, None);
        assert_eq!(tx.purpose.as_deref(), Some("Miete April Wohnung 3"));
    }

    #[test]
    fn test_mandate_and_creditor() {
        let mut tx = parse_statement_line("240320D12,00NDDTNONREF", "EUR").unwrap();
        apply_details(
            &mut tx,
            "105?00FOLGELASTSCHRIFT?20EREF+INV-99 MREF+M-1?21CRED+DE98ZZZ09999999999?22SVWZ+Strom",
        );
        assert_eq!(tx.end_to_end_reference.as_deref(), Some("INV-99"));
        assert_eq!(tx.mandate_reference.as_deref(), Some("M-1"));
        assert_eq!(tx.creditor_id.as_deref(), Some("DE98ZZZ09999999999"));
        assert_eq!(tx.purpose.as_deref(), Some("Strom"));
    }

    #[test]
    fn test_multiple_statements_and_at_separators() {
        let text = ":20:A@@:60F:C240301EUR0,00@@:61:240301C1,00NTRFNONREF@@:62F:C240301EUR1,00@@-@@:20:B@@:60M:D240302USD5,00@@:61:240302D2,00NTRFNONREF@@:62M:D240302USD7,00@@-";
        let statements = parse_statements(text).unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[1].transactions[0].currency, "USD");
        assert_eq!(statements[1].opening_balance.as_ref().unwrap().amount, Amount(-500));
        assert_eq!(statements[1].closing_balance.as_ref().unwrap().amount, Amount(-700));
    }

    #[test]
    fn test_invalid_line_is_error() {
        assert!(parse_statements(":20:X\n:60F:C240301EUR0,00\n:61:24XX01C1,00NTRF\n").is_err());
        assert!(parse_statements(":20:X\n:60F:Q240301EUR0,00\n").is_err());
    }
}
