// 📥 Transaction Fetcher - log in, pick the account by IBAN, download the statement

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::info;

use crate::fints::{BankClient, FintsError, HttpsTransport, PinTanClient, SepaAccount};
use crate::transaction::{Statement, Transaction};

/// Bank login data; the PIN is redacted from Debug output
#[derive(Clone)]
pub struct Credentials {
    pub blz: String,
    pub iban: String,
    pub login: String,
    pub pin: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("blz", &self.blz)
            .field("iban", &self.iban)
            .field("login", &self.login)
            .field("pin", &"***")
            .finish()
    }
}

/// Fetch all booked transactions of `credentials.iban` between `start` and `end`
pub fn get_transactions(
    credentials: &Credentials,
    start: NaiveDate,
    end: NaiveDate,
    endpoint: &str,
) -> Result<Vec<Transaction>> {
    let mut client: PinTanClient<HttpsTransport> = PinTanClient::new(
        &credentials.blz,
        &credentials.login,
        &credentials.pin,
        endpoint,
    )?;
    let statements = fetch_statements(&mut client, &credentials.iban, start, end)?;
    Ok(flatten(statements))
}

/// Statements for the account matching `iban`, in bank order
pub fn fetch_statements<B: BankClient + ?Sized>(
    bank: &mut B,
    iban: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<Statement>> {
    let accounts = bank.get_sepa_accounts().context("Failed to list SEPA accounts")?;
    let account = select_account(&accounts, iban)?;
    info!(iban = %account.iban, %start, %end, "fetching statement");

    bank.get_statement(account, start, end)
        .with_context(|| format!("Failed to fetch statement for {}", account.iban))
}

pub fn select_account<'a>(accounts: &'a [SepaAccount], iban: &str) -> Result<&'a SepaAccount> {
    accounts
        .iter()
        .find(|a| a.matches_iban(iban))
        .ok_or_else(|| FintsError::AccountNotFound(iban.to_string()).into())
}

pub fn flatten(statements: Vec<Statement>) -> Vec<Transaction> {
    statements.into_iter().flat_map(|s| s.transactions).collect()
}
