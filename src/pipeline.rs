// 🚚 Fetch-then-notify pipeline

use anyhow::Result;
use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::fetcher::fetch_statements;
use crate::fints::BankClient;
use crate::format::MessageFormatter;
use crate::notify::Notifier;
use crate::store::SeenStore;
use crate::transaction::Statement;

/// Counters for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub fetched: usize,
    pub notified: usize,
    /// Already notified in an earlier run
    pub skipped: usize,
    /// At least one notifier failed to deliver
    pub failed: usize,
}

pub struct Pipeline {
    notifiers: Vec<Box<dyn Notifier>>,
    formatter: MessageFormatter,
    store: Option<SeenStore>,
    notify_balance: bool,
}

impl Pipeline {
    pub fn new(formatter: MessageFormatter) -> Self {
        Pipeline {
            notifiers: Vec::new(),
            formatter,
            store: None,
            notify_balance: false,
        }
    }

    /// Builder pattern: add a notifier; every message goes to every notifier
    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Builder pattern: skip and record transactions via `store`
    pub fn with_store(mut self, store: SeenStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Builder pattern: send the final closing balance as a last message
    pub fn with_balance(mut self, enabled: bool) -> Self {
        self.notify_balance = enabled;
        self
    }

    pub fn notifier_count(&self) -> usize {
        self.notifiers.len()
    }

    /// Fetch the statement, then notify. A failed fetch sends nothing.
    pub fn run<B: BankClient + ?Sized>(
        &self,
        bank: &mut B,
        iban: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RunSummary> {
        let statements = fetch_statements(bank, iban, start, end)?;
        self.deliver(&statements)
    }

    /// Notify every transaction of `statements` in order
    pub fn deliver(&self, statements: &[Statement]) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        // Identical bookings (same day, amount, counterparty, purpose) are
        // numbered in fetch order so each gets its own dedup key
        let mut occurrences: HashMap<String, u32> = HashMap::new();

        for tx in statements.iter().flat_map(|s| s.transactions.iter()) {
            summary.fetched += 1;

            let seen = occurrences.entry(tx.idempotency_hash()).or_insert(0);
            let hash = tx.occurrence_hash(*seen);
            *seen += 1;

            if let Some(store) = &self.store {
                if store.contains(&hash)? {
                    debug!(%hash, "already notified, skipping");
                    summary.skipped += 1;
                    continue;
                }
            }

            let message = self.formatter.format(tx);
            if self.broadcast(&message) {
                summary.notified += 1;
                if let Some(store) = &self.store {
                    store.mark(&hash, tx)?;
                }
            } else {
                summary.failed += 1;
            }
        }

        if self.notify_balance {
            let balance = statements.iter().rev().find_map(|s| s.closing_balance.as_ref());
            match balance {
                Some(balance) => {
                    self.broadcast(&self.formatter.format_balance(balance));
                }
                None => debug!("statement carries no closing balance"),
            }
        }

        info!(
            fetched = summary.fetched,
            notified = summary.notified,
            skipped = summary.skipped,
            failed = summary.failed,
            "run finished"
        );
        Ok(summary)
    }

    /// Send to all notifiers; true when every one of them accepted
    fn broadcast(&self, message: &str) -> bool {
        let mut all_ok = true;
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(message) {
                warn!(notifier = notifier.name(), error = %e, "notification failed");
                all_ok = false;
            }
        }
        all_ok
    }
}
