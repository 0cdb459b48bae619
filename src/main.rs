use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::io;
use std::path::PathBuf;
use tracing::info;

use pushfin::fints::{BankClient, HttpsTransport, PinTanClient};
use pushfin::{
    config, fetch_statements, fetcher, logging, Config, ConsoleNotifier, MessageFormatter,
    Pipeline, PushoverNotifier, SeenStore, TelegramNotifier,
};

#[derive(Parser)]
#[command(name = "pushfin", version, about = "Push bank transactions fetched via FinTS")]
struct Cli {
    /// Config file (default: $PUSHFIN_CONFIG or ./pushfin.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the statement and send one notification per transaction (default)
    Run {
        /// Print messages instead of sending them
        #[arg(long)]
        dry_run: bool,
    },
    /// List the SEPA accounts the login can access
    Accounts,
    /// Print fetched transactions as CSV
    List {
        /// First booking date (YYYY-MM-DD), overrides the config
        #[arg(long)]
        since: Option<NaiveDate>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    let path = config::resolve_path(cli.config);
    let config = Config::load(&path)?;
    info!(config = %path.display(), "configuration loaded");

    match cli.command.unwrap_or(Command::Run { dry_run: false }) {
        Command::Run { dry_run } => run(&config, dry_run),
        Command::Accounts => list_accounts(&config),
        Command::List { since } => list_transactions(&config, since),
    }
}

fn bank_client(config: &Config) -> Result<PinTanClient<HttpsTransport>> {
    let transport = HttpsTransport::new(&config.fints.endpoint)
        .with_context(|| format!("Failed to set up transport for {}", config.fints.endpoint))?;
    Ok(PinTanClient::with_transport(config.dialog_config(), transport))
}

fn run(config: &Config, dry_run: bool) -> Result<()> {
    if !dry_run && !config.has_notifiers() {
        bail!("no notifier configured; add a pushover or telegram section");
    }

    let mut pipeline = Pipeline::new(MessageFormatter::new(&config.message.template))
        .with_balance(config.notify_balance);

    if dry_run {
        pipeline = pipeline.with_notifier(Box::new(ConsoleNotifier));
    } else {
        if let Some(p) = &config.pushover {
            pipeline = pipeline.with_notifier(Box::new(PushoverNotifier::new(&p.token, &p.user)?));
        }
        if let Some(t) = &config.telegram {
            pipeline = pipeline.with_notifier(Box::new(TelegramNotifier::new(&t.token, &t.chat_id)?));
        }
        if let Some(path) = &config.state_db {
            pipeline = pipeline.with_store(SeenStore::open(path)?);
        }
    }

    info!(notifiers = pipeline.notifier_count(), dry_run, "starting run");
    let mut bank = bank_client(config)?;
    let (start, end) = config.statement.date_range(Local::now().date_naive());
    let summary = pipeline.run(&mut bank, &config.fints.iban, start, end)?;

    println!(
        "✓ {} transactions fetched, {} notified, {} already sent, {} failed",
        summary.fetched, summary.notified, summary.skipped, summary.failed
    );
    Ok(())
}

fn list_accounts(config: &Config) -> Result<()> {
    let mut bank = bank_client(config)?;
    let accounts = bank.get_sepa_accounts()?;

    for account in &accounts {
        let marker = if account.matches_iban(&config.fints.iban) { "*" } else { " " };
        println!(
            "{} {:<34} {:<11} {}",
            marker, account.iban, account.bic, account.accountnumber
        );
    }
    println!("\n{} accounts", accounts.len());
    Ok(())
}

fn list_transactions(config: &Config, since: Option<NaiveDate>) -> Result<()> {
    let (start, end) = config.statement.date_range(Local::now().date_naive());
    let start = since.unwrap_or(start);

    let mut bank = bank_client(config)?;
    let statements = fetch_statements(&mut bank, &config.fints.iban, start, end)?;

    let mut writer = csv::Writer::from_writer(io::stdout());
    for tx in fetcher::flatten(statements) {
        writer.serialize(&tx).context("Failed to write CSV row")?;
    }
    writer.flush()?;
    Ok(())
}
