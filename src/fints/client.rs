// 🏦 FinTS PIN/TAN Client - SEPA accounts and MT940 statements

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::dialog::{Dialog, DialogConfig};
use super::error::FintsError;
use super::message::{COUNTRY_GERMANY, ONE_STEP_TAN};
use super::segment::{from_latin1, Segment};
use super::transport::{HttpsTransport, Transport};
use crate::mt940;
use crate::transaction::Statement;

/// Product registration id sent when none is configured
pub const DEFAULT_PRODUCT_ID: &str = "6151256F3D4F9975B877BD4A2";
pub const PRODUCT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// HKKAZ versions this client can build, in order of preference
const STATEMENT_VERSIONS: [u32; 3] = [5, 6, 7];
const DEFAULT_STATEMENT_VERSION: u32 = 7;

/// Request segments are numbered from 3 inside the signed part
const FIRST_BUSINESS_SEGMENT: u32 = 3;

// ============================================================================
// ACCOUNT
// ============================================================================

/// An account as listed by HISPA
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SepaAccount {
    pub iban: String,
    pub bic: String,
    pub accountnumber: String,
    pub subaccount: Option<String>,
    pub blz: String,
}

impl SepaAccount {
    /// Case and whitespace insensitive IBAN comparison
    pub fn matches_iban(&self, iban: &str) -> bool {
        normalize_iban(&self.iban) == normalize_iban(iban)
    }

    /// International account identification (KTI), used from HKKAZ v7 on
    fn kti(&self) -> Vec<String> {
        vec![
            self.iban.clone(),
            self.bic.clone(),
            self.accountnumber.clone(),
            self.subaccount.clone().unwrap_or_default(),
            COUNTRY_GERMANY.to_string(),
            self.blz.clone(),
        ]
    }

    /// National account identification (KTV), used up to HKKAZ v6
    fn ktv(&self) -> Vec<String> {
        vec![
            self.accountnumber.clone(),
            self.subaccount.clone().unwrap_or_default(),
            COUNTRY_GERMANY.to_string(),
            self.blz.clone(),
        ]
    }
}

pub fn normalize_iban(iban: &str) -> String {
    iban.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

// ============================================================================
// CLIENT TRAIT
// ============================================================================

/// The two calls the fetcher needs from a bank
///
/// Implemented by `PinTanClient`; tests substitute in-memory banks.
pub trait BankClient {
    fn get_sepa_accounts(&mut self) -> Result<Vec<SepaAccount>>;

    fn get_statement(
        &mut self,
        account: &SepaAccount,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Statement>>;
}

// ============================================================================
// PIN/TAN CLIENT
// ============================================================================

pub struct PinTanClient<T: Transport = HttpsTransport> {
    config: DialogConfig,
    transport: T,
    system_id: String,
}

impl PinTanClient<HttpsTransport> {
    /// Client talking HTTPS to `endpoint` with one-step PIN/TAN
    pub fn new(blz: &str, login: &str, pin: &str, endpoint: &str) -> Result<Self> {
        let transport = HttpsTransport::new(endpoint)
            .with_context(|| format!("Failed to set up transport for {}", endpoint))?;
        Ok(PinTanClient::with_transport(
            DialogConfig {
                blz: blz.to_string(),
                user_id: login.to_string(),
                customer_id: login.to_string(),
                pin: pin.to_string(),
                product_id: DEFAULT_PRODUCT_ID.to_string(),
                product_version: PRODUCT_VERSION.to_string(),
                tan_mechanism: ONE_STEP_TAN.to_string(),
            },
            transport,
        ))
    }
}

impl<T: Transport> PinTanClient<T> {
    pub fn with_transport(config: DialogConfig, transport: T) -> Self {
        PinTanClient {
            config,
            transport,
            system_id: "0".to_string(),
        }
    }

    /// Two-step mechanisms need a registered system id; one-step works with "0"
    fn ensure_system_id(&mut self) -> Result<()> {
        if self.config.is_two_step() && self.system_id == "0" {
            self.system_id = Dialog::synchronize(&self.config, &self.transport)
                .context("Failed to synchronize system id")?;
        }
        Ok(())
    }

    fn open_dialog(&self) -> Result<Dialog<'_, T>> {
        Dialog::open(&self.config, &self.transport, &self.system_id)
            .context("Failed to open FinTS dialog")
    }
}

impl<T: Transport> BankClient for PinTanClient<T> {
    fn get_sepa_accounts(&mut self) -> Result<Vec<SepaAccount>> {
        self.ensure_system_id()?;
        let mut dialog = self.open_dialog()?;

        let response = match dialog.send(&[Segment::new("HKSPA", 1)]) {
            Ok(response) => response,
            Err(e) => {
                dialog.abort();
                return Err(e).context("HKSPA request failed");
            }
        };

        let accounts: Vec<SepaAccount> = response
            .find_all("HISPA")
            .flat_map(|seg| (0..seg.elements.len()).map(move |i| (seg, i)))
            .filter_map(|(seg, i)| {
                let item = |sub: usize| seg.item(i, sub).unwrap_or("").to_string();
                if item(1).is_empty() {
                    return None;
                }
                Some(SepaAccount {
                    iban: item(1),
                    bic: item(2),
                    accountnumber: item(3),
                    subaccount: Some(item(4)).filter(|s| !s.is_empty()),
                    blz: item(6),
                })
            })
            .collect();

        dialog.end()?;
        info!(count = accounts.len(), "fetched SEPA accounts");
        Ok(accounts)
    }

    fn get_statement(
        &mut self,
        account: &SepaAccount,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Statement>> {
        self.ensure_system_id()?;
        let mut dialog = self.open_dialog()?;

        let version = dialog
            .supported_version("HKKAZ", &STATEMENT_VERSIONS)
            .unwrap_or(DEFAULT_STATEMENT_VERSION);
        debug!(version, iban = %account.iban, %start, %end, "requesting statement");

        let booked = match download_statement(&mut dialog, account, version, start, end) {
            Ok(booked) => booked,
            Err(e) => {
                dialog.abort();
                return Err(e);
            }
        };
        dialog.end()?;

        let text = from_latin1(&booked);
        let statements = mt940::parse_statements(&text).context("Failed to parse MT940 statement")?;
        info!(
            statements = statements.len(),
            transactions = statements.iter().map(|s| s.transactions.len()).sum::<usize>(),
            "fetched statement"
        );
        Ok(statements)
    }
}

/// Raw HIKAZ payload of all pages, following 3040 touchdown points
fn download_statement<T: Transport>(
    dialog: &mut Dialog<'_, T>,
    account: &SepaAccount,
    version: u32,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<u8>> {
    let mut booked = Vec::new();
    let mut touchdown: Option<String> = None;
    loop {
        let request = statement_request(account, version, start, end, touchdown.as_deref());
        let response = dialog.send(&[request]).context("HKKAZ request failed")?;

        for seg in response.responses_to("HIKAZ", FIRST_BUSINESS_SEGMENT) {
            if let Some(data) = seg.get_binary(0) {
                booked.extend_from_slice(data);
            }
        }

        // 3040: more data available, continue from the touchdown point
        let next = response
            .code_for("3040", FIRST_BUSINESS_SEGMENT)
            .or_else(|| response.code("3040"))
            .and_then(|c| c.parameters.first().cloned());

        match next {
            Some(point) if touchdown.as_deref() == Some(point.as_str()) => {
                return Err(FintsError::Codec(format!(
                    "bank repeated touchdown point {}",
                    point
                ))
                .into());
            }
            Some(point) => {
                debug!(touchdown = %point, "statement continues");
                touchdown = Some(point);
            }
            None => break,
        }
    }
    Ok(booked)
}

fn statement_request(
    account: &SepaAccount,
    version: u32,
    start: NaiveDate,
    end: NaiveDate,
    touchdown: Option<&str>,
) -> Segment {
    let account_id = if version >= 7 { account.kti() } else { account.ktv() };
    Segment::new("HKKAZ", version)
        .group(account_id)
        .text("N")
        .text(start.format("%Y%m%d").to_string())
        .text(end.format("%Y%m%d").to_string())
        .empty()
        .text(touchdown.unwrap_or(""))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fints::segment::parse_segments;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Replays canned bank answers and records what was sent
    struct ScriptedTransport {
        responses: RefCell<VecDeque<Vec<u8>>>,
        requests: RefCell<Vec<Vec<u8>>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Vec<u8>>) -> Self {
            ScriptedTransport {
                responses: RefCell::new(responses.into()),
                requests: RefCell::new(Vec::new()),
            }
        }

        /// Business segments of the n-th request
        fn request_segments(&self, n: usize) -> Vec<Segment> {
            let requests = self.requests.borrow();
            let outer = parse_segments(&requests[n]).unwrap();
            let inner = parse_segments(outer[2].get_binary(0).unwrap()).unwrap();
            inner[1..inner.len() - 1].to_vec()
        }
    }

    impl Transport for ScriptedTransport {
        fn send(&self, message: &[u8]) -> crate::fints::FintsResult<Vec<u8>> {
            self.requests.borrow_mut().push(message.to_vec());
            self.responses
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| FintsError::Transport("no scripted response left".to_string()))
        }
    }

    fn bank_message(dialog_id: &str, inner: &[u8]) -> Vec<u8> {
        let mut msg = format!("HNHBK:1:3+000000000000+300+{}+1'HNVSK:998:3+PIN:1+998+1+1::0'", dialog_id)
            .into_bytes();
        msg.extend_from_slice(format!("HNVSD:999:1+@{}@", inner.len()).as_bytes());
        msg.extend_from_slice(inner);
        msg.extend_from_slice(b"'HNHBS:5:1+1'");
        msg
    }

    fn init_ok() -> Vec<u8> {
        bank_message(
            "DLG1",
            b"HIRMG:2:2+0010::Nachricht entgegengenommen.'HIRMS:3:2:3+0020::Auftrag ausgefuehrt.'HIKAZS:4:6:3+1+1+90:N:N'HIKAZS:5:7:3+1+1+90:N:N'",
        )
    }

    fn end_ok() -> Vec<u8> {
        bank_message("DLG1", b"HIRMG:2:2+0100::Dialog beendet.'")
    }

    fn hikaz(codes: &str, mt940: &str) -> Vec<u8> {
        let mut inner = format!("HIRMG:2:2+0010::ok'HIRMS:3:2:3+{}'", codes).into_bytes();
        inner.extend_from_slice(format!("HIKAZ:4:7:3+@{}@", mt940.len()).as_bytes());
        inner.extend_from_slice(mt940.as_bytes());
        inner.push(b'\'');
        bank_message("DLG1", &inner)
    }

    fn config() -> DialogConfig {
        DialogConfig {
            blz: "37040044".to_string(),
            user_id: "user".to_string(),
            customer_id: "user".to_string(),
            pin: "1234".to_string(),
            product_id: DEFAULT_PRODUCT_ID.to_string(),
            product_version: "0.2.0".to_string(),
            tan_mechanism: ONE_STEP_TAN.to_string(),
        }
    }

    fn account() -> SepaAccount {
        SepaAccount {
            iban: "DE89370400440532013000".to_string(),
            bic: "COBADEFFXXX".to_string(),
            accountnumber: "0532013000".to_string(),
            subaccount: None,
            blz: "37040044".to_string(),
        }
    }

    #[test]
    fn test_get_sepa_accounts() {
        let transport = ScriptedTransport::new(vec![
            init_ok(),
            bank_message(
                "DLG1",
                b"HIRMG:2:2+0010::ok'HIRMS:3:2:3+0020::ok'HISPA:4:1:3+J:DE89370400440532013000:COBADEFFXXX:0532013000::280:37040044+J:DE02120300000000202051:BYLADEM1001:0000202051:01:280:12030000'",
            ),
            end_ok(),
        ]);
        let mut client = PinTanClient::with_transport(config(), transport);

        let accounts = client.get_sepa_accounts().unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0], account());
        assert_eq!(accounts[1].subaccount.as_deref(), Some("01"));
        assert_eq!(accounts[1].blz, "12030000");

        let init = client.transport.request_segments(0);
        let kinds: Vec<&str> = init.iter().map(|s| s.kind()).collect();
        assert_eq!(kinds, vec!["HKIDN", "HKVVB"]);
        assert_eq!(client.transport.request_segments(1)[0].kind(), "HKSPA");
        let end = client.transport.request_segments(2);
        assert_eq!(end[0].kind(), "HKEND");
        assert_eq!(end[0].get(0), Some("DLG1"));
    }

    #[test]
    fn test_get_statement_follows_touchdown() {
        let page1 = ":20:STARTUMSE\r\n:25:37040044/0532013000\r\n:28C:1/1\r\n:60F:C240301EUR100,00\r\n:61:240302D10,00NMSCNONREF\r\n:86:?00KARTENZAHLUNG?20Kaffee\r\n:62F:C240302EUR90,00\r\n-\r\n";
        let page2 = ":20:STARTUMSE\r\n:25:37040044/0532013000\r\n:28C:2/1\r\n:60F:C240302EUR90,00\r\n:61:240303C5,00NTRFNONREF\r\n:62F:C240303EUR95,00\r\n-\r\n";

        let transport = ScriptedTransport::new(vec![
            init_ok(),
            hikaz("3040::Es liegen weitere Informationen vor.:TD-1", page1),
            hikaz("0020::Auftrag ausgefuehrt.", page2),
            end_ok(),
        ]);
        let mut client = PinTanClient::with_transport(config(), transport);

        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let statements = client.get_statement(&account(), start, end).unwrap();

        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].transactions.len(), 1);
        assert_eq!(statements[1].transactions[0].amount.cents(), 500);

        let first = &client.transport.request_segments(1)[0];
        assert_eq!(first.kind(), "HKKAZ");
        assert_eq!(first.header.version, 7);
        assert_eq!(first.item(0, 0), Some("DE89370400440532013000"));
        assert_eq!(first.get(2), Some("20240301"));
        assert_eq!(first.get(3), Some("20240331"));
        assert_eq!(first.get(5), None);

        let second = &client.transport.request_segments(2)[0];
        assert_eq!(second.get(5), Some("TD-1"));
    }

    #[test]
    fn test_failed_statement_still_ends_dialog() {
        let page = ":20:STARTUMSE\r\n:25:37040044/0532013000\r\n:28C:1/1\r\n:60F:C240301EUR100,00\r\n:62F:C240301EUR100,00\r\n-\r\n";
        let transport = ScriptedTransport::new(vec![
            init_ok(),
            hikaz("3040::Es liegen weitere Informationen vor.:TD-1", page),
            hikaz("3040::Es liegen weitere Informationen vor.:TD-1", page),
            end_ok(),
        ]);
        let mut client = PinTanClient::with_transport(config(), transport);

        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        assert!(client.get_statement(&account(), start, end).is_err());

        let last = client.transport.request_segments(3);
        assert_eq!(last[0].kind(), "HKEND");
        assert_eq!(last[0].get(0), Some("DLG1"));
    }

    #[test]
    fn test_rejected_account_list_still_ends_dialog() {
        let transport = ScriptedTransport::new(vec![
            init_ok(),
            bank_message(
                "DLG1",
                b"HIRMG:2:2+9050::Teilweise fehlerhaft.'HIRMS:3:2:3+9010::Auftrag abgelehnt.'",
            ),
            end_ok(),
        ]);
        let mut client = PinTanClient::with_transport(config(), transport);

        assert!(client.get_sepa_accounts().is_err());
        assert_eq!(client.transport.request_segments(2)[0].kind(), "HKEND");
    }

    #[test]
    fn test_statement_uses_ktv_for_old_versions() {
        let seg = statement_request(
            &account(),
            6,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            None,
        );
        assert_eq!(seg.header.version, 6);
        assert_eq!(seg.item(0, 0), Some("0532013000"));
        assert_eq!(seg.item(0, 3), Some("37040044"));
    }

    #[test]
    fn test_bank_error_is_surfaced() {
        let transport = ScriptedTransport::new(vec![bank_message(
            "0",
            b"HIRMG:2:2+9050::Teilweise fehlerhaft.'HIRMS:3:2:3+9942::PIN falsch.'",
        )]);
        let mut client = PinTanClient::with_transport(config(), transport);

        let err = client.get_sepa_accounts().unwrap_err();
        let fints = err.downcast_ref::<FintsError>().expect("FinTS error in chain");
        match fints {
            FintsError::Bank(codes) => assert!(codes.iter().any(|c| c.code == "9942")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_two_step_synchronizes_first() {
        let mut cfg = config();
        cfg.tan_mechanism = "942".to_string();

        let transport = ScriptedTransport::new(vec![
            bank_message("SYN", b"HIRMG:2:2+0010::ok'HISYN:3:4:5+SYSTEM-42'"),
            bank_message("SYN", b"HIRMG:2:2+0100::Dialog beendet.'"),
            init_ok(),
            bank_message("DLG1", b"HIRMG:2:2+0010::ok'HISPA:4:1:3+J:DE89370400440532013000:COBADEFFXXX:0532013000::280:37040044'"),
            end_ok(),
        ]);
        let mut client = PinTanClient::with_transport(cfg, transport);
        client.get_sepa_accounts().unwrap();

        let sync = client.transport.request_segments(0);
        let kinds: Vec<&str> = sync.iter().map(|s| s.kind()).collect();
        assert_eq!(kinds, vec!["HKIDN", "HKVVB", "HKTAN", "HKSYN"]);

        let init = client.transport.request_segments(2);
        assert_eq!(init[0].get(2), Some("SYSTEM-42"));
    }

    #[test]
    fn test_matches_iban_ignores_formatting() {
        assert!(account().matches_iban("de89 3704 0044 0532 0130 00"));
        assert!(!account().matches_iban("DE02120300000000202051"));
    }
}
