// 🔁 FinTS Dialog - numbered message exchange bound to one dialog id

use chrono::Local;
use tracing::{debug, info, warn};

use super::error::{FintsError, FintsResult};
use super::message::{Envelope, Response, COUNTRY_GERMANY, ONE_STEP_TAN};
use super::segment::Segment;
use super::transport::Transport;

/// Credentials and product data shared by every dialog of a client
#[derive(Debug, Clone)]
pub struct DialogConfig {
    pub blz: String,
    pub user_id: String,
    pub customer_id: String,
    pub pin: String,
    pub product_id: String,
    pub product_version: String,
    pub tan_mechanism: String,
}

impl DialogConfig {
    pub fn is_two_step(&self) -> bool {
        self.tan_mechanism != ONE_STEP_TAN
    }
}

/// An open dialog; closed with `end()`
pub struct Dialog<'a, T: Transport> {
    config: &'a DialogConfig,
    transport: &'a T,
    system_id: String,
    dialog_id: String,
    message_number: u32,
    security_reference: u32,
    /// Parameter segments (HI...S) from the bank's BPD
    pub bank_parameters: Vec<Segment>,
}

impl<'a, T: Transport> Dialog<'a, T> {
    /// Open a dialog: identification, processing preparation, and for two-step
    /// TAN mechanisms an HKTAN process 4 announcement
    pub fn open(config: &'a DialogConfig, transport: &'a T, system_id: &str) -> FintsResult<Self> {
        let mut dialog = Dialog {
            config,
            transport,
            system_id: system_id.to_string(),
            dialog_id: "0".to_string(),
            message_number: 1,
            security_reference: security_reference(),
            bank_parameters: Vec::new(),
        };

        let mut segments = vec![dialog.identification(), dialog.processing_preparation()];
        if config.is_two_step() {
            segments.push(Segment::new("HKTAN", 6).text("4").text("HKIDN"));
        }

        let response = dialog.send(&segments)?;
        dialog.dialog_id = response.dialog_id.clone();
        dialog.bank_parameters = response
            .segments
            .iter()
            .filter(|s| s.kind().starts_with("HI") && s.kind().ends_with('S'))
            .cloned()
            .collect();

        if let Some(allowed) = response.code("3920") {
            debug!(mechanisms = ?allowed.parameters, "bank announced TAN mechanisms");
            if config.is_two_step() && !allowed.parameters.contains(&config.tan_mechanism) {
                warn!(
                    configured = %config.tan_mechanism,
                    allowed = ?allowed.parameters,
                    "configured TAN mechanism is not offered by the bank"
                );
            }
        }

        info!(dialog_id = %dialog.dialog_id, "FinTS dialog opened");
        Ok(dialog)
    }

    /// Open a synchronisation dialog to obtain a fresh system id
    pub fn synchronize(config: &DialogConfig, transport: &T) -> FintsResult<String> {
        let mut dialog = Dialog {
            config,
            transport,
            system_id: "0".to_string(),
            dialog_id: "0".to_string(),
            message_number: 1,
            security_reference: security_reference(),
            bank_parameters: Vec::new(),
        };

        let mut segments = vec![
            dialog.identification(),
            dialog.processing_preparation(),
        ];
        if config.is_two_step() {
            segments.push(Segment::new("HKTAN", 6).text("4").text("HKIDN"));
        }
        segments.push(Segment::new("HKSYN", 3).text("0"));

        let response = dialog.send(&segments)?;
        dialog.dialog_id = response.dialog_id.clone();

        let system_id = response
            .find("HISYN")
            .and_then(|s| s.get(0))
            .ok_or(FintsError::MissingSegment("HISYN"))?
            .to_string();
        debug!(%system_id, "received system id");

        dialog.end()?;
        Ok(system_id)
    }

    fn identification(&self) -> Segment {
        Segment::new("HKIDN", 2)
            .group([COUNTRY_GERMANY, self.config.blz.as_str()])
            .text(self.config.customer_id.as_str())
            .text(self.system_id.as_str())
            .text(if self.system_id == "0" { "0" } else { "1" })
    }

    fn processing_preparation(&self) -> Segment {
        Segment::new("HKVVB", 3)
            .text("0")
            .text("0")
            .text("0")
            .text(self.config.product_id.as_str())
            .text(self.config.product_version.as_str())
    }

    /// Send business segments and fail on any 9xxx return code.
    ///
    /// Request segment numbering starts at 3, so the n-th business segment in
    /// `segments` is number `3 + n` in the bank's HIRMS references.
    pub fn send(&mut self, segments: &[Segment]) -> FintsResult<Response> {
        let envelope = Envelope {
            blz: &self.config.blz,
            user_id: &self.config.user_id,
            pin: &self.config.pin,
            system_id: &self.system_id,
            dialog_id: &self.dialog_id,
            message_number: self.message_number,
            security_function: &self.config.tan_mechanism,
            security_reference: self.security_reference,
            timestamp: Local::now(),
        };
        let request = envelope.build(segments);
        self.message_number += 1;

        let raw = self.transport.send(&request)?;
        let response = Response::parse(&raw)?;

        for code in response.all_codes() {
            if code.is_warning() {
                debug!(code = %code.code, text = %code.text, "bank warning");
            }
        }

        let errors = response.errors();
        if !errors.is_empty() {
            return Err(FintsError::Bank(errors));
        }

        // 0030: order received, TAN required
        if response.code("0030").is_some() {
            let kinds: Vec<&str> = segments.iter().map(|s| s.kind()).collect();
            return Err(FintsError::TanRequired(kinds.join(",")));
        }

        Ok(response)
    }

    /// Highest version of business transaction `kind` (e.g. "HKKAZ") the bank
    /// supports among `known`
    pub fn supported_version(&self, kind: &str, known: &[u32]) -> Option<u32> {
        let parameter_kind = format!("HI{}S", &kind[2..]);
        self.bank_parameters
            .iter()
            .filter(|s| s.kind() == parameter_kind)
            .map(|s| s.header.version)
            .filter(|v| known.contains(v))
            .max()
    }

    /// Close the dialog; errors here are logged, the data is already fetched
    pub fn end(mut self) -> FintsResult<()> {
        let end = Segment::new("HKEND", 1).text(self.dialog_id.clone());
        match self.send(&[end]) {
            Ok(_) => {
                debug!(dialog_id = %self.dialog_id, "FinTS dialog closed");
                Ok(())
            }
            Err(FintsError::Bank(codes)) => {
                warn!(?codes, "bank reported errors while closing dialog");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// End the dialog after a failed request; the original error is what matters
    pub fn abort(self) {
        if let Err(e) = self.end() {
            warn!(error = %e, "failed to close FinTS dialog");
        }
    }
}

/// Security reference shared by HNSHK and HNSHA of a dialog
fn security_reference() -> u32 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    1_000_000 + nanos % 8_999_999
}
