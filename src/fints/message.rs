// ✉️ FinTS Message Envelope - PIN/TAN security profile
// Wraps business segments in HNHBK/HNVSK/HNVSD/HNSHK/HNSHA/HNHBS and unwraps responses

use chrono::{DateTime, Local};

use super::error::{FintsError, FintsResult};
use super::segment::{encode_segments, parse_segments, DataItem, Segment};

pub const HBCI_VERSION: &str = "300";
pub const COUNTRY_GERMANY: &str = "280";

/// Security function code for one-step PIN/TAN
pub const ONE_STEP_TAN: &str = "999";

const HEADER_LENGTH_DIGITS: usize = 12;
const ENCRYPTION_HEADER_NUMBER: u32 = 998;
const ENCRYPTED_DATA_NUMBER: u32 = 999;

// ============================================================================
// OUTGOING MESSAGES
// ============================================================================

/// Everything the envelope needs to know about the current dialog
#[derive(Debug, Clone)]
pub struct Envelope<'a> {
    pub blz: &'a str,
    pub user_id: &'a str,
    pub pin: &'a str,
    pub system_id: &'a str,
    pub dialog_id: &'a str,
    pub message_number: u32,
    pub security_function: &'a str,
    pub security_reference: u32,
    pub timestamp: DateTime<Local>,
}

impl<'a> Envelope<'a> {
    fn security_profile(&self) -> [&'static str; 2] {
        if self.security_function == ONE_STEP_TAN {
            ["PIN", "1"]
        } else {
            ["PIN", "2"]
        }
    }

    fn date_time(&self) -> [String; 3] {
        [
            "1".to_string(),
            self.timestamp.format("%Y%m%d").to_string(),
            self.timestamp.format("%H%M%S").to_string(),
        ]
    }

    fn encryption_header(&self) -> Segment {
        let [dt_kind, date, time] = self.date_time();
        // PIN/TAN sends a dummy key in the algorithm group
        let algorithm: Vec<DataItem> = vec![
            "2".into(),
            "2".into(),
            "13".into(),
            DataItem::Binary(b"00000000".to_vec()),
            "5".into(),
            "1".into(),
        ];
        let mut seg = Segment::new("HNVSK", 3)
            .group(self.security_profile())
            .text("998")
            .text("1")
            .group(["1", "", self.system_id])
            .group([dt_kind, date, time])
            .group(algorithm)
            .group([COUNTRY_GERMANY, self.blz, self.user_id, "V", "0", "0"])
            .text("0");
        seg.header.number = ENCRYPTION_HEADER_NUMBER;
        seg
    }

    fn signature_header(&self, number: u32) -> Segment {
        let [dt_kind, date, time] = self.date_time();
        let mut seg = Segment::new("HNSHK", 4)
            .group(self.security_profile())
            .text(self.security_function)
            .text(self.security_reference.to_string())
            .text("1")
            .text("1")
            .group(["1", "", self.system_id])
            .text("1")
            .group([dt_kind, date, time])
            .group(["1", "999", "1"])
            .group(["6", "10", "16"])
            .group([COUNTRY_GERMANY, self.blz, self.user_id, "S", "0", "0"]);
        seg.header.number = number;
        seg
    }

    fn signature_trailer(&self, number: u32) -> Segment {
        let mut seg = Segment::new("HNSHA", 2)
            .text(self.security_reference.to_string())
            .empty()
            .text(self.pin);
        seg.header.number = number;
        seg
    }

    /// Build the complete wire message around `business` segments
    pub fn build(&self, business: &[Segment]) -> Vec<u8> {
        // Inner, signed part: HNSHK=2, business=3.., HNSHA last
        let mut inner = Vec::with_capacity(business.len() + 2);
        inner.push(self.signature_header(2));
        let mut number = 3;
        for seg in business {
            let mut seg = seg.clone();
            seg.header.number = number;
            inner.push(seg);
            number += 1;
        }
        inner.push(self.signature_trailer(number));
        let trailer_number = number + 1;

        let mut encrypted = Segment::new("HNVSD", 1).binary(encode_segments(&inner));
        encrypted.header.number = ENCRYPTED_DATA_NUMBER;

        let mut trailer = Segment::new("HNHBS", 1).text(self.message_number.to_string());
        trailer.header.number = trailer_number;

        let body = encode_segments(&[self.encryption_header(), encrypted, trailer]);

        // The header states the total length including itself, so size it with
        // a placeholder of the same width first
        let header_len = self.message_header(0).encode().len();
        let total = header_len + body.len();

        let mut out = self.message_header(total).encode();
        out.extend_from_slice(&body);
        out
    }

    fn message_header(&self, total_len: usize) -> Segment {
        let mut seg = Segment::new("HNHBK", 3)
            .text(format!("{:0width$}", total_len, width = HEADER_LENGTH_DIGITS))
            .text(HBCI_VERSION)
            .text(self.dialog_id)
            .text(self.message_number.to_string());
        seg.header.number = 1;
        seg
    }
}

// ============================================================================
// RESPONSES
// ============================================================================

/// A bank return code from HIRMG (message level) or HIRMS (segment level)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnCode {
    pub code: String,
    pub reference_element: String,
    pub text: String,
    pub parameters: Vec<String>,
    /// Segment number the code refers to (HIRMS only)
    pub segment: Option<u32>,
}

impl ReturnCode {
    pub fn is_error(&self) -> bool {
        self.code.starts_with('9')
    }

    pub fn is_warning(&self) -> bool {
        self.code.starts_with('3')
    }
}

/// A parsed bank response with the envelope stripped
#[derive(Debug, Clone)]
pub struct Response {
    pub dialog_id: String,
    pub segments: Vec<Segment>,
    pub global_codes: Vec<ReturnCode>,
    pub segment_codes: Vec<ReturnCode>,
}

impl Response {
    pub fn parse(data: &[u8]) -> FintsResult<Self> {
        let outer = parse_segments(data)?;

        let dialog_id = outer
            .iter()
            .find(|s| s.kind() == "HNHBK")
            .and_then(|s| s.get(2))
            .ok_or(FintsError::MissingSegment("HNHBK"))?
            .to_string();

        // Unwrap HNVSD in place; some test servers answer unencrypted
        let mut segments = Vec::new();
        for seg in outer {
            if seg.kind() == "HNVSD" {
                let payload = seg
                    .get_binary(0)
                    .ok_or_else(|| FintsError::Codec("HNVSD without payload".to_string()))?;
                segments.extend(parse_segments(payload)?);
            } else {
                segments.push(seg);
            }
        }

        let mut global_codes = Vec::new();
        let mut segment_codes = Vec::new();
        for seg in &segments {
            match seg.kind() {
                "HIRMG" => global_codes.extend(read_codes(seg)),
                "HIRMS" => segment_codes.extend(read_codes(seg)),
                _ => {}
            }
        }

        Ok(Response {
            dialog_id,
            segments,
            global_codes,
            segment_codes,
        })
    }

    pub fn find(&self, kind: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.kind() == kind)
    }

    pub fn find_all<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Segment> + 'a {
        self.segments.iter().filter(move |s| s.kind() == kind)
    }

    /// Segments answering request segment `number`
    pub fn responses_to<'a>(
        &'a self,
        kind: &'a str,
        number: u32,
    ) -> impl Iterator<Item = &'a Segment> + 'a {
        self.segments
            .iter()
            .filter(move |s| s.kind() == kind && s.header.reference == Some(number))
    }

    pub fn all_codes(&self) -> impl Iterator<Item = &ReturnCode> {
        self.global_codes.iter().chain(self.segment_codes.iter())
    }

    pub fn errors(&self) -> Vec<ReturnCode> {
        self.all_codes().filter(|c| c.is_error()).cloned().collect()
    }

    pub fn code(&self, code: &str) -> Option<&ReturnCode> {
        self.all_codes().find(|c| c.code == code)
    }

    /// Code `code` attached to request segment `number`
    pub fn code_for(&self, code: &str, number: u32) -> Option<&ReturnCode> {
        self.segment_codes
            .iter()
            .find(|c| c.code == code && c.segment == Some(number))
    }
}

fn read_codes(seg: &Segment) -> Vec<ReturnCode> {
    seg.elements
        .iter()
        .filter_map(|element| {
            let text = |i: usize| {
                element
                    .get(i)
                    .and_then(|item| item.as_text())
                    .unwrap_or("")
                    .to_string()
            };
            let code = text(0);
            if code.is_empty() {
                return None;
            }
            Some(ReturnCode {
                code,
                reference_element: text(1),
                text: text(2),
                parameters: (3..element.len()).map(text).collect(),
                segment: seg.header.reference,
            })
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
