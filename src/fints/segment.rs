// 🧱 FinTS Segment Codec
// Segments end with ', data elements are split by +, group items by :
// ? escapes the next byte, binary data is framed as @len@bytes

use super::error::{FintsError, FintsResult};

const SEGMENT_END: u8 = b'\'';
const ELEMENT_SEP: u8 = b'+';
const GROUP_SEP: u8 = b':';
const ESCAPE: u8 = b'?';
const BINARY_MARK: u8 = b'@';

// ============================================================================
// CORE TYPES
// ============================================================================

/// One item inside a data element group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataItem {
    Text(String),
    Binary(Vec<u8>),
}

impl DataItem {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            DataItem::Text(s) => Some(s),
            DataItem::Binary(_) => None,
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            DataItem::Binary(b) => Some(b),
            DataItem::Text(_) => None,
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            DataItem::Text(s) => s.is_empty(),
            DataItem::Binary(_) => false,
        }
    }
}

impl From<&str> for DataItem {
    fn from(s: &str) -> Self {
        DataItem::Text(s.to_string())
    }
}

impl From<String> for DataItem {
    fn from(s: String) -> Self {
        DataItem::Text(s)
    }
}

/// A data element: a single item, or a group of items joined by ':'
pub type DataElement = Vec<DataItem>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentHeader {
    pub kind: String,
    pub number: u32,
    pub version: u32,
    /// Number of the request segment this response segment refers to
    pub reference: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: SegmentHeader,
    pub elements: Vec<DataElement>,
}

impl Segment {
    /// Create an outgoing segment; the message builder assigns its number
    pub fn new(kind: &str, version: u32) -> Self {
        Segment {
            header: SegmentHeader {
                kind: kind.to_string(),
                number: 0,
                version,
                reference: None,
            },
            elements: Vec::new(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.header.kind
    }

    /// Builder: append a single text element
    pub fn text(mut self, value: impl Into<String>) -> Self {
        self.elements.push(vec![DataItem::Text(value.into())]);
        self
    }

    /// Builder: append a group element
    pub fn group<I, T>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<DataItem>,
    {
        self.elements.push(items.into_iter().map(Into::into).collect());
        self
    }

    /// Builder: append a binary element
    pub fn binary(mut self, data: Vec<u8>) -> Self {
        self.elements.push(vec![DataItem::Binary(data)]);
        self
    }

    /// Builder: append an empty element
    pub fn empty(mut self) -> Self {
        self.elements.push(vec![DataItem::Text(String::new())]);
        self
    }

    /// Text of item `sub` in element `index` (elements count from 0 after the header)
    pub fn item(&self, index: usize, sub: usize) -> Option<&str> {
        self.elements
            .get(index)
            .and_then(|e| e.get(sub))
            .and_then(DataItem::as_text)
    }

    /// Text of the first item in element `index`
    pub fn get(&self, index: usize) -> Option<&str> {
        self.item(index, 0)
    }

    pub fn get_binary(&self, index: usize) -> Option<&[u8]> {
        self.elements
            .get(index)
            .and_then(|e| e.first())
            .and_then(DataItem::as_binary)
    }

    /// Serialize to wire bytes (ISO-8859-1)
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();

        let h = &self.header;
        out.extend_from_slice(h.kind.as_bytes());
        out.push(GROUP_SEP);
        out.extend_from_slice(h.number.to_string().as_bytes());
        out.push(GROUP_SEP);
        out.extend_from_slice(h.version.to_string().as_bytes());
        if let Some(r) = h.reference {
            out.push(GROUP_SEP);
            out.extend_from_slice(r.to_string().as_bytes());
        }

        // Trailing empty elements are optional on the wire
        let mut elements: &[DataElement] = &self.elements;
        while let Some((last, rest)) = elements.split_last() {
            if last.iter().all(DataItem::is_empty) {
                elements = rest;
            } else {
                break;
            }
        }

        for element in elements {
            out.push(ELEMENT_SEP);
            let mut items: &[DataItem] = element;
            while let Some((last, rest)) = items.split_last() {
                if last.is_empty() && !rest.is_empty() {
                    items = rest;
                } else {
                    break;
                }
            }
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(GROUP_SEP);
                }
                encode_item(item, &mut out);
            }
        }

        out.push(SEGMENT_END);
        out
    }
}

fn encode_item(item: &DataItem, out: &mut Vec<u8>) {
    match item {
        DataItem::Text(s) => {
            for byte in to_latin1(s) {
                if matches!(byte, SEGMENT_END | ELEMENT_SEP | GROUP_SEP | ESCAPE | BINARY_MARK) {
                    out.push(ESCAPE);
                }
                out.push(byte);
            }
        }
        DataItem::Binary(data) => {
            out.push(BINARY_MARK);
            out.extend_from_slice(data.len().to_string().as_bytes());
            out.push(BINARY_MARK);
            out.extend_from_slice(data);
        }
    }
}

/// Characters outside Latin-1 cannot be transmitted and become '?'
pub fn to_latin1(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| if (c as u32) <= 0xFF { c as u32 as u8 } else { b'?' })
        .collect()
}

pub fn from_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Serialize a list of segments back to back
pub fn encode_segments(segments: &[Segment]) -> Vec<u8> {
    segments.iter().flat_map(Segment::encode).collect()
}

// ============================================================================
// PARSER
// ============================================================================

/// Parse wire bytes into segments
pub fn parse_segments(data: &[u8]) -> FintsResult<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut elements: Vec<DataElement> = Vec::new();
    let mut items: DataElement = Vec::new();
    let mut current: Vec<u8> = Vec::new();
    let mut binary: Option<Vec<u8>> = None;

    let mut pos = 0;
    while pos < data.len() {
        let byte = data[pos];
        match byte {
            ESCAPE => {
                let next = data
                    .get(pos + 1)
                    .ok_or_else(|| FintsError::Codec("dangling escape character".to_string()))?;
                current.push(*next);
                pos += 2;
                continue;
            }
            BINARY_MARK if current.is_empty() && binary.is_none() => {
                let (payload, next_pos) = read_binary(data, pos)?;
                binary = Some(payload);
                pos = next_pos;
                continue;
            }
            GROUP_SEP | ELEMENT_SEP | SEGMENT_END => {
                items.push(take_item(&mut current, &mut binary));
                if byte != GROUP_SEP {
                    elements.push(std::mem::take(&mut items));
                }
                if byte == SEGMENT_END {
                    segments.push(build_segment(std::mem::take(&mut elements))?);
                }
            }
            b'\r' | b'\n' if elements.is_empty() && items.is_empty() && current.is_empty() => {
                // Some banks put line breaks between segments
            }
            _ => current.push(byte),
        }
        pos += 1;
    }

    if !current.is_empty() || !items.is_empty() || !elements.is_empty() {
        return Err(FintsError::Codec("data ends inside a segment".to_string()));
    }

    Ok(segments)
}

fn take_item(current: &mut Vec<u8>, binary: &mut Option<Vec<u8>>) -> DataItem {
    match binary.take() {
        Some(b) => {
            current.clear();
            DataItem::Binary(b)
        }
        None => DataItem::Text(from_latin1(&std::mem::take(current))),
    }
}

fn read_binary(data: &[u8], start: usize) -> FintsResult<(Vec<u8>, usize)> {
    let digits_start = start + 1;
    let digits_end = data[digits_start..]
        .iter()
        .position(|&b| b == BINARY_MARK)
        .map(|p| digits_start + p)
        .ok_or_else(|| FintsError::Codec("unterminated binary length".to_string()))?;

    let len: usize = std::str::from_utf8(&data[digits_start..digits_end])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| FintsError::Codec("invalid binary length".to_string()))?;

    let payload_start = digits_end + 1;
    let payload_end = payload_start
        .checked_add(len)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| {
            FintsError::Codec(format!("binary length {} exceeds remaining data", len))
        })?;

    Ok((data[payload_start..payload_end].to_vec(), payload_end))
}

fn build_segment(mut elements: Vec<DataElement>) -> FintsResult<Segment> {
    if elements.is_empty() {
        return Err(FintsError::Codec("empty segment".to_string()));
    }
    let header = elements.remove(0);
    let text = |i: usize| header.get(i).and_then(DataItem::as_text).unwrap_or("");

    let kind = text(0).to_string();
    if kind.is_empty() {
        return Err(FintsError::Codec("segment without type".to_string()));
    }
    let number = text(1)
        .parse()
        .map_err(|_| FintsError::Codec(format!("bad segment number in {}", kind)))?;
    let version = text(2)
        .parse()
        .map_err(|_| FintsError::Codec(format!("bad segment version in {}", kind)))?;
    let reference = text(3).parse().ok();

    Ok(Segment {
        header: SegmentHeader {
            kind,
            number,
            version,
            reference,
        },
        elements,
    })
}

// ============================================================================
// TESTS
// ============================================================================
