use std::collections::BTreeSet;

use super::classify::DeviceClassifier;
use super::types::*;
use super::{ProtocolError, Result};

pub const SINGLE_RESPONSE_LEN: usize = 24;
pub const QUAD_RESPONSE_LEN: usize = 24;
pub const OCTAL_MIN_RESPONSE_LEN: usize = 18;

/// Tag in front of a scan list, the firmware spells it with Cyrillic or Latin letters
const SCAN_LIST_TAGS: [&str; 2] = ["МОК_SCAN:", "MOK_SCAN:"];

/// Raw inbound data as delivered by the transport or a test
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    Text(&'a str),
    Bytes(&'a [u8]),
}

impl<'a> From<&'a str> for Payload<'a> {
    fn from(text: &'a str) -> Self {
        Payload::Text(text)
    }
}

impl<'a> From<&'a String> for Payload<'a> {
    fn from(text: &'a String) -> Self {
        Payload::Text(text.as_str())
    }
}

impl<'a> From<&'a [u8]> for Payload<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Payload::Bytes(bytes)
    }
}

impl<'a> From<&'a Vec<u8>> for Payload<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        Payload::Bytes(bytes.as_slice())
    }
}

impl Payload<'_> {
    /// Original line for error reporting
    pub fn describe(&self) -> String {
        match self {
            Payload::Text(text) => text.to_string(),
            Payload::Bytes(bytes) => hex::encode(bytes),
        }
    }

    /// Normalize into bytes.
    ///
    /// Text is first stripped of whitespace, `-` and `:` and decoded as one
    /// continuous hex string. When that fails each whitespace separated token
    /// is parsed as a hex byte on its own.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let text = match self {
            Payload::Bytes(bytes) => return Ok(bytes.to_vec()),
            Payload::Text(text) => *text,
        };

        let compact: String = text
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != ':')
            .collect::<String>()
            .to_uppercase();
        if !compact.is_empty() && compact.chars().all(|c| c.is_ascii_hexdigit()) {
            if let Ok(bytes) = hex::decode(&compact) {
                return Ok(bytes);
            }
        }

        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.is_empty() {
            return Err(ProtocolError::malformed(text, "empty payload"));
        }
        tokens
            .iter()
            .map(|token| {
                u8::from_str_radix(token, 16).map_err(|_| {
                    ProtocolError::malformed(text, format!("'{}' is not a hex byte", token))
                })
            })
            .collect()
    }
}

/// How out-of-range device addresses in a response are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressPolicy {
    /// Reject the whole response
    Strict,
    /// Keep the response and report a warning
    Lenient,
}

impl AddressPolicy {
    pub fn for_kind(kind: RangeKind) -> Self {
        match kind {
            RangeKind::Single => AddressPolicy::Strict,
            RangeKind::Octal => AddressPolicy::Lenient,
            // Follows AM8. PM strictness is disputed: the response and error
            // rules say reject, the PM decoder rule says warn. See DESIGN.md.
            RangeKind::Quad => AddressPolicy::Lenient,
        }
    }

    fn check(&self, addresses: &[u8], line: &str) -> Result<Vec<String>> {
        let mut warnings = Vec::new();
        for (channel, address) in addresses.iter().enumerate() {
            if (DEVICE_ADDRESS_MIN..=DEVICE_ADDRESS_MAX).contains(address) {
                continue;
            }
            let message = format!(
                "channel {} reports address {} outside {}..={}",
                channel + 1,
                address,
                DEVICE_ADDRESS_MIN,
                DEVICE_ADDRESS_MAX
            );
            match self {
                AddressPolicy::Strict => return Err(ProtocolError::malformed(line, message)),
                AddressPolicy::Lenient => {
                    log::warn!("{} in '{}'", message, line);
                    warnings.push(message);
                }
            }
        }
        Ok(warnings)
    }
}

fn expect_len(bytes: &[u8], len: usize, line: &str) -> Result<()> {
    if bytes.len() != len {
        return Err(ProtocolError::malformed(
            line,
            format!("expected {} bytes, got {}", len, bytes.len()),
        ));
    }
    Ok(())
}

/// Decode an AM1 status response (exactly 24 bytes).
pub fn decode_single<'a>(input: impl Into<Payload<'a>>) -> Result<SingleRecord> {
    let payload = input.into();
    let line = payload.describe();
    let bytes = payload.to_bytes()?;
    expect_len(&bytes, SINGLE_RESPONSE_LEN, &line)?;
    AddressPolicy::for_kind(RangeKind::Single).check(&bytes[..1], &line)?;

    Ok(SingleRecord {
        address: bytes[0],
        power_status: bytes[1],
        input_status: bytes[2],
        payload: bytes[3..].to_vec(),
    })
}

/// Decode an AM8 status response (at least 18 bytes).
pub fn decode_octal<'a>(input: impl Into<Payload<'a>>) -> Result<OctalRecord> {
    let payload = input.into();
    let line = payload.describe();
    let bytes = payload.to_bytes()?;
    if bytes.len() < OCTAL_MIN_RESPONSE_LEN {
        return Err(ProtocolError::malformed(
            &line,
            format!("expected at least {} bytes, got {}", OCTAL_MIN_RESPONSE_LEN, bytes.len()),
        ));
    }

    let mut addresses = [0u8; 8];
    addresses.copy_from_slice(&bytes[0..8]);
    let mut inputs = [0u8; 9];
    inputs.copy_from_slice(&bytes[9..18]);
    let warnings = AddressPolicy::for_kind(RangeKind::Octal).check(&addresses, &line)?;

    Ok(OctalRecord {
        addresses,
        power_status: bytes[8],
        inputs,
        warnings,
    })
}

/// Decode a PM status response (exactly 24 bytes, 9..24 reserved).
pub fn decode_quad<'a>(input: impl Into<Payload<'a>>) -> Result<QuadRecord> {
    let payload = input.into();
    let line = payload.describe();
    let bytes = payload.to_bytes()?;
    expect_len(&bytes, QUAD_RESPONSE_LEN, &line)?;

    let mut addresses = [0u8; 4];
    addresses.copy_from_slice(&bytes[0..4]);
    let mut relay_statuses = [0u8; 4];
    relay_statuses.copy_from_slice(&bytes[5..9]);
    let warnings = AddressPolicy::for_kind(RangeKind::Quad).check(&addresses, &line)?;

    Ok(QuadRecord {
        addresses,
        power_status: bytes[4],
        relay_statuses,
        warnings,
    })
}

/// Decode the terminal scan list.
///
/// Accepts `МОК_SCAN:1,2,5` (either tag spelling), a bare `1,2,5` or a
/// single bare number. Addresses outside 1..=127 are dropped. An empty
/// result means the line is not a scan list.
pub fn decode_scan_list(line: &str) -> Vec<u8> {
    let line = line.trim();
    let tagged = SCAN_LIST_TAGS.iter().find_map(|tag| line.strip_prefix(tag));

    let values: Vec<u32> = match tagged {
        Some(body) => body
            .split(',')
            .filter_map(|token| token.trim().parse().ok())
            .collect(),
        None => {
            let parsed: std::result::Result<Vec<u32>, _> =
                line.split(',').map(|token| token.trim().parse::<u32>()).collect();
            match parsed {
                Ok(values) => values,
                Err(_) => return Vec::new(),
            }
        }
    };

    values
        .into_iter()
        .filter(|value| (DEVICE_ADDRESS_MIN as u32..=SCAN_ADDRESS_MAX as u32).contains(value))
        .map(|value| value as u8)
        .collect::<BTreeSet<u8>>()
        .into_iter()
        .collect()
}

/// Best effort decode of a single device identification line.
///
/// `12:AM8` reads the address before the colon and classifies the rest,
/// otherwise the first number in the line is the address and the whole
/// line is classified. Returns `None` when no usable address is found.
pub fn decode_scan_detail(line: &str, classifier: &dyn DeviceClassifier) -> Option<ScanDetail> {
    let line = line.trim();
    let (address, info) = match line.split_once(':') {
        Some((prefix, rest)) => (prefix.trim().parse::<u32>().ok()?, rest.trim()),
        None => (first_number(line)?, line),
    };
    if !(DEVICE_ADDRESS_MIN as u32..=SCAN_ADDRESS_MAX as u32).contains(&address) {
        return None;
    }

    Some(ScanDetail {
        address: address as u8,
        device_type: classifier.classify(info),
    })
}

fn first_number(line: &str) -> Option<u32> {
    let start = line.find(|c: char| c.is_ascii_digit())?;
    let digits: String = line[start..].chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
