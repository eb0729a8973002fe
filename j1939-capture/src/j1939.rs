//! J1939 identifier decoding
//!
//! J1939 packs addressing and priority into the 29-bit extended CAN identifier:
//!
//! | Bits  | Field                                   |
//! |-------|-----------------------------------------|
//! | 26-28 | Priority                                |
//! | 8-25  | PGN (Parameter Group Number, 18 bits)   |
//! | 16-23 | PDU format (part of the PGN)            |
//! | 8-15  | PDU specific (destination when PDU1)    |
//! | 0-7   | Source address                          |
//!
//! PDU format values below 240 (PDU1) are destination-specific and carry the
//! destination in the PDU specific byte. Values of 240 and above (PDU2) are
//! broadcast, reported with the global address 255.

use crate::types::{CaptureError, DecodedIdentifier, Result, EXTENDED_ID_MASK};
use std::str::FromStr;

/// Global (broadcast) destination address
pub const BROADCAST_ADDRESS: u8 = 255;

/// First PDU format value of the PDU2 (broadcast) range
pub const PDU2_THRESHOLD: u8 = 240;

/// Mask of the 18-bit PGN once shifted down
pub const PGN_MASK: u32 = 0x3FFFF;

/// Decode the J1939 fields of an arbitration ID
///
/// Standard (11-bit) identifiers carry no J1939 fields, so every field is
/// absent. Any input is accepted for extended identifiers; bits above 28 are
/// ignored.
pub fn decode(arbitration_id: u32, is_extended: bool) -> DecodedIdentifier {
    if !is_extended {
        return DecodedIdentifier::ABSENT;
    }

    let id = arbitration_id & EXTENDED_ID_MASK;
    let destination = if is_pdu1(id) {
        ((id >> 8) & 0xFF) as u8
    } else {
        BROADCAST_ADDRESS
    };

    DecodedIdentifier {
        priority: Some(((id >> 26) & 0x7) as u8),
        pgn: Some((id >> 8) & PGN_MASK),
        source: Some((id & 0xFF) as u8),
        destination: Some(destination),
    }
}

/// PDU format byte (bits 16-23)
pub fn pdu_format(arbitration_id: u32) -> u8 {
    ((arbitration_id >> 16) & 0xFF) as u8
}

/// True if the identifier uses the destination-specific PDU1 format
pub fn is_pdu1(arbitration_id: u32) -> bool {
    pdu_format(arbitration_id) < PDU2_THRESHOLD
}

/// A single J1939 identifier field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Priority,
    Pgn,
    Source,
    Destination,
}

impl FromStr for Field {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "priority" | "prio" => Ok(Field::Priority),
            "pgn" => Ok(Field::Pgn),
            "src" | "source" => Ok(Field::Source),
            "dest" | "dst" | "destination" => Ok(Field::Destination),
            _ => Err(CaptureError::UnknownField(s.to_string())),
        }
    }
}

/// Extract a single field from an extended identifier
///
/// Convenience for stream consumers that only need one value, e.g. filtering
/// by source address.
pub fn field(arbitration_id: u32, field: Field) -> u32 {
    let decoded = decode(arbitration_id, true);
    let value = match field {
        Field::Priority => decoded.priority.map(u32::from),
        Field::Pgn => decoded.pgn,
        Field::Source => decoded.source.map(u32::from),
        Field::Destination => decoded.destination.map(u32::from),
    };
    // Extended decoding always yields every field
    value.unwrap_or_default()
}
