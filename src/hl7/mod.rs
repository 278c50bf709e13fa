//! HL7 v2 segment/field parsing and message classification.
//!
//! Message shapes are small and fixed (PAS-admit, PAS-discharge, LIMS-result), so
//! segments are scanned by hand rather than through a general HL7 grammar crate —
//! the same manual-split idiom the wire-layer's sibling MLLP framing code uses.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Utc};

use crate::error::HlSevenError;

/// HL7 segment separator.
pub const SEGMENT_SEPARATOR: char = '\r';
/// HL7 field separator.
pub const FIELD_SEPARATOR: char = '|';

/// A classified, field-extracted HL7 message.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedMessage {
    PasAdmit {
        mrn: String,
        age: i32,
        sex: char,
    },
    PasDischarge {
        mrn: String,
    },
    LimsResult {
        mrn: String,
        observed_at: NaiveDateTime,
        result: f64,
    },
}

/// Splits a raw HL7 payload into its non-empty segment lines.
fn segments(payload: &str) -> Vec<&str> {
    payload
        .split(SEGMENT_SEPARATOR)
        .map(|line| line.trim_end_matches('\n'))
        .filter(|line| !line.is_empty())
        .collect()
}

fn fields(segment: &str) -> Vec<&str> {
    segment.split(FIELD_SEPARATOR).collect()
}

/// Classifies and parses a complete HL7 payload (segments joined by `\r`) into one of
/// `PasAdmit`, `PasDischarge`, or `LimsResult`.
///
/// Classification rule (grounded on the upstream reference's `parse_system_message`):
/// a message with fewer than 4 segments is PAS (admit or discharge); the PID segment's
/// field count decides which. A message with 4 or more segments is a LIMS result and
/// must carry PID, OBR, and OBX segments.
pub fn classify_and_parse(payload: &str) -> Result<ParsedMessage, HlSevenError> {
    if payload.trim().is_empty() {
        return Err(HlSevenError::EmptyMessage);
    }

    let segs = segments(payload);
    if segs.len() < 2 {
        return Err(HlSevenError::MalformedSegment(
            "message has no PID segment".to_string(),
        ));
    }

    if segs.len() < 4 {
        let pid = fields(segs[1]);
        if pid.len() > 4 {
            parse_pas_admit(&pid)
        } else {
            parse_pas_discharge(&pid)
        }
    } else {
        let pid = fields(segs[1]);
        let obr = fields(segs[2]);
        let obx = fields(segs[3]);
        parse_lims_result(&pid, &obr, &obx)
    }
}

fn parse_pas_admit(pid: &[&str]) -> Result<ParsedMessage, HlSevenError> {
    let mrn = pid
        .get(3)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HlSevenError::InvalidField {
            segment: "PID",
            field: "3",
            value: String::new(),
        })?
        .to_string();

    let dob = pid.get(7).copied().unwrap_or("");
    let age = calculate_age(dob).ok_or_else(|| HlSevenError::InvalidField {
        segment: "PID",
        field: "7",
        value: dob.to_string(),
    })?;

    let sex = pid
        .get(8)
        .and_then(|s| s.chars().next())
        .ok_or_else(|| HlSevenError::InvalidField {
            segment: "PID",
            field: "8",
            value: String::new(),
        })?;

    Ok(ParsedMessage::PasAdmit { mrn, age, sex })
}

fn parse_pas_discharge(pid: &[&str]) -> Result<ParsedMessage, HlSevenError> {
    let mrn = pid
        .get(3)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HlSevenError::InvalidField {
            segment: "PID",
            field: "3",
            value: String::new(),
        })?
        .to_string();

    Ok(ParsedMessage::PasDischarge { mrn })
}

fn parse_lims_result(
    pid: &[&str],
    obr: &[&str],
    obx: &[&str],
) -> Result<ParsedMessage, HlSevenError> {
    let mrn = pid
        .get(3)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HlSevenError::InvalidField {
            segment: "PID",
            field: "3",
            value: String::new(),
        })?
        .to_string();

    let observed_raw = obr.get(7).copied().unwrap_or("");
    let observed_at = parse_hl7_datetime(observed_raw).ok_or_else(|| HlSevenError::InvalidField {
        segment: "OBR",
        field: "7",
        value: observed_raw.to_string(),
    })?;

    let result_raw = obx.get(5).copied().unwrap_or("");
    let result: f64 = result_raw
        .parse()
        .map_err(|_| HlSevenError::InvalidField {
            segment: "OBX",
            field: "5",
            value: result_raw.to_string(),
        })?;

    Ok(ParsedMessage::LimsResult {
        mrn,
        observed_at,
        result,
    })
}

/// Civil-age calculation against the current wall-clock date, per §4.2.
fn calculate_age(date_of_birth: &str) -> Option<i32> {
    let dob = NaiveDate::parse_from_str(date_of_birth, "%Y%m%d").ok()?;
    let today = Utc::now().date_naive();
    let mut age = today.year() - dob.year();
    if (today.month(), today.day()) < (dob.month(), dob.day()) {
        age -= 1;
    }
    Some(age)
}

/// Parses the observation datetime field, which in this feed is `YYYYMMDDHHMMSS` or,
/// for backfilled history rows, `YYYY-MM-DD HH:MM:SS`.
pub fn parse_hl7_datetime(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y%m%d%H%M%S") {
        return Some(dt);
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").ok()
}

/// Builds the HL7 application-accept acknowledgement, framed ready for MLLP send.
pub fn build_ack() -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
    format!("MSH|^~\\&|||||{}||ACK||P|2.5\rMSA|AA|\r", timestamp)
}
