//! NMEA-0183 sentence framing, checksum validation, and dispatch to the
//! typed sentence parsers in [`sentences`].
//!
//! Frame grammar: `$` or `!`, a 5-character talker+sentence identifier,
//! comma-delimited fields, `*`, two hex checksum digits, `\r\n`. The
//! checksum is the XOR of every byte between `$`/`!` (exclusive) and `*`
//! (exclusive).

pub mod sentences;

use thiserror::Error;

use crate::message::Message;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum NmeaError {
    #[error("checksum mismatch: sentence claims {claimed:02X}, computed {computed:02X}")]
    ChecksumMismatch { claimed: u8, computed: u8 },
    #[error("malformed NMEA frame: {0}")]
    FramingError(String),
}

/// XOR of every byte in `bytes`, i.e. the NMEA checksum algorithm.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// One decoded NMEA line: its 5-character identifier, comma-delimited
/// field slice, and the whole line (sans `\r\n`) for verbatim round-trip.
pub struct Frame<'a> {
    pub identifier: &'a str,
    pub fields: Vec<&'a str>,
    pub raw: &'a str,
}

/// Strip an optional trailing `\r`/`\n`, validate framing and checksum,
/// and split the sentence into its identifier and fields.
pub fn parse_frame(line: &str) -> Result<Frame<'_>, NmeaError> {
    let line = line.trim_end_matches(['\r', '\n']);

    if !line.starts_with('$') && !line.starts_with('!') {
        return Err(NmeaError::FramingError(format!(
            "sentence does not start with '$' or '!': {line}"
        )));
    }

    let star = line.rfind('*').ok_or_else(|| {
        NmeaError::FramingError(format!("no checksum delimiter '*': {line}"))
    })?;
    let body = &line[1..star];
    let claimed_hex = line.get(star + 1..star + 3).ok_or_else(|| {
        NmeaError::FramingError(format!("truncated checksum: {line}"))
    })?;
    let claimed = u8::from_str_radix(claimed_hex, 16).map_err(|_| {
        NmeaError::FramingError(format!("non-hex checksum: {claimed_hex}"))
    })?;

    let computed = checksum(body.as_bytes());
    if computed != claimed {
        return Err(NmeaError::ChecksumMismatch { claimed, computed });
    }

    let mut parts = body.split(',');
    let identifier = parts.next().ok_or_else(|| {
        NmeaError::FramingError("empty sentence".to_string())
    })?;
    if identifier.len() != 5 {
        return Err(NmeaError::FramingError(format!(
            "identifier {identifier:?} is not 5 characters"
        )));
    }

    Ok(Frame {
        identifier,
        fields: parts.collect(),
        raw: line,
    })
}

/// Decode one line into zero or more [`Message`]s. A sentence that
/// bundles several readings (RMC carries a fix, a ground track and a
/// timestamp at once) yields one message per reading, in a fixed order
/// so that FIFO-preserving observers (e.g. [`crate::message::Enqueued`]
/// queues) see `Date` immediately before the `GmtTime` it belongs to.
/// Unknown identifiers round-trip as a single [`Message::RawNmeaLine`].
pub fn decode_line(line: &str) -> Result<Vec<Message>, NmeaError> {
    let frame = parse_frame(line)?;
    let sentence_id = &frame.identifier[2..];

    // A recognized identifier may legitimately yield zero messages (e.g.
    // a void RMC fix); only a genuinely unrecognized identifier falls
    // back to a verbatim RawNmeaLine.
    let messages = match sentence_id {
        "RMC" => sentences::parse_rmc(&frame.fields).unwrap_or_default(),
        "VHW" => sentences::parse_vhw(&frame.fields).unwrap_or_default(),
        "DBT" => sentences::parse_dbt(&frame.fields).unwrap_or_default(),
        "MTW" => sentences::parse_mtw(&frame.fields).unwrap_or_default(),
        "MWV" => sentences::parse_mwv(&frame.fields).unwrap_or_default(),
        _ => vec![Message::RawNmeaLine {
            bytes: frame.raw.to_string(),
        }],
    };

    Ok(messages)
}

/// Build a checksummed `$TTSSS,...*HH\r\n` line from `fields`.
pub fn build_line(talker_sentence: &str, fields: &[String]) -> String {
    let body = format!("{talker_sentence},{}", fields.join(","));
    let sum = checksum(body.as_bytes());
    format!("${body}*{sum:02X}\r\n")
}

/// Encode a typed [`Message`] for a given talker ID (e.g. `"II"`),
/// or fall back to the verbatim bytes of a [`Message::RawNmeaLine`].
/// Returns `None` for variants with no NMEA representation.
pub fn encode(message: &Message, talker: &str) -> Option<String> {
    match message {
        Message::RawNmeaLine { bytes } => {
            Some(format!("{}\r\n", bytes.trim_end_matches(['\r', '\n'])))
        }
        _ => sentences::encode(message, talker),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn checksum_matches_known_sentence() {
        // $GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A
        let body = "GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W";
        assert_eq!(checksum(body.as_bytes()), 0x6A);
    }

    #[test]
    fn rejects_mutated_checksum() {
        let line = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6B\r\n";
        let err = decode_line(line).unwrap_err();
        assert!(matches!(err, NmeaError::ChecksumMismatch { .. }));
    }

    #[test]
    fn rejects_missing_dollar() {
        let line = "GPRMC,123519*00\r\n";
        assert!(matches!(
            decode_line(line),
            Err(NmeaError::FramingError(_))
        ));
    }

    #[test]
    fn unknown_sentence_round_trips_raw() {
        let line = "$GPGSV,1,1,00*79\r\n";
        let decoded = decode_line(line).unwrap();
        assert_eq!(decoded.len(), 1);
        match &decoded[0] {
            Message::RawNmeaLine { bytes } => {
                assert_eq!(bytes, "$GPGSV,1,1,00*79")
            }
            _ => panic!("expected RawNmeaLine"),
        }
        assert_eq!(encode(&decoded[0], "II").unwrap(), line);
    }
}
