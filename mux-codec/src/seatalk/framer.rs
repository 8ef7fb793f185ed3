//! Resolving *where* a Seatalk datagram starts in a raw byte stream.
//!
//! Mirrors the escape-byte resync loop `rs1090::source::beast::next_msg`
//! uses for Beast frames: bytes accumulate in a buffer across reads, and
//! on every push we try to carve complete datagrams out of the front of
//! the buffer, dropping bytes one at a time when framing fails instead
//! of blocking forever on a corrupt stream.

use crate::message::Message;
use crate::seatalk::{declared_len, is_known_id};

/// Parity bit observed on one received byte, when the transport surfaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    Mark,
    Space,
    /// The transport reported a framing/parity error on this byte.
    Error,
}

/// Resyncing framer for transports that surface per-byte parity
/// (`SeatalkSerial`). The command byte is the one with mark parity;
/// every following byte must carry space parity for the expected
/// datagram length.
#[derive(Debug, Default)]
pub struct ParityAwareFramer {
    bytes: Vec<u8>,
    parity: Vec<Parity>,
    /// Bytes dropped while resyncing after a parity error or a
    /// mark-parity byte in an unexpected position.
    pub discarded: u64,
}

impl ParityAwareFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly-received bytes (with their parity bits) and drain as
    /// many complete datagrams as the buffer now contains.
    pub fn push(&mut self, bytes: &[u8], parity: &[Parity]) -> Vec<Message> {
        self.bytes.extend_from_slice(bytes);
        self.parity.extend_from_slice(parity);

        let mut out = Vec::new();
        loop {
            // Find the next byte with mark parity; anything before it is
            // not a valid command byte and is discarded.
            let Some(start) = self.parity.iter().position(|p| *p == Parity::Mark) else {
                self.discarded += self.bytes.len() as u64;
                self.bytes.clear();
                self.parity.clear();
                break;
            };
            if start > 0 {
                self.discarded += start as u64;
                self.bytes.drain(0..start);
                self.parity.drain(0..start);
            }

            if self.bytes.len() < 2 {
                break; // wait for more bytes before judging length
            }
            let total_len = declared_len(self.bytes[1]);
            if self.bytes.len() < total_len {
                break; // datagram not fully received yet
            }

            // Every payload byte after the command must carry space parity.
            let payload_ok = self.parity[1..total_len]
                .iter()
                .all(|p| *p == Parity::Space);
            if !payload_ok || !is_known_id(self.bytes[0]) {
                // Resync: drop just the command byte and look for the next
                // mark-parity anchor.
                self.discarded += 1;
                self.bytes.remove(0);
                self.parity.remove(0);
                continue;
            }

            match super::decode(&self.bytes[..total_len]) {
                Ok((message, consumed)) => {
                    out.push(message);
                    self.bytes.drain(0..consumed);
                    self.parity.drain(0..consumed);
                }
                Err(_) => {
                    self.discarded += 1;
                    self.bytes.remove(0);
                    self.parity.remove(0);
                }
            }
        }
        out
    }
}

/// Framer for transports that cannot surface per-byte parity (`Serial`
/// without `PARMRK`). Guesses the command byte by attempting a parse at
/// every offset and accepting the first one whose declared length yields
/// a known command ID *and* whose trailing bytes also parse as a
/// plausible next datagram (one-datagram lookahead), per the spec's
/// ambiguity-resolution rule.
#[derive(Debug, Default)]
pub struct HeuristicFramer {
    bytes: Vec<u8>,
    /// Bytes advanced past while disambiguating a candidate start.
    pub discarded: u64,
}

impl HeuristicFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<Message> {
        self.bytes.extend_from_slice(bytes);

        let mut out = Vec::new();
        'outer: loop {
            if self.bytes.len() < 2 {
                break;
            }
            if !is_known_id(self.bytes[0]) {
                self.discarded += 1;
                self.bytes.remove(0);
                continue;
            }
            let total_len = declared_len(self.bytes[1]);
            if self.bytes.len() < total_len {
                break; // may yet be valid once more bytes arrive
            }

            let Ok((message, consumed)) = super::decode(&self.bytes[..total_len]) else {
                self.discarded += 1;
                self.bytes.remove(0);
                continue;
            };

            // One-datagram lookahead: if there are enough trailing bytes
            // to judge the next datagram and they don't parse, this
            // candidate was probably a false positive inside the stream.
            let rest = &self.bytes[consumed..];
            if rest.len() >= 2 {
                let next_len = declared_len(rest[1]);
                if rest.len() >= next_len
                    && (!is_known_id(rest[0]) || super::decode(&rest[..next_len]).is_err())
                {
                    self.discarded += 1;
                    self.bytes.remove(0);
                    continue 'outer;
                }
            }

            out.push(message);
            self.bytes.drain(0..consumed);
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn valid_depth() -> Vec<u8> {
        vec![0x00, 0x02, 0x00, 0x64, 0x00]
    }

    #[test]
    fn parity_aware_resyncs_around_prefix_and_suffix() {
        let prefix = [0xAA, 0xBB, 0xCC];
        let datagram = valid_depth();
        let suffix = [0x01, 0x02];

        let mut bytes = Vec::new();
        let mut parity = Vec::new();
        for &b in &prefix {
            bytes.push(b);
            parity.push(Parity::Space);
        }
        bytes.extend_from_slice(&datagram);
        parity.push(Parity::Mark);
        parity.extend(std::iter::repeat_n(Parity::Space, datagram.len() - 1));
        for &b in &suffix {
            bytes.push(b);
            parity.push(Parity::Space);
        }

        let mut framer = ParityAwareFramer::new();
        let messages = framer.push(&bytes, &parity);
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0],
            Message::DepthBelowTransducer { meters: 3.048 }
        );
    }

    #[test]
    fn heuristic_finds_at_least_the_embedded_datagram() {
        let mut bytes = vec![0x10, 0x20]; // plausible-looking noise
        bytes.extend_from_slice(&valid_depth());
        let mut framer = HeuristicFramer::new();
        let messages = framer.push(&bytes);
        assert!(messages.contains(&Message::DepthBelowTransducer { meters: 3.048 }));
    }

    #[test]
    fn heuristic_splits_two_back_to_back_datagrams() {
        let mut bytes = valid_depth();
        bytes.extend_from_slice(&valid_depth());
        let mut framer = HeuristicFramer::new();
        let messages = framer.push(&bytes);
        assert_eq!(messages.len(), 2);
    }
}
