//! Serial transports backed by `tokio-serial`.
//!
//! `SeatalkSerial` is Seatalk's native wire: 4800 baud, 1 start bit, 8
//! data bits, 1 stop bit, and a 9th ("mark") bit on the command byte of
//! every datagram that distinguishes it from the ("space") data bytes
//! that follow. On Linux this is surfaced with the standard `PARMRK`
//! trick: the port is configured for stick space parity (`CMSPAR` +
//! `PARODD` clear), so a command byte's mark bit reads as a parity
//! error, and `PARMRK`+`INPCK` make the kernel prefix that byte with
//! `\377\0` in the raw stream so it can be told apart in software. Off
//! Linux (no `CMSPAR`) the transport still works but reports
//! `parity: None`, and devices fall back to
//! [`crate::seatalk::framer::HeuristicFramer`], per the spec's
//! documented fallback for transports that cannot report parity.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{DataBits, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::warn;

use super::{Parity, ReadResult, Transport, TransportError};

pub use tokio_serial::Parity as WireParity;

const READ_BUF_SIZE: usize = 1024;

pub struct SerialConfig {
    pub port: String,
    pub baud: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: WireParity,
}

impl SerialConfig {
    pub fn seatalk(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud: 4800,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: WireParity::None,
        }
    }

    pub fn nmea(port: impl Into<String>, baud: u32) -> Self {
        Self {
            port: port.into(),
            baud,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: WireParity::None,
        }
    }
}

pub struct Serial {
    config: SerialConfig,
    stream: Option<SerialStream>,
}

impl Serial {
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }
}

#[async_trait::async_trait]
impl Transport for Serial {
    async fn open(&mut self) -> Result<(), TransportError> {
        let stream = tokio_serial::new(&self.config.port, self.config.baud)
            .data_bits(self.config.data_bits)
            .stop_bits(self.config.stop_bits)
            .parity(self.config.parity)
            .open_native_async()
            .map_err(|e| TransportError::Io(std::io::Error::other(e)))?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn close(&mut self) {
        self.stream = None;
    }

    async fn read(&mut self) -> Result<ReadResult, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        let mut buf = vec![0u8; READ_BUF_SIZE];
        let n = stream.read(&mut buf).await?;
        buf.truncate(n);
        Ok(ReadResult {
            bytes: buf,
            parity: None,
        })
    }

    async fn write(
        &mut self,
        bytes: &[u8],
        _parity: Option<&[Parity]>,
    ) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        stream.write_all(bytes).await?;
        Ok(bytes.len())
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        if let Some(stream) = self.stream.as_mut() {
            stream.flush().await?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum EscapeState {
    Normal,
    SawFf,
    SawFfZero,
}

pub struct SeatalkSerial {
    port: String,
    baud: u32,
    stream: Option<SerialStream>,
    parmrk_enabled: bool,
    escape_state: EscapeState,
}

impl SeatalkSerial {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud: 4800,
            stream: None,
            parmrk_enabled: false,
            escape_state: EscapeState::Normal,
        }
    }

    /// Decode one chunk of raw PARMRK-escaped bytes into (byte, parity)
    /// pairs, carrying any in-progress `\377`/`\377\0` escape sequence
    /// across calls since a read can split one in half.
    fn decode_parmrk(&mut self, raw: &[u8]) -> (Vec<u8>, Vec<Parity>) {
        let mut bytes = Vec::with_capacity(raw.len());
        let mut parity = Vec::with_capacity(raw.len());
        for &b in raw {
            match self.escape_state {
                EscapeState::Normal => {
                    if b == 0xFF {
                        self.escape_state = EscapeState::SawFf;
                    } else {
                        bytes.push(b);
                        parity.push(Parity::Space);
                    }
                }
                EscapeState::SawFf => {
                    if b == 0x00 {
                        self.escape_state = EscapeState::SawFfZero;
                    } else if b == 0xFF {
                        // an escaped literal 0xFF with no parity error
                        bytes.push(0xFF);
                        parity.push(Parity::Space);
                        self.escape_state = EscapeState::Normal;
                    } else {
                        // malformed escape (should only ever be \0 or \377
                        // after \377); drop the marker and treat `b` as
                        // ordinary data rather than losing it.
                        bytes.push(b);
                        parity.push(Parity::Space);
                        self.escape_state = EscapeState::Normal;
                    }
                }
                EscapeState::SawFfZero => {
                    // the byte the UART flagged as a parity error: the
                    // Seatalk command byte's mark bit.
                    bytes.push(b);
                    parity.push(Parity::Mark);
                    self.escape_state = EscapeState::Normal;
                }
            }
        }
        (bytes, parity)
    }
}

#[async_trait::async_trait]
impl Transport for SeatalkSerial {
    async fn open(&mut self) -> Result<(), TransportError> {
        let stream = tokio_serial::new(&self.port, self.baud)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(WireParity::None)
            .open_native_async()
            .map_err(|e| TransportError::Io(std::io::Error::other(e)))?;
        self.parmrk_enabled = match parmrk::enable(&stream) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "PARMRK parity marking unavailable; falling back to heuristic framing");
                false
            }
        };
        self.escape_state = EscapeState::Normal;
        self.stream = Some(stream);
        Ok(())
    }

    async fn close(&mut self) {
        self.stream = None;
    }

    async fn read(&mut self) -> Result<ReadResult, TransportError> {
        loop {
            let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
            let mut buf = vec![0u8; READ_BUF_SIZE];
            let n = stream.read(&mut buf).await?;
            buf.truncate(n);

            if !self.parmrk_enabled {
                return Ok(ReadResult {
                    bytes: buf,
                    parity: None,
                });
            }

            let (bytes, parity) = self.decode_parmrk(&buf);
            if !bytes.is_empty() {
                return Ok(ReadResult {
                    bytes,
                    parity: Some(parity),
                });
            }
            // The whole chunk was (part of) an escape sequence; wait for
            // the byte it's marking to actually arrive.
        }
    }

    async fn write(
        &mut self,
        bytes: &[u8],
        _parity: Option<&[Parity]>,
    ) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        stream.write_all(bytes).await?;
        Ok(bytes.len())
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        if let Some(stream) = self.stream.as_mut() {
            stream.flush().await?;
        }
        Ok(())
    }
}

/// Convenience constructor: a transport pre-configured for Seatalk's
/// fixed 4800-8-N-1 wire parameters with PARMRK parity surfacing.
pub fn seatalk_serial(port: impl Into<String>) -> SeatalkSerial {
    SeatalkSerial::new(port)
}

#[cfg(target_os = "linux")]
mod parmrk {
    use std::os::fd::{AsFd, AsRawFd, BorrowedFd};

    use nix::sys::termios::{self, ControlFlags, InputFlags, SetArg};
    use tokio_serial::SerialStream;

    /// Reconfigure the port for stick space parity (`CMSPAR`, `PARODD`
    /// clear) with `INPCK`+`PARMRK` so a mark-parity byte shows up as a
    /// parity error the kernel escapes with `\377\0` in the raw stream.
    pub fn enable(stream: &SerialStream) -> nix::Result<()> {
        let fd: BorrowedFd = unsafe { BorrowedFd::borrow_raw(stream.as_raw_fd()) };
        let mut tio = termios::tcgetattr(fd.as_fd())?;

        tio.control_flags.insert(ControlFlags::PARENB | ControlFlags::CMSPAR);
        tio.control_flags.remove(ControlFlags::PARODD);
        tio.input_flags.insert(InputFlags::INPCK | InputFlags::PARMRK);
        tio.input_flags.remove(InputFlags::IGNPAR | InputFlags::ISTRIP);

        termios::tcsetattr(fd.as_fd(), SetArg::TCSANOW, &tio)
    }
}

#[cfg(not(target_os = "linux"))]
mod parmrk {
    pub fn enable(_stream: &tokio_serial::SerialStream) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "PARMRK parity marking (CMSPAR) is Linux-only",
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn decoder() -> SeatalkSerial {
        let mut serial = SeatalkSerial::new("/dev/null");
        serial.parmrk_enabled = true;
        serial
    }

    #[test]
    fn plain_bytes_decode_as_space_parity() {
        let mut serial = decoder();
        let (bytes, parity) = serial.decode_parmrk(&[0x01, 0x02]);
        assert_eq!(bytes, vec![0x01, 0x02]);
        assert_eq!(parity, vec![Parity::Space, Parity::Space]);
    }

    #[test]
    fn escaped_ff_zero_marks_the_next_byte() {
        let mut serial = decoder();
        // \377 \0 <command byte> <data byte>
        let (bytes, parity) = serial.decode_parmrk(&[0xFF, 0x00, 0x84, 0x01]);
        assert_eq!(bytes, vec![0x84, 0x01]);
        assert_eq!(parity, vec![Parity::Mark, Parity::Space]);
    }

    #[test]
    fn doubled_ff_is_a_literal_data_byte() {
        let mut serial = decoder();
        let (bytes, parity) = serial.decode_parmrk(&[0xFF, 0xFF, 0x01]);
        assert_eq!(bytes, vec![0xFF, 0x01]);
        assert_eq!(parity, vec![Parity::Space, Parity::Space]);
    }

    #[test]
    fn escape_sequence_split_across_reads() {
        let mut serial = decoder();
        let (bytes, parity) = serial.decode_parmrk(&[0x01, 0xFF]);
        assert_eq!(bytes, vec![0x01]);
        assert_eq!(parity, vec![Parity::Space]);

        let (bytes, parity) = serial.decode_parmrk(&[0x00, 0x84]);
        assert_eq!(bytes, vec![0x84]);
        assert_eq!(parity, vec![Parity::Mark]);
    }
}
