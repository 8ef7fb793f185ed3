//! The transport interface devices read raw bytes from and write
//! encoded frames to (spec §4.4). Concrete transports are async because
//! every suspension point in this system — read, write, reconnect sleep
//! — is an I/O wait; see [`tcp`], [`serial`], [`file`], [`stdio`].

pub mod file;
pub mod serial;
pub mod stdio;
pub mod tcp;

pub use crate::seatalk::framer::Parity;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("transport read/write timed out")]
    Timeout,
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One read from a transport: the raw bytes received and, only for
/// `SeatalkSerial`, one parity bit per byte.
pub struct ReadResult {
    pub bytes: Vec<u8>,
    pub parity: Option<Vec<Parity>>,
}

#[async_trait::async_trait]
pub trait Transport: Send {
    async fn open(&mut self) -> Result<(), TransportError>;
    async fn close(&mut self);
    async fn read(&mut self) -> Result<ReadResult, TransportError>;
    async fn write(
        &mut self,
        bytes: &[u8],
        parity: Option<&[Parity]>,
    ) -> Result<usize, TransportError>;
    async fn flush(&mut self) -> Result<(), TransportError>;
}
