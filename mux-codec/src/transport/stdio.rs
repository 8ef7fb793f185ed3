//! A write-only transport to the process's standard output, for piping
//! a device's traffic to a human or to a shell pipeline.

use tokio::io::{AsyncWriteExt, Stdout};

use super::{ReadResult, Transport, TransportError};

pub struct StdOutPrinter {
    stdout: Option<Stdout>,
}

impl StdOutPrinter {
    pub fn new() -> Self {
        Self { stdout: None }
    }
}

impl Default for StdOutPrinter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for StdOutPrinter {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.stdout = Some(tokio::io::stdout());
        Ok(())
    }

    async fn close(&mut self) {
        self.stdout = None;
    }

    async fn read(&mut self) -> Result<ReadResult, TransportError> {
        // Write-only by construction (spec.md §4.4): never resolve, so
        // the device loop's `select!` never spins on this branch.
        std::future::pending().await
    }

    async fn write(
        &mut self,
        bytes: &[u8],
        _parity: Option<&[super::Parity]>,
    ) -> Result<usize, TransportError> {
        let stdout = self.stdout.as_mut().ok_or(TransportError::Closed)?;
        stdout.write_all(bytes).await?;
        Ok(bytes.len())
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        if let Some(stdout) = self.stdout.as_mut() {
            stdout.flush().await?;
        }
        Ok(())
    }
}
