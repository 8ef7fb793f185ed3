//! File-backed transports: a plain append/read file (`File`) and a
//! rewrite-in-place file that always holds only the most recent write
//! (`FileRewriter`), written via the temp-file-then-rename pattern so a
//! reader never observes a half-written file.

use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{ReadResult, Transport, TransportError};

const READ_BUF_SIZE: usize = 4096;
const REWRITE_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(200);

pub struct File {
    path: std::path::PathBuf,
    file: Option<tokio::fs::File>,
}

impl File {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }
}

#[async_trait::async_trait]
impl Transport for File {
    async fn open(&mut self) -> Result<(), TransportError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await?;
        self.file = Some(file);
        Ok(())
    }

    async fn close(&mut self) {
        self.file = None;
    }

    async fn read(&mut self) -> Result<ReadResult, TransportError> {
        let file = self.file.as_mut().ok_or(TransportError::Closed)?;
        let mut buf = vec![0u8; READ_BUF_SIZE];
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Err(TransportError::Closed);
        }
        buf.truncate(n);
        Ok(ReadResult {
            bytes: buf,
            parity: None,
        })
    }

    async fn write(
        &mut self,
        bytes: &[u8],
        _parity: Option<&[super::Parity]>,
    ) -> Result<usize, TransportError> {
        let file = self.file.as_mut().ok_or(TransportError::Closed)?;
        file.write_all(bytes).await?;
        Ok(bytes.len())
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        if let Some(file) = self.file.as_mut() {
            file.flush().await?;
        }
        Ok(())
    }
}

/// A file that is replaced wholesale on every write, via a `.tmp`
/// sibling renamed over the target, so readers of the target path only
/// ever see a complete write. Reads rewind to the start of the file and
/// return its current contents whenever they change (spec.md §4.4):
/// this is how an external process's latest snapshot gets picked up as
/// this device's incoming data.
pub struct FileRewriter {
    path: std::path::PathBuf,
    last_modified: Option<std::time::SystemTime>,
}

impl FileRewriter {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_modified: None,
        }
    }

    async fn modified_at(&self) -> Option<std::time::SystemTime> {
        tokio::fs::metadata(&self.path)
            .await
            .ok()?
            .modified()
            .ok()
    }
}

#[async_trait::async_trait]
impl Transport for FileRewriter {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.last_modified = self.modified_at().await;
        Ok(())
    }

    async fn close(&mut self) {}

    async fn read(&mut self) -> Result<ReadResult, TransportError> {
        loop {
            let modified = self.modified_at().await;
            if modified.is_some() && modified != self.last_modified {
                self.last_modified = modified;
                let bytes = tokio::fs::read(&self.path).await.unwrap_or_default();
                return Ok(ReadResult {
                    bytes,
                    parity: None,
                });
            }
            tokio::time::sleep(REWRITE_POLL_INTERVAL).await;
        }
    }

    async fn write(
        &mut self,
        bytes: &[u8],
        _parity: Option<&[super::Parity]>,
    ) -> Result<usize, TransportError> {
        let tmp_path = self.path.with_extension("tmp");
        let mut tmp = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .await?;
        tmp.write_all(bytes).await?;
        tmp.flush().await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        // Own write: stamp it so a concurrent read() doesn't treat it as
        // newly arrived external data.
        self.last_modified = self.modified_at().await;
        Ok(bytes.len())
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn read_picks_up_an_external_rewrite() {
        let path = std::env::temp_dir().join(format!(
            "mux-codec-filerewriter-read-{:?}.snapshot",
            std::thread::current().id()
        ));
        let _ = tokio::fs::remove_file(&path).await;

        let mut rewriter = FileRewriter::new(path.clone());
        rewriter.open().await.unwrap();

        tokio::fs::write(&path, b"first fix").await.unwrap();
        let result = rewriter.read().await.unwrap();
        assert_eq!(result.bytes, b"first fix");

        tokio::fs::write(&path, b"second fix").await.unwrap();
        let result = rewriter.read().await.unwrap();
        assert_eq!(result.bytes, b"second fix");

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn own_write_then_rename_round_trips() {
        let path = std::env::temp_dir().join(format!(
            "mux-codec-filerewriter-write-{:?}.snapshot",
            std::thread::current().id()
        ));
        let _ = tokio::fs::remove_file(&path).await;

        let mut rewriter = FileRewriter::new(path.clone());
        rewriter.open().await.unwrap();
        rewriter.write(b"position fix", None).await.unwrap();

        let on_disk = tokio::fs::read(&path).await.unwrap();
        assert_eq!(on_disk, b"position fix");

        let _ = tokio::fs::remove_file(&path).await;
    }
}
