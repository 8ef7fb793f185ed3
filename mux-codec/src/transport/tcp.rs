//! TCP transports: a listening server that accepts many simultaneous
//! clients, broadcasting writes to all of them and merging their reads
//! (`TCPServer`), and a client that connects out to a remote host
//! (`TCPClient`). Grounded on `rs1090::source::radarcape`'s
//! connect-then-read loop, generalized from a fixed Beast-format socket
//! to carrying either codec's bytes.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::{ReadResult, Transport, TransportError};

const READ_BUF_SIZE: usize = 4096;
const INCOMING_CHANNEL_CAPACITY: usize = 256;
/// spec.md §9 Open Question (b): a client that doesn't drain its socket
/// within this long gets disconnected rather than blocking the whole
/// broadcast.
const CLIENT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// A TCP server that accepts every client that connects, broadcasts
/// every `write` to all of them, and surfaces reads as the merged
/// (interleaved, not time-ordered) stream of bytes from whichever
/// client sent something. One reader task per connected client funnels
/// into a shared channel; `read()` just drains that channel, so it
/// never needs to poll more clients than are actually connected.
pub struct TCPServer {
    port: u16,
    accept_task: Option<JoinHandle<()>>,
    writers: Arc<Mutex<Vec<OwnedWriteHalf>>>,
    reader_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    incoming_tx: mpsc::Sender<Vec<u8>>,
    incoming_rx: mpsc::Receiver<Vec<u8>>,
}

impl TCPServer {
    pub fn new(port: u16) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_CHANNEL_CAPACITY);
        Self {
            port,
            accept_task: None,
            writers: Arc::new(Mutex::new(Vec::new())),
            reader_tasks: Arc::new(Mutex::new(Vec::new())),
            incoming_tx,
            incoming_rx,
        }
    }
}

impl Drop for TCPServer {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        if let Ok(mut tasks) = self.reader_tasks.try_lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for TCPServer {
    async fn open(&mut self) -> Result<(), TransportError> {
        let listener = TcpListener::bind(("0.0.0.0", self.port)).await?;
        let writers = self.writers.clone();
        let reader_tasks = self.reader_tasks.clone();
        let incoming_tx = self.incoming_tx.clone();

        self.accept_task = Some(tokio::spawn(async move {
            loop {
                let (stream, _addr) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => break,
                };
                let (mut read_half, write_half) = stream.into_split();
                writers.lock().await.push(write_half);

                let tx = incoming_tx.clone();
                let reader = tokio::spawn(async move {
                    let mut buf = vec![0u8; READ_BUF_SIZE];
                    loop {
                        match read_half.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if tx.send(buf[..n].to_vec()).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
                reader_tasks.lock().await.push(reader);
            }
        }));
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        for task in self.reader_tasks.lock().await.drain(..) {
            task.abort();
        }
        self.writers.lock().await.clear();
    }

    /// Waits for the next chunk of bytes from any connected client.
    /// With no client connected this simply waits, the same as it would
    /// between two lines from a single slow client.
    async fn read(&mut self) -> Result<ReadResult, TransportError> {
        if self.accept_task.is_none() {
            return Err(TransportError::Closed);
        }
        match self.incoming_rx.recv().await {
            Some(bytes) => Ok(ReadResult {
                bytes,
                parity: None,
            }),
            None => Err(TransportError::Closed),
        }
    }

    /// Broadcasts to every connected client. A client that doesn't
    /// accept the write within [`CLIENT_WRITE_TIMEOUT`] is dropped;
    /// other clients are unaffected.
    async fn write(
        &mut self,
        bytes: &[u8],
        _parity: Option<&[super::Parity]>,
    ) -> Result<usize, TransportError> {
        if self.accept_task.is_none() {
            return Err(TransportError::Closed);
        }
        let mut writers = self.writers.lock().await;
        let mut alive = Vec::with_capacity(writers.len());
        for mut writer in writers.drain(..) {
            match tokio::time::timeout(CLIENT_WRITE_TIMEOUT, writer.write_all(bytes)).await {
                Ok(Ok(())) => alive.push(writer),
                Ok(Err(_)) | Err(_) => {
                    // write failed, or the client didn't drain in time; drop it
                }
            }
        }
        *writers = alive;
        Ok(bytes.len())
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

pub struct TCPClient {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
}

impl TCPClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            stream: None,
        }
    }
}

#[async_trait::async_trait]
impl Transport for TCPClient {
    async fn open(&mut self) -> Result<(), TransportError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
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
        if n == 0 {
            self.stream = None;
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

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn broadcasts_one_write_to_every_connected_client() {
        let mut server = TCPServer::new(18273);
        server.open().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut client_a = TcpStream::connect(("127.0.0.1", 18273)).await.unwrap();
        let mut client_b = TcpStream::connect(("127.0.0.1", 18273)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        server.write(b"hello", None).await.unwrap();

        let mut buf = [0u8; 5];
        client_a.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        client_b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn merges_reads_from_multiple_clients() {
        let mut server = TCPServer::new(18274);
        server.open().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut client_a = TcpStream::connect(("127.0.0.1", 18274)).await.unwrap();
        let mut client_b = TcpStream::connect(("127.0.0.1", 18274)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        client_a.write_all(b"A").await.unwrap();
        client_b.write_all(b"B").await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..2 {
            let result = server.read().await.unwrap();
            seen.extend(result.bytes);
        }
        seen.sort();
        assert_eq!(seen, vec![b'A', b'B']);
    }
}
