//! One instrumentation endpoint: a transport, the codec family it
//! speaks, and the dispatcher queue other devices enqueue into when
//! this device is listed as their observer.
//!
//! Reader and writer share one task per device (mirrors the teacher's
//! single `tokio::spawn` per source): the transport can only be driven
//! by one future at a time anyway, and `tokio::select!` lets an
//! outbound message preempt an in-flight read wait without a second
//! task or a split trait.

use std::io::Write;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use mux_codec::message::Message;
use mux_codec::seatalk;
use mux_codec::seatalk::framer::{HeuristicFramer, ParityAwareFramer};
use mux_codec::transport::Transport;
use mux_codec::{nmea, prelude::Parity};
use tracing::{info, warn};

use crate::dispatcher::{EnqueueHandle, Queue};
use crate::settime::SetTimeDevice;
use crate::supervisor::pet_heartbeat;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub enum Codec {
    Nmea { talker: String },
    Seatalk,
}

/// Everything about a device that comes straight out of `devices.json`,
/// bundled so [`Device::new`] takes one config argument instead of four.
pub struct DeviceSpec {
    pub name: String,
    pub transport: Box<dyn Transport>,
    pub codec: Codec,
    pub auto_flush: u32,
}

pub struct Device {
    name: String,
    transport: Box<dyn Transport>,
    codec: Codec,
    queue: Queue,
    observers: Vec<EnqueueHandle>,
    auto_flush: u32,
    heartbeat: Arc<AtomicU64>,
    nmea_buf: Vec<u8>,
    parity_framer: ParityAwareFramer,
    heuristic_framer: HeuristicFramer,
    raw_log: Option<tracing_appender::non_blocking::NonBlocking>,
}

impl Device {
    pub fn new(
        spec: DeviceSpec,
        queue: Queue,
        observers: Vec<EnqueueHandle>,
        heartbeat: Arc<AtomicU64>,
        raw_log: Option<tracing_appender::non_blocking::NonBlocking>,
    ) -> Self {
        Device {
            name: spec.name,
            transport: spec.transport,
            codec: spec.codec,
            queue,
            observers,
            auto_flush: spec.auto_flush,
            heartbeat,
            nmea_buf: Vec::new(),
            parity_framer: ParityAwareFramer::new(),
            heuristic_framer: HeuristicFramer::new(),
            raw_log,
        }
    }

    /// Runs until every [`EnqueueHandle`] into this device's queue has
    /// been dropped (i.e. the daemon is shutting down).
    pub async fn run(mut self) {
        self.reconnect_and_open().await;
        let mut since_flush: u32 = 0;

        loop {
            tokio::select! {
                read_result = self.transport.read() => {
                    match read_result {
                        Ok(result) => {
                            pet_heartbeat(&self.heartbeat);
                            if let Some(raw_log) = self.raw_log.as_mut() {
                                let _ = raw_log.write_all(&result.bytes);
                            }
                            for message in self.decode(result.bytes, result.parity) {
                                if let Err(e) = message.validate() {
                                    warn!(device = %self.name, error = %e, "dropping out-of-range reading");
                                    continue;
                                }
                                for observer in &self.observers {
                                    observer.enqueue(message.clone()).await;
                                }
                            }
                        }
                        Err(e) => {
                            warn!(device = %self.name, error = %e, "transport read failed; reconnecting");
                            self.transport.close().await;
                            self.reconnect_and_open().await;
                        }
                    }
                }
                outgoing = self.queue.recv_fresh() => {
                    match outgoing {
                        Some(message) => {
                            pet_heartbeat(&self.heartbeat);
                            self.write_one(message, &mut since_flush).await;
                        }
                        None => break,
                    }
                }
            }
        }

        info!(
            device = %self.name,
            overflow_dropped = self.queue.overflow_dropped(),
            expired_dropped = self.queue.expired_dropped(),
            "device task exiting"
        );
    }

    fn decode(&mut self, bytes: Vec<u8>, parity: Option<Vec<Parity>>) -> Vec<Message> {
        match &self.codec {
            Codec::Nmea { .. } => {
                self.nmea_buf.extend_from_slice(&bytes);
                let mut out = Vec::new();
                while let Some(pos) = self.nmea_buf.iter().position(|&b| b == b'\n') {
                    let line_bytes: Vec<u8> = self.nmea_buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line_bytes);
                    let trimmed = line.trim_end_matches(['\r', '\n']);
                    if trimmed.is_empty() {
                        continue;
                    }
                    match nmea::decode_line(trimmed) {
                        Ok(messages) => out.extend(messages),
                        Err(e) => {
                            warn!(device = %self.name, error = %e, line = %trimmed, "dropping malformed NMEA line")
                        }
                    }
                }
                out
            }
            Codec::Seatalk => match parity {
                Some(parity) => self.parity_framer.push(&bytes, &parity),
                None => self.heuristic_framer.push(&bytes),
            },
        }
    }

    async fn write_one(&mut self, message: Message, since_flush: &mut u32) {
        let encoded = match &self.codec {
            Codec::Nmea { talker } => nmea::encode(&message, talker).map(String::into_bytes),
            Codec::Seatalk => seatalk::encode(&message),
        };
        let Some(bytes) = encoded else {
            return;
        };

        match self.transport.write(&bytes, None).await {
            Ok(_) => {
                *since_flush += 1;
                // auto_flush == 0 means "flush every message".
                if self.auto_flush == 0 || *since_flush >= self.auto_flush {
                    let _ = self.transport.flush().await;
                    *since_flush = 0;
                }
            }
            Err(e) => {
                warn!(device = %self.name, error = %e, "transport write failed; reconnecting");
                self.transport.close().await;
                self.reconnect_and_open().await;
            }
        }
    }

    /// Retries `open()` with exponential backoff (1s, doubling, capped
    /// at 30s) until it succeeds. Never gives up: a device with no
    /// cable plugged in yet is a normal startup state, not a fatal one.
    async fn reconnect_and_open(&mut self) {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match self.transport.open().await {
                Ok(()) => {
                    info!(device = %self.name, "transport open");
                    return;
                }
                Err(e) => {
                    warn!(device = %self.name, error = %e, backoff_secs = backoff.as_secs(), "transport open failed");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

/// `SetTimeDevice` has no transport of its own: it only ever consumes
/// whatever its own queue collects from the devices that name it as an
/// observer.
pub async fn run_settime(queue: Queue, mut settime: SetTimeDevice, heartbeat: Arc<AtomicU64>) {
    while let Some(message) = queue.recv_fresh().await {
        pet_heartbeat(&heartbeat);
        settime.on_message(&message);
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use mux_codec::transport::{ReadResult, TransportError};

    use super::*;

    struct FlushCountingTransport {
        flushes: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Transport for FlushCountingTransport {
        async fn open(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn close(&mut self) {}

        async fn read(&mut self) -> Result<ReadResult, TransportError> {
            std::future::pending().await
        }

        async fn write(
            &mut self,
            bytes: &[u8],
            _parity: Option<&[Parity]>,
        ) -> Result<usize, TransportError> {
            Ok(bytes.len())
        }

        async fn flush(&mut self) -> Result<(), TransportError> {
            self.flushes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[tokio::test]
    async fn auto_flush_zero_flushes_every_message() {
        let flushes = Arc::new(AtomicUsize::new(0));
        let transport = Box::new(FlushCountingTransport {
            flushes: flushes.clone(),
        });
        let spec = DeviceSpec {
            name: "test".to_string(),
            transport,
            codec: Codec::Nmea {
                talker: "II".to_string(),
            },
            auto_flush: 0,
        };
        let queue = Queue::new(10, Duration::from_secs(30));
        let heartbeat = crate::supervisor::new_heartbeat();
        let mut device = Device::new(spec, queue, vec![], heartbeat, None);

        let mut since_flush = 0;
        device
            .write_one(Message::DepthBelowTransducer { meters: 1.0 }, &mut since_flush)
            .await;
        device
            .write_one(Message::DepthBelowTransducer { meters: 2.0 }, &mut since_flush)
            .await;

        assert_eq!(flushes.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn auto_flush_n_batches_before_flushing() {
        let flushes = Arc::new(AtomicUsize::new(0));
        let transport = Box::new(FlushCountingTransport {
            flushes: flushes.clone(),
        });
        let spec = DeviceSpec {
            name: "test".to_string(),
            transport,
            codec: Codec::Nmea {
                talker: "II".to_string(),
            },
            auto_flush: 2,
        };
        let queue = Queue::new(10, Duration::from_secs(30));
        let heartbeat = crate::supervisor::new_heartbeat();
        let mut device = Device::new(spec, queue, vec![], heartbeat, None);

        let mut since_flush = 0;
        device
            .write_one(Message::DepthBelowTransducer { meters: 1.0 }, &mut since_flush)
            .await;
        assert_eq!(flushes.load(Ordering::Relaxed), 0);
        device
            .write_one(Message::DepthBelowTransducer { meters: 2.0 }, &mut since_flush)
            .await;
        assert_eq!(flushes.load(Ordering::Relaxed), 1);
    }
}

