//! Serial device capability.
//!
//! [`SerialLink`] opens the port; the returned [`SerialHandle`] owns it and
//! offers line-oriented reads with a timeout plus raw writes. The tokio
//! implementation keeps partially received bytes across timed-out reads,
//! so a line split over two reads is never lost.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

use crate::error::Error;

// ── Capability traits ────────────────────────────────────────────────

/// Something that can open the device's serial port.
#[async_trait]
pub trait SerialLink: Send + Sync {
    /// Open the port and wait until the device is ready to accept commands.
    async fn open(&self) -> Result<Box<dyn SerialHandle>, Error>;

    /// Human-readable port name for logs.
    fn describe(&self) -> String;
}

/// An open serial port.
#[async_trait]
pub trait SerialHandle: Send {
    /// Read one line, without its terminator.
    ///
    /// Returns `Ok(None)` if no complete line arrived within `timeout`.
    async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, Error>;

    /// Write raw bytes and flush.
    async fn write(&mut self, bytes: &[u8]) -> Result<(), Error>;

    /// Release the port. Calling it again is a no-op.
    async fn close(&mut self) -> Result<(), Error>;
}

// ── SerialConfig ─────────────────────────────────────────────────────

/// Port parameters. The device speaks 8N1 without flow control.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyACM0`.
    pub port: String,
    pub baud_rate: u32,
    /// Delay after opening before the port is handed out. Boards that
    /// reset when the port opens need this before they parse commands.
    pub settle: Duration,
}

impl SerialConfig {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            settle: Duration::from_secs(2),
        }
    }
}

// ── TokioSerialLink ──────────────────────────────────────────────────

/// [`SerialLink`] backed by `tokio-serial`.
#[derive(Debug, Clone)]
pub struct TokioSerialLink {
    config: SerialConfig,
}

impl TokioSerialLink {
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SerialLink for TokioSerialLink {
    async fn open(&self) -> Result<Box<dyn SerialHandle>, Error> {
        debug!(port = %self.config.port, baud = self.config.baud_rate, "opening serial port");

        let stream = tokio_serial::new(&self.config.port, self.config.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| Error::SerialOpen {
                port: self.config.port.clone(),
                reason: e.to_string(),
            })?;

        tokio::time::sleep(self.config.settle).await;
        info!(port = %self.config.port, "serial port open");

        Ok(Box::new(TokioSerialHandle {
            port: self.config.port.clone(),
            reader: Some(BufReader::new(stream)),
            pending: Vec::new(),
        }))
    }

    fn describe(&self) -> String {
        self.config.port.clone()
    }
}

struct TokioSerialHandle {
    port: String,
    reader: Option<BufReader<SerialStream>>,
    /// Bytes of the line currently being assembled.
    pending: Vec<u8>,
}

#[async_trait]
impl SerialHandle for TokioSerialHandle {
    async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, Error> {
        let reader = self.reader.as_mut().ok_or(Error::SerialClosed)?;

        // `read_until` appends to `pending` as bytes arrive, so a timeout
        // leaves the partial line in place for the next call.
        match tokio::time::timeout(timeout, reader.read_until(b'\n', &mut self.pending)).await {
            Err(_elapsed) => Ok(None),
            Ok(Err(e)) => Err(Error::SerialIo(e)),
            Ok(Ok(0)) => {
                self.reader = None;
                Err(Error::SerialClosed)
            }
            Ok(Ok(_)) => {
                let raw = std::mem::take(&mut self.pending);
                Ok(Some(decode_line(&raw)))
            }
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let reader = self.reader.as_mut().ok_or(Error::SerialClosed)?;
        let stream = reader.get_mut();
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), Error> {
        if let Some(mut reader) = self.reader.take() {
            let _ = reader.get_mut().shutdown().await;
            info!(port = %self.port, "serial port closed");
        }
        Ok(())
    }
}

/// Lossily decode a raw line and strip its terminator.
pub fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\n', '\r'])
        .to_owned()
}
