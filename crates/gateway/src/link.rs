//! Line-oriented link to the sensor node.
//!
//! A background task splits the incoming byte stream on `\n` and hands
//! complete lines to the loop through a bounded channel, so reading never
//! blocks the loop. Writes go straight to the link.
//!
//! With the `serial` feature the link is a UART opened through `serialport`;
//! without it the link is a TCP stream to the node simulator.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SerialConfig;
use crate::error::GatewayError;

/// Lines queued between the reader task and the loop.
const LINE_QUEUE: usize = 32;

/// Initial capacity of the per-line read buffer.
const LINE_CAPACITY: usize = 128;

pub(crate) trait SerialLink {
    /// Next complete line, if one has arrived. Never waits.
    fn try_read_line(&mut self) -> Option<String>;

    async fn write_line(&mut self, line: &str) -> Result<(), GatewayError>;
}

enum LineSink {
    Stream(Box<dyn AsyncWrite + Unpin + Send>),
    #[cfg(feature = "serial")]
    Uart(Box<dyn serialport::SerialPort>),
}

pub(crate) struct LineLink {
    lines: mpsc::Receiver<String>,
    sink: LineSink,
    reader: Option<JoinHandle<()>>,
}

impl Drop for LineLink {
    fn drop(&mut self) {
        // The stream reader holds the read half; stop it so the link is
        // released now rather than on the next incoming line. The UART
        // reader notices the closed channel on its next read timeout.
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl LineLink {
    /// Build a link over any byte stream pair. Spawns the reader task.
    #[cfg_attr(feature = "serial", allow(dead_code))]
    pub(crate) fn from_stream<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(LINE_QUEUE);
        let reader = tokio::spawn(read_lines(reader, tx));
        Self {
            lines: rx,
            sink: LineSink::Stream(Box::new(writer)),
            reader: Some(reader),
        }
    }
}

impl SerialLink for LineLink {
    fn try_read_line(&mut self) -> Option<String> {
        self.lines.try_recv().ok()
    }

    async fn write_line(&mut self, line: &str) -> Result<(), GatewayError> {
        match &mut self.sink {
            LineSink::Stream(w) => {
                w.write_all(line.as_bytes()).await?;
                w.write_all(b"\n").await?;
                w.flush().await?;
            }
            #[cfg(feature = "serial")]
            LineSink::Uart(port) => {
                use std::io::Write;
                port.write_all(line.as_bytes())?;
                port.write_all(b"\n")?;
                port.flush()?;
            }
        }
        debug!(line, "serial out");
        Ok(())
    }
}

/// Trim a raw line; `None` for blank or non-UTF-8 input.
fn clean_line(raw: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(raw).ok()?.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

async fn read_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::Sender<String>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(LINE_CAPACITY);

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                warn!("serial link closed by peer");
                return;
            }
            Ok(_) => match clean_line(&buf) {
                Some(line) => {
                    if tx.send(line).await.is_err() {
                        return;
                    }
                }
                None if buf.iter().any(|b| !b.is_ascii_whitespace()) => {
                    warn!(bytes = buf.len(), "dropping non-UTF-8 serial line");
                }
                None => {}
            },
            Err(e) => {
                warn!(error = %e, "serial read failed, link reader stopped");
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Opening the link
// ---------------------------------------------------------------------------

#[cfg(not(feature = "serial"))]
pub(crate) async fn open(cfg: &SerialConfig) -> Result<LineLink> {
    let stream = tokio::net::TcpStream::connect(&cfg.tcp_addr)
        .await
        .with_context(|| format!("failed to reach sensor node at {}", cfg.tcp_addr))?;
    stream.set_nodelay(true).ok();
    info!(addr = %cfg.tcp_addr, "serial link open (tcp)");

    let (reader, writer) = stream.into_split();
    Ok(LineLink::from_stream(reader, writer))
}

#[cfg(feature = "serial")]
pub(crate) async fn open(cfg: &SerialConfig) -> Result<LineLink> {
    use std::io::{BufRead, ErrorKind};
    use std::time::Duration;

    let port = serialport::new(&cfg.device, cfg.baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .stop_bits(serialport::StopBits::One)
        .parity(serialport::Parity::None)
        .timeout(Duration::from_millis(100))
        .open()
        .with_context(|| format!("failed to open serial port {}", cfg.device))?;
    let reader = port
        .try_clone()
        .with_context(|| format!("failed to clone serial port {}", cfg.device))?;
    info!(device = %cfg.device, baud = cfg.baud_rate, "serial link open (uart)");

    let (tx, rx) = mpsc::channel(LINE_QUEUE);
    tokio::task::spawn_blocking(move || {
        let mut reader = std::io::BufReader::new(reader);
        let mut buf = Vec::with_capacity(LINE_CAPACITY);
        loop {
            // A timeout may leave a partial line in `buf`; keep it and read on.
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => return,
                Ok(_) if buf.last() == Some(&b'\n') => {
                    if let Some(line) = clean_line(&buf) {
                        if tx.blocking_send(line).is_err() {
                            return;
                        }
                    }
                    buf.clear();
                }
                Ok(_) | Err(_) if tx.is_closed() => return,
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::TimedOut => {}
                Err(e) => {
                    warn!(error = %e, "uart read failed, link reader stopped");
                    return;
                }
            }
        }
    });

    Ok(LineLink {
        lines: rx,
        sink: LineSink::Uart(port),
        reader: None,
    })
}

// ===========================================================================
// Tests
// ===========================================================================
