use async_trait::async_trait;
use serialport::SerialPortType;
use tokio::io::{AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use super::{LineSplitter, PortInfo, Result, SerialError};

pub const DEFAULT_BAUD_RATE: u32 = 9600;
const LINE_CHANNEL_CAPACITY: usize = 256;

/// Line oriented link to the RS485 bus.
///
/// Outbound text is terminated with CR+LF by the implementation. Inbound
/// lines are delivered separately through the receiver handed out when the
/// link is opened.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&mut self, text: &str) -> Result<()>;

    async fn close(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;
}

/// List the serial ports present on this machine
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports()?;
    let infos = ports
        .into_iter()
        .map(|port| match port.port_type {
            SerialPortType::UsbPort(usb_info) => PortInfo {
                path: port.port_name,
                manufacturer: usb_info.manufacturer,
                serial_number: usb_info.serial_number,
            },
            _ => PortInfo {
                path: port.port_name,
                manufacturer: None,
                serial_number: None,
            },
        })
        .collect();
    Ok(infos)
}

/// RS485 adapter opened through tokio-serial
pub struct SerialInterface {
    writer: Option<WriteHalf<SerialStream>>,
    reader_task: Option<JoinHandle<()>>,
    port_name: String,
}

impl SerialInterface {
    /// Open `path` at `baud_rate` with 8N1 framing and no flow control.
    ///
    /// Returns the interface and the stream of received lines. The stream
    /// ends when the port is closed or a read error occurs.
    pub fn open(path: &str, baud_rate: u32) -> Result<(Self, mpsc::Receiver<String>)> {
        let stream = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => SerialError::PortNotFound(path.to_string()),
                _ => SerialError::ConnectionFailed(e.to_string()),
            })?;

        let (reader, writer) = tokio::io::split(stream);
        let (lines_tx, lines_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let reader_task = tokio::spawn(read_lines(reader, lines_tx, path.to_string()));

        log::info!("Opened {} at {} baud", path, baud_rate);
        Ok((
            Self {
                writer: Some(writer),
                reader_task: Some(reader_task),
                port_name: path.to_string(),
            },
            lines_rx,
        ))
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[async_trait]
impl Transport for SerialInterface {
    async fn send(&mut self, text: &str) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(SerialError::NotConnected)?;
        let line = format!("{}\r\n", text);
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        log::debug!("TX {} -> {}", self.port_name, text);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            // The port is released once both halves are dropped
            if let Err(e) = writer.shutdown().await {
                log::debug!("Shutdown of {} reported: {}", self.port_name, e);
            }
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        log::info!("Closed {}", self.port_name);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }
}

impl Drop for SerialInterface {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}

async fn read_lines(
    mut reader: tokio::io::ReadHalf<SerialStream>,
    lines_tx: mpsc::Sender<String>,
    port_name: String,
) {
    let mut splitter = LineSplitter::new();
    let mut buf = [0u8; 512];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                log::info!("{} reached end of stream", port_name);
                break;
            }
            Ok(n) => {
                for line in splitter.push(&buf[..n]) {
                    log::debug!("RX {} <- {}", port_name, line);
                    if lines_tx.send(line).await.is_err() {
                        return;
                    }
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => {
                log::error!("Read error on {}: {}", port_name, e);
                break;
            }
        }
    }
}
