#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::Instant;

use rs485_configurator_lib::serial::{Result, SerialError, Transport};

#[derive(Debug, Clone)]
pub struct SentLine {
    pub text: String,
    pub at: Instant,
}

/// Transport that records what was written. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    sent: Arc<Mutex<Vec<SentLine>>>,
    fail_after: Arc<Mutex<Option<usize>>>,
    closed: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every send once `count` lines went out
    pub fn fail_after(&self, count: usize) {
        *self.fail_after.lock().unwrap() = Some(count);
    }

    pub fn sent(&self) -> Vec<SentLine> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_text(&self) -> Vec<String> {
        self.sent().into_iter().map(|line| line.text).collect()
    }

    pub fn was_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, text: &str) -> Result<()> {
        let mut sent = self.sent.lock().unwrap();
        if let Some(limit) = *self.fail_after.lock().unwrap() {
            if sent.len() >= limit {
                return Err(SerialError::NotConnected);
            }
        }
        sent.push(SentLine {
            text: text.to_string(),
            at: Instant::now(),
        });
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.was_closed()
    }
}

/// 24 space separated hex bytes: address, power, input, then payload
pub fn single_line(address: u8) -> String {
    let mut bytes = vec![address, 0x01, 0x00];
    bytes.extend((0..21).map(|i| i as u8));
    hex_tokens(&bytes)
}

/// PM status: four addresses, power, four relays, padding
pub fn quad_line(addresses: [u8; 4]) -> String {
    let mut bytes = addresses.to_vec();
    bytes.push(0x01);
    bytes.extend([1, 0, 1, 0]);
    bytes.extend(std::iter::repeat(0).take(24 - bytes.len()));
    hex_tokens(&bytes)
}

pub fn hex_tokens(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
