//! Mock serial port implementation for testing
//!
//! An in-memory link that records everything the master writes and plays
//! back queued meter responses. When the receive queue is empty a read
//! returns end-of-stream at once, which the master treats as "no response",
//! so tests never wait for a real timeout.

use crate::error::Result;
use crate::mbus::frame::pack_long_frame;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Mock serial port that simulates bidirectional communication
#[derive(Clone, Default)]
pub struct MockSerialPort {
    /// Data written to the port (outgoing)
    tx_buffer: Arc<Mutex<Vec<u8>>>,
    /// Data to be read from the port (incoming)
    rx_buffer: Arc<Mutex<VecDeque<u8>>>,
    /// Error returned by the next write
    next_write_error: Arc<Mutex<Option<io::Error>>>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockSerialPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue data to be read from the port
    pub fn queue_rx_data(&self, data: &[u8]) {
        guard(&self.rx_buffer).extend(data);
    }

    /// Queue a single-character acknowledgement.
    pub fn queue_ack(&self) {
        self.queue_rx_data(&[0xE5]);
    }

    /// Queue a well-formed long frame response.
    pub fn queue_long_frame(&self, control: u8, address: u8, ci: u8, data: &[u8]) -> Result<()> {
        let frame = pack_long_frame(control, address, ci, data)?;
        self.queue_rx_data(&frame);
        Ok(())
    }

    /// Queue an RSP_UD variable data response (C = 0x08, CI = 0x72).
    pub fn queue_variable_response(&self, address: u8, user_data: &[u8]) -> Result<()> {
        self.queue_long_frame(0x08, address, 0x72, user_data)
    }

    /// Get data that was written to the port
    pub fn get_tx_data(&self) -> Vec<u8> {
        guard(&self.tx_buffer).clone()
    }

    /// Bytes still waiting to be read.
    pub fn pending_rx(&self) -> usize {
        guard(&self.rx_buffer).len()
    }

    /// Clear all buffers
    pub fn clear(&self) {
        guard(&self.tx_buffer).clear();
        guard(&self.rx_buffer).clear();
    }

    /// Make the next write fail with `error`.
    pub fn fail_next_write(&self, error: io::Error) {
        *guard(&self.next_write_error) = Some(error);
    }
}

impl AsyncRead for MockSerialPort {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut rx = guard(&self.rx_buffer);
        let available = rx.len().min(buf.remaining());
        if available > 0 {
            let data: Vec<u8> = rx.drain(..available).collect();
            buf.put_slice(&data);
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockSerialPort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if let Some(error) = guard(&self.next_write_error).take() {
            return Poll::Ready(Err(error));
        }
        guard(&self.tx_buffer).extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
