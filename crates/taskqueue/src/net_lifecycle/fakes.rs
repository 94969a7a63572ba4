//! In-process fakes for [`HttpProvider`]/[`WebSocketProvider`], used by this crate's own
//! tests and exposed to downstream integration tests behind the `fakes` feature.

use super::provider::{HttpCallHandle, HttpProvider, WebSocketHandle, WebSocketProvider};
use crate::async_provider::AsyncOperation;
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Completes every call with a canned status, either synchronously from `perform` or after a
/// configured delay on a background thread.
pub struct FakeHttpProvider {
    status: usize,
    delay_ms: Option<u64>,
    cleanup_called: AtomicBool,
}

impl FakeHttpProvider {
    #[must_use]
    pub fn immediate(status: usize) -> Self {
        Self {
            status,
            delay_ms: None,
            cleanup_called: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn delayed(status: usize, delay_ms: u64) -> Self {
        Self {
            status,
            delay_ms: Some(delay_ms),
            cleanup_called: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn cleanup_called(&self) -> bool {
        self.cleanup_called.load(Ordering::SeqCst)
    }
}

impl HttpProvider for FakeHttpProvider {
    fn perform(&self, _call_handle: HttpCallHandle, op: &Arc<AsyncOperation>) -> Result<()> {
        let status = self.status;
        match self.delay_ms {
            None => op.complete(Ok(status)),
            Some(ms) => {
                let op = Arc::clone(op);
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(ms));
                    op.complete(Ok(status));
                });
            }
        }
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        self.cleanup_called.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Connects immediately (or after a delay) and records every send/disconnect call.
pub struct FakeWebSocketProvider {
    connect_delay_ms: Option<u64>,
    sent_text: AtomicUsize,
    sent_binary: AtomicUsize,
    disconnect_count: AtomicUsize,
}

impl FakeWebSocketProvider {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connect_delay_ms: None,
            sent_text: AtomicUsize::new(0),
            sent_binary: AtomicUsize::new(0),
            disconnect_count: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_connect_delay(delay_ms: u64) -> Self {
        Self {
            connect_delay_ms: Some(delay_ms),
            ..Self::new()
        }
    }

    #[must_use]
    pub fn sent_text_count(&self) -> usize {
        self.sent_text.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn sent_binary_count(&self) -> usize {
        self.sent_binary.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn disconnect_count(&self) -> usize {
        self.disconnect_count.load(Ordering::SeqCst)
    }
}

impl Default for FakeWebSocketProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketProvider for FakeWebSocketProvider {
    fn connect(
        &self,
        _uri: &str,
        _subprotocol: Option<&str>,
        _ws_handle: WebSocketHandle,
        op: &Arc<AsyncOperation>,
    ) -> Result<()> {
        match self.connect_delay_ms {
            None => op.complete(Ok(0)),
            Some(ms) => {
                let op = Arc::clone(op);
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(ms));
                    op.complete(Ok(0));
                });
            }
        }
        Ok(())
    }

    fn send_text(&self, _ws_handle: WebSocketHandle, _message: &str) -> Result<()> {
        self.sent_text.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn send_binary(&self, _ws_handle: WebSocketHandle, _bytes: &[u8]) -> Result<()> {
        self.sent_binary.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self, _ws_handle: WebSocketHandle, _close_status: u16) -> Result<()> {
        self.disconnect_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Provider that always fails to connect, with `reason` as the error carried into the
/// completion.
pub struct FailingWebSocketProvider {
    reason: Error,
}

impl FailingWebSocketProvider {
    #[must_use]
    pub fn new(reason: Error) -> Self {
        Self { reason }
    }
}

impl WebSocketProvider for FailingWebSocketProvider {
    fn connect(
        &self,
        _uri: &str,
        _subprotocol: Option<&str>,
        _ws_handle: WebSocketHandle,
        op: &Arc<AsyncOperation>,
    ) -> Result<()> {
        op.complete(Err(self.reason));
        Ok(())
    }

    fn send_text(&self, _ws_handle: WebSocketHandle, _message: &str) -> Result<()> {
        Err(Error::InvalidArg)
    }

    fn send_binary(&self, _ws_handle: WebSocketHandle, _bytes: &[u8]) -> Result<()> {
        Err(Error::InvalidArg)
    }

    fn disconnect(&self, _ws_handle: WebSocketHandle, _close_status: u16) -> Result<()> {
        Err(Error::InvalidArg)
    }
}
