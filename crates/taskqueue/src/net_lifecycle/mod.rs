//! C7: tracks every in-flight HTTP call and WebSocket connection issued through a client's
//! [`TaskQueue`], so that a shutdown sequence can drain them before handing the underlying
//! provider its own one-time cleanup call.
//!
//! Lock discipline: [`NetworkLifecycleTracker`]'s own mutex is always the outermost lock —
//! it is never held while calling into the queue, an [`AsyncOperation`], or the provider
//! trait objects. Each method takes the lock only long enough to read or update the tracked
//! sets, then releases it before doing anything that could re-enter this module.

mod fakes;
mod provider;

pub use provider::{HttpCallHandle, HttpProvider, WebSocketHandle, WebSocketProvider};

#[cfg(any(test, feature = "fakes"))]
pub use fakes::{FailingWebSocketProvider, FakeHttpProvider, FakeWebSocketProvider};

use crate::async_provider::{AsyncOperation, IdentityToken, Opcode};
use crate::error::{Error, Result};
use crate::task_queue::TaskQueue;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{event, Level};

struct TrackerState {
    active_http: HashMap<HttpCallHandle, Arc<AsyncOperation>>,
    connecting: HashMap<WebSocketHandle, Arc<AsyncOperation>>,
    connected: HashSet<WebSocketHandle>,
    cleanup_pending: bool,
    /// Set once a drain is in progress and not yet complete; taken and completed the moment
    /// the tracked sets empty out, from whichever tracked operation happens to finish last.
    cleanup_op: Option<Arc<AsyncOperation>>,
}

impl TrackerState {
    fn is_drained(&self) -> bool {
        self.active_http.is_empty() && self.connecting.is_empty() && self.connected.is_empty()
    }
}

/// Owns a client's HTTP and WebSocket provider handles and the bookkeeping needed to drain
/// them on shutdown without ever calling the underlying provider's cleanup verb while
/// anything still references it.
pub struct NetworkLifecycleTracker {
    http: Arc<dyn HttpProvider>,
    websocket: Option<Arc<dyn WebSocketProvider>>,
    state: Mutex<TrackerState>,
}

impl NetworkLifecycleTracker {
    #[must_use]
    pub fn new(http: Arc<dyn HttpProvider>, websocket: Option<Arc<dyn WebSocketProvider>>) -> Arc<Self> {
        Arc::new(Self {
            http,
            websocket,
            state: Mutex::new(TrackerState {
                active_http: HashMap::new(),
                connecting: HashMap::new(),
                connected: HashSet::new(),
                cleanup_pending: false,
                cleanup_op: None,
            }),
        })
    }

    fn reject_if_cleanup_pending(&self) -> Result<()> {
        if self.state.lock().cleanup_pending {
            return Err(Error::AccessDenied);
        }
        Ok(())
    }

    /// Launches one HTTP call through `queue`, tracking it until its [`AsyncOperation`]
    /// completes. The call's own work/completion traffic stays on `queue`'s ports directly —
    /// a per-call composite queue was considered and rejected; see `DESIGN.md`.
    pub fn http_call_perform<C>(
        self: &Arc<Self>,
        queue: &TaskQueue,
        call_handle: HttpCallHandle,
        completion: C,
    ) -> Result<Arc<AsyncOperation>>
    where
        C: FnOnce(Result<usize>) + Send + 'static,
    {
        self.reject_if_cleanup_pending()?;

        let op = AsyncOperation::new(queue.clone());
        let http = Arc::clone(&self.http);
        let provider = move |opcode: Opcode, op: &Arc<AsyncOperation>| -> Result<()> {
            match opcode {
                Opcode::Begin => http.perform(call_handle, op),
                Opcode::Cancel => {
                    op.complete(Err(Error::Aborted));
                    Ok(())
                }
                Opcode::DoWork | Opcode::GetResult | Opcode::Cleanup => Ok(()),
            }
        };

        let tracker = Arc::clone(self);
        let op_for_cleanup = Arc::clone(&op);
        let wrapped_completion = move |result: Result<usize>| {
            tracker.finish_http(call_handle);
            completion(result);
            op_for_cleanup.run_cleanup();
        };

        self.state.lock().active_http.insert(call_handle, Arc::clone(&op));
        if let Err(e) = op.begin(IdentityToken::new("net_lifecycle.http"), provider, wrapped_completion) {
            self.finish_http(call_handle);
            return Err(e);
        }
        Ok(op)
    }

    fn finish_http(&self, call_handle: HttpCallHandle) {
        let removed = self.state.lock().active_http.remove(&call_handle).is_some();
        if removed {
            self.maybe_finish_cleanup();
        }
    }

    /// Launches a WebSocket connect attempt, tracking it as `connecting` until it completes,
    /// then as `connected` until [`Self::websocket_disconnect`] or a failed connect removes
    /// it.
    pub fn websocket_connect<C>(
        self: &Arc<Self>,
        queue: &TaskQueue,
        uri: impl Into<String>,
        subprotocol: Option<String>,
        ws_handle: WebSocketHandle,
        completion: C,
    ) -> Result<Arc<AsyncOperation>>
    where
        C: FnOnce(Result<usize>) + Send + 'static,
    {
        self.reject_if_cleanup_pending()?;
        let websocket = self
            .websocket
            .as_ref()
            .cloned()
            .ok_or(Error::NotSupported)?;

        let uri = uri.into();
        let op = AsyncOperation::new(queue.clone());
        let provider = move |opcode: Opcode, op: &Arc<AsyncOperation>| -> Result<()> {
            match opcode {
                Opcode::Begin => websocket.connect(&uri, subprotocol.as_deref(), ws_handle, op),
                Opcode::Cancel => {
                    op.complete(Err(Error::Aborted));
                    Ok(())
                }
                Opcode::DoWork | Opcode::GetResult | Opcode::Cleanup => Ok(()),
            }
        };

        let tracker = Arc::clone(self);
        let op_for_cleanup = Arc::clone(&op);
        let wrapped_completion = move |result: Result<usize>| {
            tracker.finish_connect(ws_handle, result.is_ok());
            completion(result);
            op_for_cleanup.run_cleanup();
        };

        self.state.lock().connecting.insert(ws_handle, Arc::clone(&op));
        if let Err(e) = op.begin(IdentityToken::new("net_lifecycle.websocket"), provider, wrapped_completion) {
            self.finish_connect(ws_handle, false);
            return Err(e);
        }
        Ok(op)
    }

    /// Moves `ws_handle` out of `connecting`. A successful connect normally lands in
    /// `connected` — unless cleanup has already started, in which case the pending-disconnect
    /// race (§4.7) applies: the connect is allowed to finish, but it is immediately
    /// disconnected instead of ever being recorded as connected.
    fn finish_connect(&self, ws_handle: WebSocketHandle, connected: bool) {
        let must_disconnect = {
            let mut state = self.state.lock();
            state.connecting.remove(&ws_handle);
            if connected {
                if state.cleanup_pending {
                    true
                } else {
                    state.connected.insert(ws_handle);
                    false
                }
            } else {
                false
            }
        };
        if must_disconnect {
            if let Some(websocket) = &self.websocket {
                if let Err(e) = websocket.disconnect(ws_handle, 1000) {
                    event!(Level::DEBUG, error = ?e, ws_handle, "disconnect during cleanup race failed");
                }
            }
        }
        self.maybe_finish_cleanup();
    }

    pub fn websocket_send_text(&self, ws_handle: WebSocketHandle, message: &str) -> Result<()> {
        if !self.state.lock().connected.contains(&ws_handle) {
            return Err(Error::InvalidArg);
        }
        self.websocket.as_ref().ok_or(Error::NotSupported)?.send_text(ws_handle, message)
    }

    pub fn websocket_send_binary(&self, ws_handle: WebSocketHandle, bytes: &[u8]) -> Result<()> {
        if !self.state.lock().connected.contains(&ws_handle) {
            return Err(Error::InvalidArg);
        }
        self.websocket.as_ref().ok_or(Error::NotSupported)?.send_binary(ws_handle, bytes)
    }

    /// Removes `ws_handle` from the tracked set before asking the provider to disconnect, so
    /// a concurrent [`Self::cleanup`] never double-counts it.
    pub fn websocket_disconnect(&self, ws_handle: WebSocketHandle, close_status: u16) -> Result<()> {
        let had = self.state.lock().connected.remove(&ws_handle);
        if !had {
            return Err(Error::InvalidArg);
        }
        self.maybe_finish_cleanup();
        self.websocket.as_ref().ok_or(Error::NotSupported)?.disconnect(ws_handle, close_status)
    }

    /// If a drain is in progress and the tracked sets have just emptied out, takes the
    /// pending cleanup operation and runs the provider's cleanup to complete it. Called from
    /// every place a tracked call/connection leaves the tracked sets, so whichever one
    /// happens to drain the tracker last is the one that finishes the cleanup operation.
    fn maybe_finish_cleanup(&self) {
        let op = {
            let mut state = self.state.lock();
            if state.is_drained() {
                state.cleanup_op.take()
            } else {
                None
            }
        };
        if let Some(op) = op {
            self.finish_cleanup(&op);
        }
    }

    fn finish_cleanup(&self, cleanup_op: &Arc<AsyncOperation>) {
        let result = self.http.cleanup().map(|()| 0);
        cleanup_op.complete(result);
    }

    /// Begins a drain: cancels every tracked HTTP call, disconnects every connected socket,
    /// and leaves in-flight connects alone (the pending-disconnect race, §4.7, handles those
    /// through `finish_connect` once it observes `cleanup_pending`). A second concurrent call
    /// fails with [`Error::AccessDenied`], observed through the completion callback rather
    /// than this method's own return value, since by the time two callers can race on
    /// `cleanup_pending` the first one has already committed to running.
    fn begin_cleanup(&self, cleanup_op: &Arc<AsyncOperation>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.cleanup_pending {
                return Err(Error::AccessDenied);
            }
            state.cleanup_pending = true;
        }

        let (http_ops, connected) = {
            let state = self.state.lock();
            (
                state.active_http.values().cloned().collect::<Vec<_>>(),
                state.connected.iter().copied().collect::<Vec<_>>(),
            )
        };

        for op in http_ops {
            op.cancel();
        }
        if let Some(websocket) = &self.websocket {
            for ws_handle in connected {
                if let Err(e) = websocket.disconnect(ws_handle, 1000) {
                    event!(Level::DEBUG, error = ?e, ws_handle, "disconnect during cleanup failed");
                }
                self.state.lock().connected.remove(&ws_handle);
            }
        }

        let already_drained = {
            let mut state = self.state.lock();
            if state.is_drained() {
                true
            } else {
                state.cleanup_op = Some(Arc::clone(cleanup_op));
                false
            }
        };
        if already_drained {
            self.finish_cleanup(cleanup_op);
        }
        Ok(())
    }

    /// Launches cleanup as an async provider operation (§4.7): cancels every tracked HTTP
    /// call and WebSocket connect attempt, disconnects every connected socket, waits for all
    /// three sets to drain, then calls the HTTP provider's own cleanup exactly once and
    /// completes the returned operation. A second concurrent call completes with
    /// [`Error::AccessDenied`] instead of running cleanup twice.
    pub fn cleanup<C>(self: &Arc<Self>, queue: &TaskQueue, completion: C) -> Result<Arc<AsyncOperation>>
    where
        C: FnOnce(Result<usize>) + Send + 'static,
    {
        let op = AsyncOperation::new(queue.clone());
        let tracker = Arc::clone(self);
        let provider = move |opcode: Opcode, op: &Arc<AsyncOperation>| -> Result<()> {
            match opcode {
                Opcode::Begin => tracker.begin_cleanup(op),
                Opcode::Cancel => {
                    op.complete(Err(Error::Aborted));
                    Ok(())
                }
                Opcode::DoWork | Opcode::GetResult | Opcode::Cleanup => Ok(()),
            }
        };

        let op_for_cleanup = Arc::clone(&op);
        let wrapped_completion = move |result: Result<usize>| {
            completion(result);
            op_for_cleanup.run_cleanup();
        };

        op.begin(IdentityToken::new("net_lifecycle.cleanup"), provider, wrapped_completion)?;
        Ok(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskQueueConfig;
    use fakes::{FailingWebSocketProvider, FakeHttpProvider, FakeWebSocketProvider};
    use std::sync::mpsc;
    use std::time::Duration;

    fn queue() -> TaskQueue {
        TaskQueue::create(TaskQueueConfig::default(), true, true).unwrap()
    }

    #[test]
    fn http_call_completes_and_untracks_itself() {
        let tracker = NetworkLifecycleTracker::new(Arc::new(FakeHttpProvider::immediate(200)), None);
        let q = queue();
        let (tx, rx) = mpsc::channel();
        tracker
            .http_call_perform(&q, 1, move |result| tx.send(result).unwrap())
            .unwrap();
        let result = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(result, Ok(200));
        assert!(tracker.state.lock().active_http.is_empty());
    }

    #[test]
    fn cleanup_cancels_in_flight_call_before_provider_cleanup() {
        let http = Arc::new(FakeHttpProvider::delayed(200, 500));
        let tracker = NetworkLifecycleTracker::new(http.clone(), None);
        let q = queue();
        let (tx, rx) = mpsc::channel();
        tracker
            .http_call_perform(&q, 1, move |result| tx.send(result).unwrap())
            .unwrap();

        let (cleanup_tx, cleanup_rx) = mpsc::channel();
        tracker.cleanup(&q, move |result| cleanup_tx.send(result).unwrap()).unwrap();

        let result = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(result, Err(Error::Aborted));
        cleanup_rx.recv_timeout(Duration::from_secs(1)).unwrap().unwrap();
        assert!(http.cleanup_called());
    }

    #[test]
    fn second_cleanup_call_is_rejected() {
        let tracker = NetworkLifecycleTracker::new(Arc::new(FakeHttpProvider::immediate(200)), None);
        let q = queue();

        let (tx1, rx1) = mpsc::channel();
        tracker.cleanup(&q, move |result| tx1.send(result).unwrap()).unwrap();
        rx1.recv_timeout(Duration::from_secs(1)).unwrap().unwrap();

        let (tx2, rx2) = mpsc::channel();
        tracker.cleanup(&q, move |result| tx2.send(result).unwrap()).unwrap();
        assert_eq!(rx2.recv_timeout(Duration::from_secs(1)).unwrap(), Err(Error::AccessDenied));
    }

    #[test]
    fn websocket_connect_then_send_then_disconnect() {
        let ws = Arc::new(FakeWebSocketProvider::new());
        let tracker = NetworkLifecycleTracker::new(Arc::new(FakeHttpProvider::immediate(200)), Some(ws.clone()));
        let q = queue();
        let (tx, rx) = mpsc::channel();
        tracker
            .websocket_connect(&q, "wss://example.test", None, 7, move |result| tx.send(result).unwrap())
            .unwrap();
        rx.recv_timeout(Duration::from_secs(1)).unwrap().unwrap();

        tracker.websocket_send_text(7, "hello").unwrap();
        assert_eq!(ws.sent_text_count(), 1);

        tracker.websocket_disconnect(7, 1000).unwrap();
        assert_eq!(tracker.websocket_send_text(7, "too late").unwrap_err(), Error::InvalidArg);
    }

    #[test]
    fn cleanup_rejects_new_calls() {
        let tracker = NetworkLifecycleTracker::new(Arc::new(FakeHttpProvider::immediate(200)), None);
        let q = queue();
        let (tx, rx) = mpsc::channel();
        tracker.cleanup(&q, move |result| tx.send(result).unwrap()).unwrap();
        rx.recv_timeout(Duration::from_secs(1)).unwrap().unwrap();

        let err = tracker.http_call_perform(&q, 99, |_| {}).unwrap_err();
        assert_eq!(err, Error::AccessDenied);
    }

    #[test]
    fn connect_completing_after_cleanup_starts_is_disconnected_not_aborted() {
        let ws = Arc::new(FakeWebSocketProvider::with_connect_delay(200));
        let tracker = NetworkLifecycleTracker::new(Arc::new(FakeHttpProvider::immediate(200)), Some(ws.clone()));
        let q = queue();
        let (tx, rx) = mpsc::channel();
        tracker
            .websocket_connect(&q, "wss://example.test", None, 7, move |result| tx.send(result).unwrap())
            .unwrap();

        let (cleanup_tx, cleanup_rx) = mpsc::channel();
        tracker.cleanup(&q, move |result| cleanup_tx.send(result).unwrap()).unwrap();

        let result = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(result.is_ok());
        assert_eq!(ws.disconnect_count(), 1);
        assert!(tracker.state.lock().connected.is_empty());
        cleanup_rx.recv_timeout(Duration::from_secs(1)).unwrap().unwrap();
    }

    #[test]
    fn failing_websocket_provider_surfaces_its_reason_and_untracks() {
        let provider = Arc::new(FailingWebSocketProvider::new(Error::NotSupported));
        let tracker = NetworkLifecycleTracker::new(Arc::new(FakeHttpProvider::immediate(200)), Some(provider));
        let q = queue();
        let (tx, rx) = mpsc::channel();
        tracker
            .websocket_connect(&q, "wss://example.test", None, 3, move |result| tx.send(result).unwrap())
            .unwrap();
        let result = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(result, Err(Error::NotSupported));
        assert!(tracker.state.lock().connecting.is_empty());
        assert!(tracker.state.lock().connected.is_empty());
    }
}
