//! The external collaborator seams this crate speaks against (§6): the protocol adapters
//! themselves (WinHTTP, libcurl, OkHttp, NSURLSession, a websocket++ wrapper) live outside
//! this crate entirely. [`NetworkLifecycleTracker`](super::NetworkLifecycleTracker) only
//! ever holds them as trait objects.

use crate::async_provider::AsyncOperation;
use crate::error::Result;
use std::sync::Arc;

/// One in-flight or completed HTTP call, opaque to the core; the provider sets its result
/// through whatever mechanism it owns outside this crate.
pub type HttpCallHandle = u64;

/// One WebSocket connection, opaque to the core.
pub type WebSocketHandle = u64;

/// Implemented by the HTTP protocol adapter. `perform` is expected to arrange for `op` to
/// eventually be completed (via [`AsyncOperation::complete`]) from whatever thread the
/// adapter's own I/O machinery runs on; this trait's method itself only launches the call.
pub trait HttpProvider: Send + Sync {
    fn perform(&self, call_handle: HttpCallHandle, op: &Arc<AsyncOperation>) -> Result<()>;

    /// Invoked exactly once, after every tracked call and connection has drained.
    fn cleanup(&self) -> Result<()>;
}

/// Implemented by the WebSocket protocol adapter.
pub trait WebSocketProvider: Send + Sync {
    fn connect(
        &self,
        uri: &str,
        subprotocol: Option<&str>,
        ws_handle: WebSocketHandle,
        op: &Arc<AsyncOperation>,
    ) -> Result<()>;

    fn send_text(&self, ws_handle: WebSocketHandle, message: &str) -> Result<()>;

    fn send_binary(&self, ws_handle: WebSocketHandle, bytes: &[u8]) -> Result<()>;

    fn disconnect(&self, ws_handle: WebSocketHandle, close_status: u16) -> Result<()>;
}
