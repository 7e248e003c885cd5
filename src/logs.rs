//! Action container output capture.
//!
//! Capturing is best-effort: a capturer is started beside the wait and
//! never influences the action's terminal state. Its own failures are
//! logged and dropped.

use crate::context::Context;
use async_trait::async_trait;
use tracing::info;

/// Streams a running container's output into the runtime's log sink.
#[async_trait]
pub trait LogCapturer: Send + Sync {
    /// Starts capturing output of `container_id` until `ctx` is done.
    ///
    /// Returns immediately; any streaming runs in the background.
    async fn capture_logs(&self, ctx: &Context, container_id: &str);
}

/// Capturer for deployments without real container output.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogCapturer;

#[async_trait]
impl LogCapturer for NoopLogCapturer {
    async fn capture_logs(&self, _ctx: &Context, _container_id: &str) {}
}

/// Capturer for tasks attached to the runtime's standard I/O.
///
/// The engine already forwards task output to the runtime's stdout and
/// stderr; this capturer frames it in the structured log so interleaved
/// output can be attributed to a container.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdioLogCapturer;

#[async_trait]
impl LogCapturer for StdioLogCapturer {
    async fn capture_logs(&self, ctx: &Context, container_id: &str) {
        info!(container_id, "Container output follows on stdio");
        let ctx = ctx.clone();
        let container_id = container_id.to_string();
        tokio::spawn(async move {
            ctx.done().await;
            info!(container_id = %container_id, "Container output ended");
        });
    }
}
