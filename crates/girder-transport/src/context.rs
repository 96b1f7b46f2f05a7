//! Per-request call context.
//!
//! One context is built by the pipeline for every HTTP request and cloned
//! into each method invocation (batch elements share it, possibly through a
//! deadline-derived child). It is the only side channel between the transport
//! and user handlers: client id, header/cookie overlay, request-scoped
//! logger, and the cancellation token.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::logger::RequestLogger;
use crate::overlay::RequestOverlay;

#[derive(Debug)]
struct ContextInner {
    client_id: String,
    path: String,
    overlay: Option<RequestOverlay>,
    logger: RequestLogger,
    cancel: CancellationToken,
}

/// Cheaply cloneable handle to the per-request state.
#[derive(Debug, Clone)]
pub struct CallContext {
    inner: Arc<ContextInner>,
}

impl CallContext {
    pub fn new(
        client_id: String,
        path: String,
        overlay: Option<RequestOverlay>,
        logger: RequestLogger,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                client_id,
                path,
                overlay,
                logger,
                cancel,
            }),
        }
    }

    /// A context detached from any HTTP request, for direct invocation of
    /// contract methods (tests, local tooling).
    pub fn detached() -> Self {
        Self::new(
            "unknown".to_string(),
            String::new(),
            None,
            RequestLogger::default(),
            CancellationToken::new(),
        )
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn overlay(&self) -> Option<&RequestOverlay> {
        self.inner.overlay.as_ref()
    }

    pub fn logger(&self) -> &RequestLogger {
        &self.inner.logger
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Derive a child context whose token fires after `timeout`, or when the
    /// parent cancels, whichever comes first. Handlers observing the token
    /// must return promptly; nothing is forcibly interrupted.
    pub fn with_deadline(&self, timeout: Duration) -> Self {
        let child = self.inner.cancel.child_token();
        let timer = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(timeout) => timer.cancel(),
            }
        });
        Self {
            inner: Arc::new(ContextInner {
                client_id: self.inner.client_id.clone(),
                path: self.inner.path.clone(),
                overlay: self.inner.overlay.clone(),
                logger: self.inner.logger.clone(),
                cancel: child,
            }),
        }
    }
}
