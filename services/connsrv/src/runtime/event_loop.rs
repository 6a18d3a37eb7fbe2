//! Explicit event loop handle
//!
//! Components that spawn tasks take an [`EventLoop`] instead of reaching for
//! an ambient runtime, so tests and the service can choose where work runs.

use std::future::Future;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorExt, Result};

/// Runtime handle plus the shutdown token shared by everything spawned on it
#[derive(Debug, Clone)]
pub struct EventLoop {
    handle: Handle,
    shutdown: CancellationToken,
}

impl EventLoop {
    pub fn new(handle: Handle, shutdown: CancellationToken) -> Self {
        Self { handle, shutdown }
    }

    /// Handle of the runtime driving the caller
    pub fn try_current() -> Result<Self> {
        let handle = Handle::try_current().context("No async runtime available")?;
        Ok(Self::new(handle, CancellationToken::new()))
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Token cancelled together with the loop's shutdown token
    pub fn child_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Loop sharing the runtime whose shutdown is scoped under this one
    pub fn scoped(&self) -> Self {
        Self::new(self.handle.clone(), self.child_token())
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_no_runtime() {
        assert!(EventLoop::try_current().is_err());
    }

    #[tokio::test]
    async fn test_scoped_shutdown() {
        let event_loop = EventLoop::try_current().unwrap();
        let scoped = event_loop.scoped();
        let task = scoped.spawn({
            let token = scoped.shutdown_token().clone();
            async move { token.cancelled().await }
        });

        event_loop.shutdown_token().cancel();
        task.await.unwrap();
        assert!(scoped.is_shutting_down());
    }
}
