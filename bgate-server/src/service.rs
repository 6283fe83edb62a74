//! I/O-thread lifecycle for an embedded web service.

use std::thread::{self, JoinHandle};

use bgate_common::error::{GateError, GateResult};
use bgate_web::{ManagerHandle, WebHandler, WebManager};
use tracing::info;

/// Owns the I/O thread running one [`WebManager`] poll loop.
pub struct WebService {
    io: ManagerHandle,
    thread: Option<JoinHandle<GateResult<()>>>,
}

impl WebService {
    /// Moves the manager and handler onto a dedicated I/O thread and starts the poll loop.
    ///
    /// # Errors
    ///
    /// Returns `GateError::Io` when the thread cannot be spawned.
    pub fn start<H>(manager: WebManager, handler: H) -> GateResult<Self>
    where
        H: WebHandler + Send + 'static,
    {
        let io = manager.handle();
        if let Some(priority) = manager.settings().web_priority {
            // No portable thread-priority API; the knob stays advisory.
            info!(priority, "web_priority is advisory, io thread runs at default priority");
        }
        let thread = thread::Builder::new()
            .name("bgate-io".to_owned())
            .spawn(move || {
                let mut manager = manager;
                let mut handler = handler;
                manager.run(&mut handler)
            })
            .map_err(|error| GateError::Io(format!("spawn io thread failed: {error}")))?;
        Ok(Self {
            io,
            thread: Some(thread),
        })
    }

    /// Cross-thread handle for sends and shutdown.
    #[must_use]
    pub fn handle(&self) -> ManagerHandle {
        self.io.clone()
    }

    /// Signals the poll loop to drain every connection and joins the I/O thread.
    ///
    /// # Errors
    ///
    /// Propagates the poll loop's exit result; returns `GateError::InvalidState` when the I/O
    /// thread panicked.
    pub fn stop(mut self) -> GateResult<()> {
        self.io.stop();
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        thread
            .join()
            .map_err(|_| GateError::InvalidState("io thread panicked"))?
    }
}
