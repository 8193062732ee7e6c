//! Isolates
//!
//! An [`Isolate`] owns one engine isolate and its entry lock. Contexts keep
//! their isolate alive; the engine isolate is released when the last
//! reference goes away.

use std::fmt;
use std::sync::Arc;

use jsembed_sdk::{Engine, IsolateHandle, IsolateOptions};

use crate::error::BridgeResult;
use crate::pin::{EntryGuard, EntryLock, SuspendGuard};

pub(crate) struct IsolateInner {
    engine: Arc<dyn Engine>,
    handle: IsolateHandle,
    entry: EntryLock,
    options: IsolateOptions,
}

impl IsolateInner {
    pub(crate) fn engine_arc(&self) -> Arc<dyn Engine> {
        self.engine.clone()
    }

    pub(crate) fn enter(&self) -> EntryGuard<'_> {
        self.entry.enter()
    }

    pub(crate) fn suspend(&self) -> SuspendGuard<'_> {
        self.entry.suspend()
    }
}

impl Drop for IsolateInner {
    fn drop(&mut self) {
        self.engine.release_isolate(self.handle);
        tracing::debug!(isolate = ?self.handle, "isolate released");
    }
}

/// A JavaScript isolate: one engine heap entered by one thread at a time
#[derive(Clone)]
pub struct Isolate {
    inner: Arc<IsolateInner>,
}

impl Isolate {
    /// Create an isolate with default options
    pub fn new(engine: Arc<dyn Engine>) -> BridgeResult<Self> {
        Self::with_options(engine, IsolateOptions::default())
    }

    /// Create an isolate
    pub fn with_options(engine: Arc<dyn Engine>, options: IsolateOptions) -> BridgeResult<Self> {
        let handle = engine.create_isolate(&options)?;
        tracing::debug!(isolate = ?handle, limits = ?options.limits, "isolate created");
        Ok(Self {
            inner: Arc::new(IsolateInner {
                engine,
                handle,
                entry: EntryLock::new(),
                options,
            }),
        })
    }

    /// Stop the script currently running in this isolate.
    ///
    /// Safe to call from any thread; does nothing when no script runs. The
    /// interrupted call returns an execution error.
    pub fn terminate(&self) {
        tracing::debug!(isolate = ?self.inner.handle, "terminating execution");
        self.inner.engine.terminate(self.inner.handle);
    }

    /// Let the engine run queued background tasks. Returns true if one ran.
    pub fn pump_message_loop(&self) -> bool {
        let _entry = self.inner.enter();
        self.inner.engine.pump_message_loop(self.inner.handle)
    }

    /// The options this isolate was created with
    pub fn options(&self) -> &IsolateOptions {
        &self.inner.options
    }

    /// The engine isolate handle
    pub fn handle(&self) -> IsolateHandle {
        self.inner.handle
    }

    pub(crate) fn inner(&self) -> &Arc<IsolateInner> {
        &self.inner
    }
}

impl fmt::Debug for Isolate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Isolate").field("handle", &self.inner.handle).finish()
    }
}
