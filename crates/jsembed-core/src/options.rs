//! Context configuration

use std::fmt;
use std::sync::Arc;

use jsembed_sdk::ObjectId;

/// Receives errors returned by disposers
pub type DisposeErrorHandler = Arc<dyn Fn(ObjectId, &anyhow::Error) + Send + Sync>;

/// Options for creating a context
#[derive(Clone)]
pub struct ContextOptions {
    /// Turn panics in host callbacks into script exceptions
    pub catch_panics: bool,

    /// Called with every disposer error, after it is logged
    pub dispose_error_handler: Option<DisposeErrorHandler>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            catch_panics: true,
            dispose_error_handler: None,
        }
    }
}

impl ContextOptions {
    /// Enable or disable panic containment
    pub fn with_catch_panics(mut self, catch_panics: bool) -> Self {
        self.catch_panics = catch_panics;
        self
    }

    /// Install a disposer error handler
    pub fn on_dispose_error(mut self, handler: impl Fn(ObjectId, &anyhow::Error) + Send + Sync + 'static) -> Self {
        self.dispose_error_handler = Some(Arc::new(handler));
        self
    }
}

impl fmt::Debug for ContextOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextOptions")
            .field("catch_panics", &self.catch_panics)
            .field("dispose_error_handler", &self.dispose_error_handler.is_some())
            .finish()
    }
}
