//! Isolate configuration handed to the engine at creation

/// Resource limits for an isolate.
///
/// The host only forwards these to [`crate::Engine::create_isolate`];
/// enforcing them is up to the engine backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Maximum heap size in bytes (None = engine default)
    pub max_heap_bytes: Option<usize>,

    /// Maximum native stack used by script execution (None = engine default)
    pub max_stack_bytes: Option<usize>,
}

impl ResourceLimits {
    /// Create unlimited resource limits
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Create resource limits with specific heap size
    pub fn with_heap_limit(max_heap_bytes: usize) -> Self {
        Self {
            max_heap_bytes: Some(max_heap_bytes),
            ..Default::default()
        }
    }

    /// Create resource limits with specific stack size
    pub fn with_stack_limit(max_stack_bytes: usize) -> Self {
        Self {
            max_stack_bytes: Some(max_stack_bytes),
            ..Default::default()
        }
    }
}

/// Options for creating an isolate.
///
/// Passed through to the engine unchanged; the bridge itself does not act
/// on any of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolateOptions {
    /// Resource limits
    pub limits: ResourceLimits,

    /// Record stack traces for uncaught exceptions (backend-defined; a
    /// backend without stack traces ignores it)
    pub capture_stack_traces: bool,
}

impl Default for IsolateOptions {
    fn default() -> Self {
        Self {
            limits: ResourceLimits::default(),
            capture_stack_traces: true,
        }
    }
}

impl IsolateOptions {
    /// Replace the resource limits
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_limits_default() {
        let limits = ResourceLimits::default();
        assert!(limits.max_heap_bytes.is_none());
        assert!(limits.max_stack_bytes.is_none());
    }

    #[test]
    fn test_resource_limits_builders() {
        let limits = ResourceLimits::with_heap_limit(64 * 1024 * 1024);
        assert_eq!(limits.max_heap_bytes, Some(64 * 1024 * 1024));
        assert!(limits.max_stack_bytes.is_none());

        let limits = ResourceLimits::with_stack_limit(512 * 1024);
        assert_eq!(limits.max_stack_bytes, Some(512 * 1024));
    }

    #[test]
    fn test_isolate_options_default_captures_traces() {
        let options = IsolateOptions::default();
        assert!(options.capture_stack_traces);
        assert_eq!(options.limits, ResourceLimits::unlimited());
    }
}
