//! Diagnostic sink.
//!
//! Backends report problems with input relocations here instead of failing hard, so the
//! driver can decide whether to stop at the first error or keep collecting them.

use std::sync::Mutex;

/// Receives `(location, message)` pairs. Implementations must tolerate concurrent callers.
pub trait DiagnosticSink: Sync {
    fn error(&self, location: &str, message: &str);
}

/// A reported problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub location: String,
    pub message: String,
}

/// The default sink: logs each error through `tracing` and keeps it for later inspection.
#[derive(Debug, Default)]
pub struct Diagnostics {
    errors: Mutex<Vec<Diagnostic>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of errors reported so far.
    pub fn error_count(&self) -> usize {
        self.lock().len()
    }

    /// Snapshot of everything reported so far, in report order.
    pub fn errors(&self) -> Vec<Diagnostic> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Diagnostic>> {
        // Only push mutates the Vec, so a poisoned guard is still consistent.
        self.errors.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DiagnosticSink for Diagnostics {
    fn error(&self, location: &str, message: &str) {
        tracing::error!("{location}: {message}");
        self.lock().push(Diagnostic {
            location: location.to_string(),
            message: message.to_string(),
        });
    }
}
