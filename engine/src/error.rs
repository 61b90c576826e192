//! Engine-internal error type.
//!
//! A plain `kind` + `description` + `module` struct rather than a
//! `thiserror`-derived enum, since no error-derive crate appears
//! anywhere in this workspace's dependency stack.
use std::fmt;

#[derive(Debug)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub description: String,
    pub module: &'static str,
}

/// Classifies errors by how the engine should react to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// OOM on worker init, pipe/socket bind failure — aborts the process.
    Setup,
    /// Source closed, PSYNC timeout — source returns to `NONE`, cron re-dials.
    SourceRecoverable,
    /// Target write error or refused connect — target socket closes, cron re-dials.
    TargetRecoverable,
    /// Malformed byte stream from a source — dumped at NOTICE level, not fatal.
    Parse,
    /// No backend owns a key, or a target group is misconfigured.
    Routing,
    /// Segment/Msg pool exhausted — caller retries on the next readiness event.
    PoolExhausted,
}

impl EngineError {
    pub fn new(kind: ErrorKind, module: &'static str, description: impl Into<String>) -> Self {
        EngineError {
            kind,
            description: description.into(),
            module,
        }
    }

    pub fn setup(module: &'static str, description: impl Into<String>) -> Self {
        Self::new(ErrorKind::Setup, module, description)
    }

    pub fn source_recoverable(module: &'static str, description: impl Into<String>) -> Self {
        Self::new(ErrorKind::SourceRecoverable, module, description)
    }

    pub fn target_recoverable(module: &'static str, description: impl Into<String>) -> Self {
        Self::new(ErrorKind::TargetRecoverable, module, description)
    }

    pub fn parse(module: &'static str, description: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, module, description)
    }

    pub fn routing(module: &'static str, description: impl Into<String>) -> Self {
        Self::new(ErrorKind::Routing, module, description)
    }

    pub fn pool_exhausted(module: &'static str) -> Self {
        Self::new(ErrorKind::PoolExhausted, module, "pool exhausted")
    }

    /// Fatal-setup errors are the only kind that should ever propagate out
    /// of `main`; everything else is recorded on the affected node/target
    /// and logged — the orchestrator never observes per-message errors.
    pub fn is_fatal(&self) -> bool {
        self.kind == ErrorKind::Setup
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}: {}", self.kind, self.module, self.description)
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_setup_errors_are_fatal() {
        assert!(EngineError::setup("ORCHESTRATOR", "bind failed").is_fatal());
        assert!(!EngineError::target_recoverable("WRITER", "connect refused").is_fatal());
        assert!(!EngineError::parse("WRITER", "bad byte stream").is_fatal());
    }

    #[test]
    fn display_includes_module_and_description() {
        let e = EngineError::routing("ROUTING", "no backend for slot 42");
        let rendered = e.to_string();
        assert!(rendered.contains("ROUTING"));
        assert!(rendered.contains("slot 42"));
    }
}
