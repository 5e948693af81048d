//! Worker spec resolution.
//!
//! The CLI identifies a work unit by a `"module:function"`-style spec. The
//! dynamic symbol lookup of the original design is externalized: embedders
//! (and the forkd binary itself) register named factories up front, and
//! resolution is a plain map lookup. Resolution failure is fatal at startup,
//! before any process is forked.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ForkdError, Result};
use crate::worker::builtin::{BatchWorker, TickWorker};
use crate::worker::WorkerFactory;

/// Registry of named worker factories.
#[derive(Default)]
pub struct WorkerRegistry {
    factories: HashMap<String, WorkerFactory>,
}

impl WorkerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with the built-in demo workers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("builtin:tick", Arc::new(|ctx| {
            Box::new(TickWorker::from_context(ctx))
        }));
        registry.register("builtin:batch", Arc::new(|ctx| {
            Box::new(BatchWorker::from_context(ctx))
        }));
        registry
    }

    /// Register a factory under a `module:function` spec.
    ///
    /// Re-registering a spec replaces the previous factory.
    pub fn register(&mut self, spec: impl Into<String>, factory: WorkerFactory) {
        self.factories.insert(spec.into(), factory);
    }

    /// Resolve a worker spec to its factory.
    pub fn resolve(&self, spec: &str) -> Result<WorkerFactory> {
        if !spec.contains(':') {
            return Err(ForkdError::InvalidWorkerSpec(spec.to_string()));
        }
        self.factories
            .get(spec)
            .cloned()
            .ok_or_else(|| ForkdError::WorkerSpec(spec.to_string()))
    }

    /// Registered spec names, for diagnostics.
    pub fn specs(&self) -> Vec<&str> {
        let mut specs: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        specs.sort_unstable();
        specs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as ForkdResult;
    use crate::worker::{StepOutcome, Worker, WorkerContext};

    struct Noop;

    impl Worker for Noop {
        fn step(&mut self) -> ForkdResult<StepOutcome> {
            Ok(StepOutcome::Complete)
        }
    }

    #[test]
    fn test_builtins_resolve() {
        let registry = WorkerRegistry::with_builtins();
        assert!(registry.resolve("builtin:tick").is_ok());
        assert!(registry.resolve("builtin:batch").is_ok());
    }

    #[test]
    fn test_unknown_spec_fails() {
        let registry = WorkerRegistry::with_builtins();
        let err = match registry.resolve("nosuch:worker") {
            Err(e) => e,
            Ok(_) => panic!("expected resolve to fail"),
        };
        assert!(matches!(err, ForkdError::WorkerSpec(_)));
        assert!(err.to_string().contains("nosuch:worker"));
    }

    #[test]
    fn test_spec_without_colon_is_invalid() {
        let registry = WorkerRegistry::with_builtins();
        let err = match registry.resolve("tick") {
            Err(e) => e,
            Ok(_) => panic!("expected resolve to fail"),
        };
        assert!(matches!(err, ForkdError::InvalidWorkerSpec(_)));
    }

    #[test]
    fn test_register_custom_factory() {
        let mut registry = WorkerRegistry::new();
        registry.register("app:noop", Arc::new(|_ctx| Box::new(Noop)));

        let factory = registry.resolve("app:noop").unwrap();
        let mut worker = factory(&WorkerContext::default());
        assert_eq!(worker.step().unwrap(), StepOutcome::Complete);
    }

    #[test]
    fn test_specs_sorted() {
        let registry = WorkerRegistry::with_builtins();
        assert_eq!(registry.specs(), vec!["builtin:batch", "builtin:tick"]);
    }
}
