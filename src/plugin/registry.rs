//! Named operations exposed by a plugin.
//!
//! The registry is filled before serving starts and is read-only afterwards,
//! so it can be shared behind an `Arc` without locking.

use crate::error::{OperationError, RegistryError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// What the dispatcher does once the reply has been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterReply {
    Continue,
    Shutdown,
}

/// Successful result of an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub value: Value,
    pub after: AfterReply,
}

impl Reply {
    pub fn value(value: Value) -> Self {
        Self {
            value,
            after: AfterReply::Continue,
        }
    }

    /// Reply and then stop serving.
    pub fn shutdown(value: Value) -> Self {
        Self {
            value,
            after: AfterReply::Shutdown,
        }
    }
}

/// A host-invocable function: one argument in, one result or error out.
#[async_trait]
pub trait Operation: Send + Sync + 'static {
    async fn call(&self, arg: Value) -> Result<Reply, OperationError>;
}

/// Adapts a plain closure into an [`Operation`].
pub struct FnOperation<F>(F);

#[async_trait]
impl<F> Operation for FnOperation<F>
where
    F: Fn(Value) -> Result<Value, OperationError> + Send + Sync + 'static,
{
    async fn call(&self, arg: Value) -> Result<Reply, OperationError> {
        (self.0)(arg).map(Reply::value)
    }
}

#[derive(Default)]
pub struct OperationRegistry {
    operations: HashMap<String, Arc<dyn Operation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `revert` and `exit` operations.
    pub fn with_builtins() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        registry.register_builtins()?;
        Ok(registry)
    }

    /// Adds `revert` and `exit`. Fails if either name is already taken.
    pub fn register_builtins(&mut self) -> Result<&mut Self, RegistryError> {
        self.register(super::operations::REVERT, super::operations::Revert)?
            .register(super::operations::EXIT, super::operations::Exit)
    }

    pub fn register<O: Operation>(
        &mut self,
        name: impl Into<String>,
        operation: O,
    ) -> Result<&mut Self, RegistryError> {
        let name = name.into();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.operations.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }

        tracing::debug!(operation = %name, "Registered operation");
        self.operations.insert(name, Arc::new(operation));
        Ok(self)
    }

    pub fn register_fn<F>(
        &mut self,
        name: impl Into<String>,
        f: F,
    ) -> Result<&mut Self, RegistryError>
    where
        F: Fn(Value) -> Result<Value, OperationError> + Send + Sync + 'static,
    {
        self.register(name, FnOperation(f))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Operation>> {
        self.operations.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
