//! Workflow class registry.
//!
//! The registry maps class names to body factories, enabling workflow
//! instantiation from the persisted `{class, args}` pair. The registry is
//! code, not data: every process that drives workflows must build the same
//! registry from the same registration calls before calling
//! [`Orchestrator::run`](crate::Orchestrator::run).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::context::WorkflowContext;
use crate::error::{Error, Result};

/// Boxed body future produced by a factory.
pub(crate) type BodyFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;

type BodyFactory = Arc<dyn Fn(WorkflowContext, Value) -> BodyFuture + Send + Sync>;

/// Registry mapping workflow class names to body factories.
///
/// # Example
///
/// ```
/// use duraflow::{WorkflowContext, WorkflowRegistry};
/// use serde_json::{Value, json};
///
/// let mut registry = WorkflowRegistry::new();
/// registry
///     .register("greet", |ctx: WorkflowContext, name: String| async move {
///         let greeting = ctx
///             .side_effect(move || Ok(json!(format!("hello {name}"))))
///             .await;
///         Ok(greeting)
///     })
///     .unwrap();
///
/// assert!(registry.contains("greet"));
/// ```
#[derive(Default)]
pub struct WorkflowRegistry {
    factories: HashMap<String, BodyFactory>,
}

impl WorkflowRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow class.
    ///
    /// The factory is a closure from `(context, args)` to the body future.
    /// Args are deserialized from the record's stored JSON into `A`; a
    /// deserialization failure surfaces as a body error and fails the
    /// workflow, matching any other constructor failure.
    ///
    /// Each class name can only be registered once.
    pub fn register<A, F, Fut>(&mut self, class: &str, body: F) -> Result<()>
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(WorkflowContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        if self.factories.contains_key(class) {
            return Err(Error::DuplicateWorkflowClass(class.to_owned()));
        }

        let factory: BodyFactory = Arc::new(move |ctx: WorkflowContext, args: Value| -> BodyFuture {
            match serde_json::from_value::<A>(args) {
                Ok(args) => Box::pin(body(ctx, args)),
                Err(e) => Box::pin(async move {
                    Err(anyhow::Error::new(e).context("failed to deserialize workflow args"))
                }),
            }
        });
        self.factories.insert(class.to_owned(), factory);
        Ok(())
    }

    /// Instantiate the body for a class, or `None` if the class is unknown.
    pub(crate) fn instantiate(
        &self,
        class: &str,
        ctx: WorkflowContext,
        args: Value,
    ) -> Option<BodyFuture> {
        self.factories.get(class).map(|factory| factory(ctx, args))
    }

    /// Check whether a class name is registered.
    pub fn contains(&self, class: &str) -> bool {
        self.factories.contains_key(class)
    }

    /// Number of registered classes.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns `true` if no classes are registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Iterator over registered class names.
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(|s| s.as_str())
    }
}
