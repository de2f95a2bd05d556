//! Process-local task registry.
//!
//! Workers register named task implementations at startup. Each task owns
//! its own parameter parsing; the registry only moves JSON around.

use crate::error::TaskError;
use futures::future::BoxFuture;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

/// The parameters one invocation receives, deep-copied at dispatch time.
#[derive(Debug, Clone, Default)]
pub struct TaskInvocation {
    /// Ordered positional parameters.
    pub args: Vec<JsonValue>,
    /// Keyed parameters.
    pub kwargs: serde_json::Map<String, JsonValue>,
}

impl TaskInvocation {
    /// Creates an invocation from parameter copies.
    #[must_use]
    pub fn new(args: Vec<JsonValue>, kwargs: serde_json::Map<String, JsonValue>) -> Self {
        Self { args, kwargs }
    }

    /// Fetches a required string kwarg.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is missing or not a string.
    pub fn required_str(&self, key: &str) -> Result<&str, TaskError> {
        self.kwargs
            .get(key)
            .and_then(JsonValue::as_str)
            .ok_or_else(|| TaskError::InvalidParameters {
                reason: format!("'{key}' is required and must be a string"),
            })
    }

    /// Fetches an optional string kwarg.
    #[must_use]
    pub fn optional_str(&self, key: &str) -> Option<&str> {
        self.kwargs.get(key).and_then(JsonValue::as_str)
    }
}

/// A registered task implementation.
pub type TaskFn =
    Arc<dyn Fn(TaskInvocation) -> BoxFuture<'static, Result<JsonValue, TaskError>> + Send + Sync>;

/// Map from task name to async implementation.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, TaskFn>,
}

impl TaskRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task under a name, replacing any previous registration.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, task: F)
    where
        F: Fn(TaskInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<JsonValue, TaskError>> + Send + 'static,
    {
        let task: TaskFn = Arc::new(move |invocation| Box::pin(task(invocation)));
        self.tasks.insert(name.into(), task);
    }

    /// Looks up a task by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<TaskFn> {
        self.tasks.get(name).cloned()
    }

    /// Returns the registered task names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tasks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Registers the built-in `noop` task used for wiring checks.
    pub fn register_noop(&mut self) {
        self.register("noop", |_invocation| async {
            Ok(serde_json::json!({"noop": true}))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn register_and_invoke() {
        let mut registry = TaskRegistry::new();
        registry.register("double", |invocation: TaskInvocation| async move {
            let n = invocation.kwargs["n"].as_i64().unwrap_or(0);
            Ok(json!({"doubled": n * 2}))
        });

        let task = registry.get("double").unwrap();
        let mut kwargs = serde_json::Map::new();
        kwargs.insert("n".to_string(), json!(21));

        let result = task(TaskInvocation::new(Vec::new(), kwargs)).await.unwrap();
        assert_eq!(result["doubled"], 42);
    }

    #[test]
    fn unknown_task_is_none() {
        let registry = TaskRegistry::new();
        assert!(registry.get("ghost").is_none());
    }

    #[test]
    fn names_are_sorted() {
        let mut registry = TaskRegistry::new();
        registry.register_noop();
        registry.register("alpha", |_| async { Ok(json!(null)) });

        assert_eq!(registry.names(), vec!["alpha", "noop"]);
    }

    #[tokio::test]
    async fn invocation_parameter_helpers() {
        let mut kwargs = serde_json::Map::new();
        kwargs.insert("period_type".to_string(), json!("yesterday"));
        kwargs.insert("count".to_string(), json!(3));
        let invocation = TaskInvocation::new(Vec::new(), kwargs);

        assert_eq!(invocation.required_str("period_type").unwrap(), "yesterday");
        assert!(invocation.required_str("missing").is_err());
        assert!(invocation.required_str("count").is_err());
        assert_eq!(invocation.optional_str("market"), None);
    }
}
