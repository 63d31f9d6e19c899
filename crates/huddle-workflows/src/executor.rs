//! Step execution.
//!
//! Step failures are data, not errors: transport problems, timeouts, non-2xx
//! responses, and unknown function names all come back as a failed
//! [`StepResult`] so the engine can apply stop-on-error uniformly. The one
//! exception is an unsupported step type, which is an executor-level error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::WorkflowError;
use crate::model::{Step, StepKind, StepResult};

/// Default per-step timeout when a step does not override it.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// A locally registered step operation.
#[async_trait]
pub trait StepFn: Send + Sync {
    /// Run the operation against the execution input.
    ///
    /// `Err` is a step failure description, not a run-level error.
    async fn call(&self, input: &Value) -> Result<Value, String>;
}

/// Named local operations available to `function` steps.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn StepFn>>,
}

impl FunctionRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation under a name, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, function: Arc<dyn StepFn>) {
        let _ = self.functions.insert(name.into(), function);
    }

    fn get(&self, name: &str) -> Option<&Arc<dyn StepFn>> {
        self.functions.get(name)
    }
}

/// Runs individual steps.
pub struct StepExecutor {
    http: reqwest::Client,
    functions: FunctionRegistry,
    default_timeout: Duration,
}

impl StepExecutor {
    /// Build an executor with the given registry and default HTTP timeout.
    #[must_use]
    pub fn new(functions: FunctionRegistry, default_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            functions,
            default_timeout,
        }
    }

    /// Run one step against the execution input.
    pub async fn run(&self, step: &Step, input: &Value) -> Result<StepResult, WorkflowError> {
        let started = std::time::Instant::now();
        let result = match &step.kind {
            StepKind::Http {
                url,
                method,
                timeout_secs,
            } => Ok(self.run_http(&step.name, url, method, *timeout_secs, input).await),
            StepKind::Function { name } => Ok(self.run_function(&step.name, name, input).await),
            StepKind::Unsupported(ty) => {
                warn!(step = step.name, step_type = ty, "refusing unsupported step type");
                Err(WorkflowError::UnsupportedStepType(ty.clone()))
            }
        };
        histogram!("workflow_step_duration_seconds").record(started.elapsed().as_secs_f64());
        if let Ok(step_result) = &result {
            let outcome = if step_result.success { "success" } else { "failure" };
            counter!("workflow_steps_total", "outcome" => outcome).increment(1);
            debug!(step = step.name, outcome, "step finished");
        }
        result
    }

    async fn run_http(
        &self,
        step_name: &str,
        url: &str,
        method: &str,
        timeout_secs: Option<u64>,
        input: &Value,
    ) -> StepResult {
        let method = match reqwest::Method::from_bytes(method.as_bytes()) {
            Ok(m) => m,
            Err(_) => return StepResult::failure(step_name, format!("invalid method: {method}")),
        };
        let timeout = timeout_secs.map_or(self.default_timeout, Duration::from_secs);
        let request = self
            .http
            .request(method, url)
            .timeout(timeout)
            .json(input);
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return StepResult::failure(step_name, e.to_string()),
        };
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if status.is_success() {
            StepResult::success(
                step_name,
                serde_json::json!({ "status": status.as_u16(), "body": body }),
            )
        } else {
            StepResult::failure(step_name, format!("http status {}", status.as_u16()))
        }
    }

    async fn run_function(&self, step_name: &str, function: &str, input: &Value) -> StepResult {
        let Some(f) = self.functions.get(function) else {
            return StepResult::failure(step_name, format!("unknown function: {function}"));
        };
        match f.call(input).await {
            Ok(data) => StepResult::success(step_name, data),
            Err(e) => StepResult::failure(step_name, e),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Echo;

    #[async_trait]
    impl StepFn for Echo {
        async fn call(&self, input: &Value) -> Result<Value, String> {
            Ok(input.clone())
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl StepFn for AlwaysFails {
        async fn call(&self, _input: &Value) -> Result<Value, String> {
            Err("nope".into())
        }
    }

    fn executor() -> StepExecutor {
        let mut registry = FunctionRegistry::new();
        registry.register("echo", Arc::new(Echo));
        registry.register("fail", Arc::new(AlwaysFails));
        StepExecutor::new(registry, Duration::from_secs(2))
    }

    fn http_step(name: &str, url: String) -> Step {
        Step::new(
            name,
            StepKind::Http {
                url,
                method: "POST".into(),
                timeout_secs: None,
            },
        )
    }

    #[tokio::test]
    async fn function_step_success() {
        let exec = executor();
        let step = Step::new("e", StepKind::Function { name: "echo".into() });
        let input = serde_json::json!({"k": "v"});
        let result = exec.run(&step, &input).await.unwrap();
        assert!(result.success);
        assert_eq!(result.data.unwrap()["k"], "v");
    }

    #[tokio::test]
    async fn function_step_failure_is_a_result() {
        let exec = executor();
        let step = Step::new("f", StepKind::Function { name: "fail".into() });
        let result = exec.run(&step, &Value::Null).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("nope"));
    }

    #[tokio::test]
    async fn unknown_function_is_a_failure_not_an_error() {
        let exec = executor();
        let step = Step::new("g", StepKind::Function { name: "ghost".into() });
        let result = exec.run(&step, &Value::Null).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn unsupported_type_is_an_error() {
        let exec = executor();
        let step = Step::new("w", StepKind::Unsupported("webhook".into()));
        let err = exec.run(&step, &Value::Null).await.unwrap_err();
        assert!(matches!(err, WorkflowError::UnsupportedStepType(ty) if ty == "webhook"));
    }

    #[tokio::test]
    async fn http_step_success_captures_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let exec = executor();
        let step = http_step("call", format!("{}/hook", server.uri()));
        let result = exec.run(&step, &serde_json::json!({})).await.unwrap();
        assert!(result.success);
        let data = result.data.unwrap();
        assert_eq!(data["status"], 200);
        assert_eq!(data["body"]["ok"], true);
    }

    #[tokio::test]
    async fn http_non_2xx_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let exec = executor();
        let step = http_step("call", format!("{}/hook", server.uri()));
        let result = exec.run(&step, &Value::Null).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn http_timeout_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let exec = executor();
        let step = Step::new(
            "slow",
            StepKind::Http {
                url: format!("{}/slow", server.uri()),
                method: "POST".into(),
                timeout_secs: Some(1),
            },
        );
        let result = exec.run(&step, &Value::Null).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn http_transport_error_is_a_failure() {
        let exec = executor();
        // Nothing listens here.
        let step = http_step("dead", "http://127.0.0.1:1/hook".into());
        let result = exec.run(&step, &Value::Null).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn invalid_method_is_a_failure() {
        let exec = executor();
        let step = Step::new(
            "bad",
            StepKind::Http {
                url: "http://example.test".into(),
                method: "NOT A METHOD".into(),
                timeout_secs: None,
            },
        );
        let result = exec.run(&step, &Value::Null).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("invalid method"));
    }

    #[tokio::test]
    async fn registry_replaces_on_duplicate_name() {
        let mut registry = FunctionRegistry::new();
        registry.register("op", Arc::new(AlwaysFails));
        registry.register("op", Arc::new(Echo));
        let exec = StepExecutor::new(registry, Duration::from_secs(1));
        let step = Step::new("op", StepKind::Function { name: "op".into() });
        let result = exec.run(&step, &serde_json::json!(1)).await.unwrap();
        assert!(result.success);
    }
}
