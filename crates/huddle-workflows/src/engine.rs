//! Sequential workflow execution.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument, warn};

use huddle_core::{UserId, WorkflowId};
use huddle_realtime::IdentityGate;

use crate::error::WorkflowError;
use crate::executor::StepExecutor;
use crate::model::{ExecutionOutcome, ExecutionRecord, RecordStatus, WorkflowInstance};

/// One history entry with `executed_by` resolved to a display identity.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Display name of the triggering user, or their raw ID when unknown.
    pub executed_by: String,
    /// Aggregate status.
    pub status: RecordStatus,
    /// Full outcome.
    pub result: ExecutionOutcome,
    /// When the record was appended.
    pub timestamp: String,
}

/// In-memory workflow store plus the execution path.
///
/// Each instance sits behind its own `Mutex`, held for the whole of an
/// execute invocation: concurrent executes against one workflow serialize,
/// and their history records never interleave. Executes against different
/// workflows do not contend.
pub struct WorkflowEngine {
    instances: RwLock<HashMap<WorkflowId, Arc<Mutex<WorkflowInstance>>>>,
    executor: StepExecutor,
    directory: Arc<dyn IdentityGate>,
}

impl WorkflowEngine {
    /// Build an engine over a step executor and an identity directory.
    #[must_use]
    pub fn new(executor: StepExecutor, directory: Arc<dyn IdentityGate>) -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            executor,
            directory,
        }
    }

    /// Store a workflow instance, returning its ID.
    pub async fn insert(&self, instance: WorkflowInstance) -> WorkflowId {
        let id = instance.id.clone();
        let _ = self
            .instances
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(instance)));
        id
    }

    /// Snapshot a workflow instance.
    pub async fn get(&self, id: &WorkflowId) -> Option<WorkflowInstance> {
        let handle = self.instances.read().await.get(id).cloned()?;
        let instance = handle.lock().await;
        Some(instance.clone())
    }

    /// Remove a workflow instance.
    pub async fn remove(&self, id: &WorkflowId) -> bool {
        self.instances.write().await.remove(id).is_some()
    }

    /// Run a workflow's steps in order, from the first step.
    ///
    /// Always starts at index 0 regardless of `current_step`; advancement
    /// metadata belongs to the manual step operations. Step failures never
    /// surface as errors here: the outcome carries them, stop-on-error
    /// halts the run, and exactly one history record is appended whether
    /// the run succeeded, failed, or broke on an unsupported step type.
    /// The only error is `NotFound`, raised before anything is recorded.
    #[instrument(skip_all, fields(workflow_id = %id, executed_by = %executed_by))]
    pub async fn execute(
        &self,
        id: &WorkflowId,
        input: &Value,
        executed_by: UserId,
    ) -> Result<ExecutionOutcome, WorkflowError> {
        let handle = self
            .instances
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| WorkflowError::NotFound(id.clone()))?;
        let mut instance = handle.lock().await;

        let mut results = Vec::new();
        let mut run_error = None;
        for step in &instance.steps {
            match self.executor.run(step, input).await {
                Ok(result) => {
                    let failed = !result.success;
                    results.push(result);
                    if failed && step.stop_on_error {
                        info!(step = step.name, "halting run on step failure");
                        break;
                    }
                }
                Err(e) => {
                    warn!(step = step.name, error = %e, "run broke");
                    run_error = Some(e.to_string());
                    break;
                }
            }
        }

        let success = run_error.is_none() && results.iter().all(|r| r.success);
        let outcome = ExecutionOutcome {
            success,
            results,
            error: run_error,
        };
        instance
            .execution_history
            .push(ExecutionRecord::new(executed_by, outcome.clone()));
        let status = if success { "completed" } else { "failed" };
        counter!("workflow_executions_total", "status" => status).increment(1);
        info!(status, steps = outcome.results.len(), "workflow run recorded");
        Ok(outcome)
    }

    /// Read-only history projection with resolved display identities.
    pub async fn history(&self, id: &WorkflowId) -> Result<Vec<HistoryEntry>, WorkflowError> {
        let instance = self
            .get(id)
            .await
            .ok_or_else(|| WorkflowError::NotFound(id.clone()))?;
        let mut entries = Vec::with_capacity(instance.execution_history.len());
        for record in instance.execution_history {
            let executed_by = self
                .directory
                .display_name(&record.executed_by)
                .await
                .unwrap_or_else(|| record.executed_by.to_string());
            entries.push(HistoryEntry {
                executed_by,
                status: record.status,
                result: record.result,
                timestamp: record.timestamp,
            });
        }
        Ok(entries)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{FunctionRegistry, StepFn};
    use crate::model::{Step, StepKind};
    use async_trait::async_trait;
    use huddle_realtime::InMemoryIdentityGate;
    use std::time::Duration;

    struct Ok1;

    #[async_trait]
    impl StepFn for Ok1 {
        async fn call(&self, _input: &Value) -> Result<Value, String> {
            Ok(serde_json::json!({"ok": true}))
        }
    }

    struct Boom;

    #[async_trait]
    impl StepFn for Boom {
        async fn call(&self, _input: &Value) -> Result<Value, String> {
            Err("boom".into())
        }
    }

    struct Slow;

    #[async_trait]
    impl StepFn for Slow {
        async fn call(&self, _input: &Value) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(Value::Null)
        }
    }

    fn engine() -> WorkflowEngine {
        let mut registry = FunctionRegistry::new();
        registry.register("ok", Arc::new(Ok1));
        registry.register("boom", Arc::new(Boom));
        registry.register("slow", Arc::new(Slow));
        WorkflowEngine::new(
            StepExecutor::new(registry, Duration::from_secs(2)),
            Arc::new(InMemoryIdentityGate::new()),
        )
    }

    fn function_step(name: &str, function: &str) -> Step {
        Step::new(name, StepKind::Function { name: function.into() })
    }

    async fn store(engine: &WorkflowEngine, steps: Vec<Step>) -> WorkflowId {
        engine
            .insert(WorkflowInstance::new("wf", UserId::from("creator"), steps))
            .await
    }

    #[tokio::test]
    async fn all_steps_succeed() {
        let engine = engine();
        let id = store(&engine, vec![function_step("a", "ok"), function_step("b", "ok")]).await;
        let outcome = engine
            .execute(&id, &Value::Null, UserId::from("u1"))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.results.len(), 2);

        let wf = engine.get(&id).await.unwrap();
        assert_eq!(wf.execution_history.len(), 1);
        assert_eq!(wf.execution_history[0].status, RecordStatus::Completed);
    }

    #[tokio::test]
    async fn stop_on_error_halts_the_run() {
        let engine = engine();
        let id = store(
            &engine,
            vec![
                function_step("a", "boom").stop_on_error(true),
                function_step("b", "ok"),
            ],
        )
        .await;
        let outcome = engine
            .execute(&id, &Value::Null, UserId::from("u1"))
            .await
            .unwrap();
        assert!(!outcome.success);
        // Only the failing step was attempted.
        assert_eq!(outcome.results.len(), 1);

        let wf = engine.get(&id).await.unwrap();
        assert_eq!(wf.execution_history.len(), 1);
        assert_eq!(wf.execution_history[0].status, RecordStatus::Failed);
    }

    #[tokio::test]
    async fn failure_without_stop_on_error_continues() {
        let engine = engine();
        let id = store(
            &engine,
            vec![
                function_step("a", "boom").stop_on_error(false),
                function_step("b", "ok"),
            ],
        )
        .await;
        let outcome = engine
            .execute(&id, &Value::Null, UserId::from("u1"))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.results.len(), 2);
        assert!(!outcome.results[0].success);
        assert!(outcome.results[1].success);

        let wf = engine.get(&id).await.unwrap();
        assert_eq!(wf.execution_history[0].status, RecordStatus::Failed);
    }

    #[tokio::test]
    async fn empty_steps_is_vacuous_success() {
        let engine = engine();
        let id = store(&engine, vec![]).await;
        let outcome = engine
            .execute(&id, &Value::Null, UserId::from("u1"))
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(outcome.results.is_empty());

        let wf = engine.get(&id).await.unwrap();
        assert_eq!(wf.execution_history.len(), 1);
        assert_eq!(wf.execution_history[0].status, RecordStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_workflow_records_nothing() {
        let engine = engine();
        let err = engine
            .execute(&WorkflowId::from("ghost"), &Value::Null, UserId::from("u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }

    #[tokio::test]
    async fn unsupported_step_type_fails_the_run_but_is_recorded() {
        let engine = engine();
        let id = store(
            &engine,
            vec![
                function_step("a", "ok"),
                Step::new("hook", StepKind::Unsupported("webhook".into())),
                function_step("c", "ok"),
            ],
        )
        .await;
        let outcome = engine
            .execute(&id, &Value::Null, UserId::from("u1"))
            .await
            .unwrap();
        assert!(!outcome.success);
        // The first step's result is kept; the run broke at the second.
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.error.unwrap().contains("webhook"));

        let wf = engine.get(&id).await.unwrap();
        assert_eq!(wf.execution_history.len(), 1);
        assert_eq!(wf.execution_history[0].status, RecordStatus::Failed);
    }

    #[tokio::test]
    async fn execute_always_starts_from_the_first_step() {
        let engine = engine();
        let mut wf = WorkflowInstance::new(
            "wf",
            UserId::from("creator"),
            vec![function_step("a", "ok"), function_step("b", "ok")],
        );
        let _ = wf.advance_step();
        assert_eq!(wf.current_step, 1);
        let id = engine.insert(wf).await;

        let outcome = engine
            .execute(&id, &Value::Null, UserId::from("u1"))
            .await
            .unwrap();
        // Both steps ran despite the cursor sitting at 1.
        assert_eq!(outcome.results.len(), 2);
        // And the cursor is untouched.
        assert_eq!(engine.get(&id).await.unwrap().current_step, 1);
    }

    #[tokio::test]
    async fn concurrent_executes_serialize_into_distinct_records() {
        let engine = Arc::new(engine());
        let id = store(&engine, vec![function_step("a", "slow"), function_step("b", "ok")]).await;

        let e1 = Arc::clone(&engine);
        let id1 = id.clone();
        let t1 = tokio::spawn(async move {
            e1.execute(&id1, &Value::Null, UserId::from("u1")).await
        });
        let e2 = Arc::clone(&engine);
        let id2 = id.clone();
        let t2 = tokio::spawn(async move {
            e2.execute(&id2, &Value::Null, UserId::from("u2")).await
        });
        let o1 = t1.await.unwrap().unwrap();
        let o2 = t2.await.unwrap().unwrap();
        assert!(o1.success && o2.success);

        let wf = engine.get(&id).await.unwrap();
        assert_eq!(wf.execution_history.len(), 2);
        for record in &wf.execution_history {
            // Each record is internally consistent: full result set, status
            // matching its own outcome.
            assert_eq!(record.result.results.len(), 2);
            assert_eq!(record.status, RecordStatus::Completed);
        }
        let executors: Vec<_> = wf
            .execution_history
            .iter()
            .map(|r| r.executed_by.as_str())
            .collect();
        assert!(executors.contains(&"u1") && executors.contains(&"u2"));
    }

    #[tokio::test]
    async fn step_failure_is_not_an_engine_error() {
        let engine = engine();
        let id = store(&engine, vec![function_step("a", "boom")]).await;
        let result = engine.execute(&id, &Value::Null, UserId::from("u1")).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn history_resolves_display_names() {
        let gate = Arc::new(InMemoryIdentityGate::new());
        gate.insert_user(UserId::from("u1"), "Alice", vec![]);
        let mut registry = FunctionRegistry::new();
        registry.register("ok", Arc::new(Ok1));
        let engine = WorkflowEngine::new(
            StepExecutor::new(registry, Duration::from_secs(2)),
            gate,
        );
        let id = store(&engine, vec![function_step("a", "ok")]).await;
        let _ = engine.execute(&id, &Value::Null, UserId::from("u1")).await.unwrap();
        let _ = engine.execute(&id, &Value::Null, UserId::from("u_ghost")).await.unwrap();

        let history = engine.history(&id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].executed_by, "Alice");
        // Unknown users fall back to the raw ID.
        assert_eq!(history[1].executed_by, "u_ghost");
    }

    #[tokio::test]
    async fn history_of_unknown_workflow_is_not_found() {
        let engine = engine();
        let err = engine.history(&WorkflowId::from("ghost")).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }

    #[tokio::test]
    async fn remove_then_execute_is_not_found() {
        let engine = engine();
        let id = store(&engine, vec![]).await;
        assert!(engine.remove(&id).await);
        assert!(!engine.remove(&id).await);
        let err = engine
            .execute(&id, &Value::Null, UserId::from("u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }
}
