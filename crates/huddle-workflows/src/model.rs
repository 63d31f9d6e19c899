//! Workflow data model.
//!
//! A workflow is an ordered list of steps plus an append-only execution
//! history. `current_step` is advancement metadata maintained by the manual
//! step operations; the engine's execute path does not consult it and always
//! runs from the first step.

use chrono::{SecondsFormat, Utc};
use serde::de::Deserializer;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use huddle_core::{UserId, WorkflowId};

/// What a step actually does when executed.
///
/// Unknown `type` strings are preserved as [`StepKind::Unsupported`] rather
/// than rejected at parse time; the executor refuses them at run time so the
/// failure is attributable to a specific execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    /// Outbound HTTP call.
    Http {
        /// Request URL.
        url: String,
        /// HTTP method, e.g. `GET` or `POST`.
        method: String,
        /// Per-step timeout override, in seconds.
        timeout_secs: Option<u64>,
    },
    /// Pre-registered local function, looked up by name.
    Function {
        /// Registry key.
        name: String,
    },
    /// A type string with no handler; fails at execution time.
    Unsupported(String),
}

impl StepKind {
    /// The wire `type` string.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::Http { .. } => "http",
            Self::Function { .. } => "function",
            Self::Unsupported(ty) => ty,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HttpFields {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    timeout_secs: Option<u64>,
}

fn default_method() -> String {
    "GET".to_owned()
}

#[derive(Deserialize)]
struct FunctionFields {
    /// Named `function` on the wire so it cannot collide with the step's
    /// own `name` field once the kind is flattened into the step object.
    function: String,
}

impl<'de> Deserialize<'de> for StepKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let ty = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| serde::de::Error::missing_field("type"))?
            .to_owned();
        match ty.as_str() {
            "http" => {
                let fields: HttpFields =
                    serde_json::from_value(value).map_err(serde::de::Error::custom)?;
                Ok(Self::Http {
                    url: fields.url,
                    method: fields.method,
                    timeout_secs: fields.timeout_secs,
                })
            }
            "function" => {
                let fields: FunctionFields =
                    serde_json::from_value(value).map_err(serde::de::Error::custom)?;
                Ok(Self::Function {
                    name: fields.function,
                })
            }
            _ => Ok(Self::Unsupported(ty)),
        }
    }
}

impl Serialize for StepKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Http {
                url,
                method,
                timeout_secs,
            } => {
                let len = if timeout_secs.is_some() { 4 } else { 3 };
                let mut map = serializer.serialize_map(Some(len))?;
                map.serialize_entry("type", "http")?;
                map.serialize_entry("url", url)?;
                map.serialize_entry("method", method)?;
                if let Some(t) = timeout_secs {
                    map.serialize_entry("timeoutSecs", t)?;
                }
                map.end()
            }
            Self::Function { name } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", "function")?;
                map.serialize_entry("function", name)?;
                map.end()
            }
            Self::Unsupported(ty) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("type", ty)?;
                map.end()
            }
        }
    }
}

/// Per-step lifecycle status, maintained by the manual step operations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not started.
    #[default]
    Pending,
    /// Currently being worked.
    InProgress,
    /// Done.
    Completed,
}

/// One step in a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Human-readable step name; also the key in step results.
    pub name: String,
    /// What the step does.
    #[serde(flatten)]
    pub kind: StepKind,
    /// Lifecycle status.
    #[serde(default)]
    pub status: StepStatus,
    /// Whether a failure of this step halts the run.
    #[serde(default)]
    pub stop_on_error: bool,
    /// User responsible for the step, if assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<UserId>,
}

impl Step {
    /// A pending, non-halting step.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            kind,
            status: StepStatus::Pending,
            stop_on_error: false,
            assignee: None,
        }
    }

    /// Set the halt-on-failure flag.
    #[must_use]
    pub fn stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }
}

/// Workflow lifecycle status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// Accepting step advancement and execution.
    #[default]
    Active,
    /// All steps advanced past.
    Completed,
    /// Suspended.
    Paused,
}

/// Result of one attempted step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    /// Step name.
    pub name: String,
    /// Whether the step succeeded.
    pub success: bool,
    /// Step output on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepResult {
    /// A successful result with output data.
    #[must_use]
    pub fn success(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// A failed result with an error description.
    #[must_use]
    pub fn failure(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Aggregate result of one execution run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    /// True iff every attempted step succeeded.
    pub success: bool,
    /// One entry per attempted step, in order.
    pub results: Vec<StepResult>,
    /// Run-level failure description, when the run itself broke.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Recorded status of one execution run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// The run's aggregate result was success.
    Completed,
    /// At least one attempted step failed, or the run itself broke.
    Failed,
}

/// One append-only history entry; exactly one per execute invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    /// Who triggered the run.
    pub executed_by: UserId,
    /// Aggregate status.
    pub status: RecordStatus,
    /// Full outcome.
    pub result: ExecutionOutcome,
    /// Server clock when the record was appended, RFC 3339 millis.
    pub timestamp: String,
}

impl ExecutionRecord {
    /// Build a record from an outcome, stamped now.
    #[must_use]
    pub fn new(executed_by: UserId, result: ExecutionOutcome) -> Self {
        let status = if result.success {
            RecordStatus::Completed
        } else {
            RecordStatus::Failed
        };
        Self {
            executed_by,
            status,
            result,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// A workflow instance: definition plus advancement state plus history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    /// Workflow ID.
    pub id: WorkflowId,
    /// Display name.
    pub name: String,
    /// Creator; mutation operations are creator-only at the outer layer.
    pub created_by: UserId,
    /// Ordered step list.
    pub steps: Vec<Step>,
    /// Advancement cursor, `0..=steps.len()`.
    pub current_step: usize,
    /// Lifecycle status.
    pub status: WorkflowStatus,
    /// Append-only run history.
    pub execution_history: Vec<ExecutionRecord>,
}

impl WorkflowInstance {
    /// A fresh Active workflow with cursor at the first step.
    #[must_use]
    pub fn new(name: impl Into<String>, created_by: UserId, steps: Vec<Step>) -> Self {
        Self {
            id: WorkflowId::new(),
            name: name.into(),
            created_by,
            steps,
            current_step: 0,
            status: WorkflowStatus::Active,
            execution_history: Vec::new(),
        }
    }

    /// Advance the cursor by one.
    ///
    /// Returns `false` when already past the last step. Advancing past the
    /// final step marks the workflow Completed.
    pub fn advance_step(&mut self) -> bool {
        if self.current_step >= self.steps.len() {
            return false;
        }
        self.current_step += 1;
        if self.current_step == self.steps.len() {
            self.status = WorkflowStatus::Completed;
        }
        true
    }

    /// Set the status of one step. Returns `false` for an out-of-range index.
    pub fn update_step_status(&mut self, index: usize, status: StepStatus) -> bool {
        match self.steps.get_mut(index) {
            Some(step) => {
                step.status = status;
                true
            }
            None => false,
        }
    }

    /// Assign a step to a user. Returns `false` for an out-of-range index.
    pub fn assign_step(&mut self, index: usize, user: UserId) -> bool {
        match self.steps.get_mut(index) {
            Some(step) => {
                step.assignee = Some(user);
                true
            }
            None => false,
        }
    }

    /// Advancement progress as a whole percentage. Empty workflows are 0.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::cast_sign_loss)]
    pub fn progress(&self) -> u8 {
        if self.steps.is_empty() {
            return 0;
        }
        let pct = (self.current_step as f64 / self.steps.len() as f64) * 100.0;
        pct.round() as u8
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn two_step_workflow() -> WorkflowInstance {
        WorkflowInstance::new(
            "onboarding",
            UserId::from("u1"),
            vec![
                Step::new("ping", StepKind::Function { name: "ping".into() }),
                Step::new(
                    "notify",
                    StepKind::Http {
                        url: "http://example.test/hook".into(),
                        method: "POST".into(),
                        timeout_secs: None,
                    },
                ),
            ],
        )
    }

    #[test]
    fn new_workflow_is_active_at_zero() {
        let wf = two_step_workflow();
        assert_eq!(wf.current_step, 0);
        assert_eq!(wf.status, WorkflowStatus::Active);
        assert!(wf.execution_history.is_empty());
    }

    #[test]
    fn advance_to_completion() {
        let mut wf = two_step_workflow();
        assert!(wf.advance_step());
        assert_eq!(wf.status, WorkflowStatus::Active);
        assert!(wf.advance_step());
        assert_eq!(wf.status, WorkflowStatus::Completed);
        // Past the end.
        assert!(!wf.advance_step());
        assert_eq!(wf.current_step, 2);
    }

    #[test]
    fn progress_percentage() {
        let mut wf = two_step_workflow();
        assert_eq!(wf.progress(), 0);
        let _ = wf.advance_step();
        assert_eq!(wf.progress(), 50);
        let _ = wf.advance_step();
        assert_eq!(wf.progress(), 100);
    }

    #[test]
    fn empty_workflow_progress_is_zero() {
        let wf = WorkflowInstance::new("empty", UserId::from("u1"), vec![]);
        assert_eq!(wf.progress(), 0);
        // No steps to advance past.
        let mut wf = wf;
        assert!(!wf.advance_step());
    }

    #[test]
    fn update_step_status_bounds() {
        let mut wf = two_step_workflow();
        assert!(wf.update_step_status(0, StepStatus::InProgress));
        assert_eq!(wf.steps[0].status, StepStatus::InProgress);
        assert!(!wf.update_step_status(5, StepStatus::Completed));
    }

    #[test]
    fn assign_step_bounds() {
        let mut wf = two_step_workflow();
        assert!(wf.assign_step(1, UserId::from("u2")));
        assert_eq!(wf.steps[1].assignee.as_ref().unwrap().as_str(), "u2");
        assert!(!wf.assign_step(9, UserId::from("u2")));
    }

    #[test]
    fn step_kind_http_deserializes() {
        let json = r#"{"name":"call","type":"http","url":"http://x.test","stopOnError":true}"#;
        let step: Step = serde_json::from_str(json).unwrap();
        assert!(step.stop_on_error);
        match step.kind {
            StepKind::Http { url, method, timeout_secs } => {
                assert_eq!(url, "http://x.test");
                assert_eq!(method, "GET");
                assert!(timeout_secs.is_none());
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn step_kind_function_deserializes() {
        let json = r#"{"name":"run","type":"function","function":"send_welcome"}"#;
        let step: Step = serde_json::from_str(json).unwrap();
        assert_eq!(step.name, "run");
        assert_eq!(step.kind, StepKind::Function { name: "send_welcome".into() });
    }

    #[test]
    fn function_step_missing_function_key_fails() {
        let json = r#"{"name":"run","type":"function"}"#;
        assert!(serde_json::from_str::<Step>(json).is_err());
    }

    #[test]
    fn unknown_type_preserved_as_unsupported() {
        let json = r#"{"name":"hook","type":"webhook","url":"http://x.test"}"#;
        let step: Step = serde_json::from_str(json).unwrap();
        assert_eq!(step.kind, StepKind::Unsupported("webhook".into()));
        assert_eq!(step.kind.type_name(), "webhook");
    }

    #[test]
    fn missing_type_is_a_parse_error() {
        let json = r#"{"name":"hook","url":"http://x.test"}"#;
        assert!(serde_json::from_str::<Step>(json).is_err());
    }

    #[test]
    fn step_serializes_with_flattened_type() {
        let step = Step::new("ping", StepKind::Function { name: "ping_fn".into() });
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["name"], "ping");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["stopOnError"], false);
        assert!(json.get("assignee").is_none());
    }

    #[test]
    fn http_step_serde_round_trip() {
        let step = Step::new(
            "call",
            StepKind::Http {
                url: "http://x.test".into(),
                method: "POST".into(),
                timeout_secs: Some(5),
            },
        );
        let json = serde_json::to_string(&step).unwrap();
        let back: Step = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, step.kind);
    }

    #[test]
    fn record_status_follows_outcome() {
        let ok = ExecutionRecord::new(
            UserId::from("u1"),
            ExecutionOutcome { success: true, results: vec![], error: None },
        );
        assert_eq!(ok.status, RecordStatus::Completed);
        let bad = ExecutionRecord::new(
            UserId::from("u1"),
            ExecutionOutcome { success: false, results: vec![], error: None },
        );
        assert_eq!(bad.status, RecordStatus::Failed);
        assert!(ok.timestamp.ends_with('Z'));
    }

    #[test]
    fn step_result_constructors() {
        let ok = StepResult::success("a", serde_json::json!({"n": 1}));
        assert!(ok.success);
        assert!(ok.error.is_none());
        let bad = StepResult::failure("b", "boom");
        assert!(!bad.success);
        assert_eq!(bad.error.as_deref(), Some("boom"));
        assert!(bad.data.is_none());
    }
}
