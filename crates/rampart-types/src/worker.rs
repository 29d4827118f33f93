//! Wire messages exchanged with worker processes.
//!
//! A worker reads one `WorkerRequest` as a single JSON line on stdin and
//! writes one `WorkerResponse` as a single JSON line on stdout.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::args::ActionArgs;

/// A unit of work sent to a worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// Name of a task registered in the worker's task registry.
    pub task: String,
    #[serde(default)]
    pub args: ActionArgs,
}

/// The worker's answer to one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WorkerResponse {
    Success { result: Value },
    Failure { kind: String, message: String },
}

impl WorkerResponse {
    pub fn failure(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failure {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_wire_shape() {
        let ok = WorkerResponse::Success { result: json!(42) };
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"outcome": "success", "result": 42})
        );

        let parsed: WorkerResponse = serde_json::from_str(
            r#"{"outcome":"failure","kind":"task_failed","message":"bad input"}"#,
        )
        .unwrap();
        assert_eq!(parsed, WorkerResponse::failure("task_failed", "bad input"));
    }

    #[test]
    fn request_args_default_to_empty() {
        let req: WorkerRequest = serde_json::from_str(r#"{"task":"hash"}"#).unwrap();
        assert_eq!(req.task, "hash");
        assert!(req.args.is_empty());
    }
}
