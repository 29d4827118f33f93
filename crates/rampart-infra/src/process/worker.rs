//! Worker-side request loop.
//!
//! Reads `WorkerRequest` JSON lines until EOF and answers each with one
//! `WorkerResponse` line. Task errors and panics are reported as failure
//! responses, so a worker only exits non-zero when its own I/O breaks.

use rampart_core::worker::TaskRegistry;
use rampart_types::worker::{WorkerRequest, WorkerResponse};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Serve requests from `reader`, writing responses to `writer`.
/// Returns the number of requests answered.
pub async fn serve<R, W>(tasks: &TaskRegistry, reader: R, mut writer: W) -> anyhow::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut served = 0;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<WorkerRequest>(&line) {
            Ok(request) => {
                tracing::debug!(task = %request.task, "worker handling request");
                tasks.handle(request)
            }
            Err(err) => WorkerResponse::failure("protocol", format!("malformed request: {err}")),
        };
        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        writer.write_all(out.as_bytes()).await?;
        writer.flush().await?;
        served += 1;
    }
    Ok(served)
}

/// Entry point for the hidden `worker` command.
pub async fn serve_stdio(tasks: &TaskRegistry) -> anyhow::Result<()> {
    let served = serve(tasks, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;
    tracing::debug!(served, "worker stdin closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn tasks() -> TaskRegistry {
        TaskRegistry::new().with("len", |args| {
            let s = args.arg(0).and_then(Value::as_str).unwrap_or_default();
            Ok(json!(s.len()))
        })
    }

    async fn run(input: &str) -> (usize, Vec<WorkerResponse>) {
        let mut out = Vec::new();
        let served = serve(&tasks(), input.as_bytes(), &mut out).await.unwrap();
        let responses = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        (served, responses)
    }

    #[tokio::test]
    async fn answers_each_request_line() {
        let (served, responses) = run(concat!(
            r#"{"task":"len","args":{"positional":["abcd"]}}"#,
            "\n\n",
            r#"{"task":"nope"}"#,
            "\n",
        ))
        .await;

        assert_eq!(served, 2);
        assert_eq!(responses[0], WorkerResponse::Success { result: json!(4) });
        assert!(matches!(
            &responses[1],
            WorkerResponse::Failure { kind, .. } if kind == "unknown_task"
        ));
    }

    #[tokio::test]
    async fn malformed_request_gets_protocol_failure() {
        let (_, responses) = run("not json\n").await;
        assert!(matches!(
            &responses[0],
            WorkerResponse::Failure { kind, .. } if kind == "protocol"
        ));
    }
}
