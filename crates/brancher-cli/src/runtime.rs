//! Client for the serverless runtime API (`$AWS_LAMBDA_RUNTIME_API`).
//!
//! The loop is: long-poll `invocation/next`, handle the payload, then post
//! either `response` or `error` for that request id. Posting `error` makes
//! the platform redeliver the event.

use std::time::Duration;

use anyhow::{Context, Result};
use brancher_core::Outcome;
use chrono::{DateTime, Utc};
use serde_json::json;

pub const API_VERSION: &str = "2018-06-01";
pub const RUNTIME_API_ENV: &str = "AWS_LAMBDA_RUNTIME_API";

const REQUEST_ID_HEADER: &str = "Lambda-Runtime-Aws-Request-Id";
const DEADLINE_HEADER: &str = "Lambda-Runtime-Deadline-Ms";
const ERROR_TYPE_HEADER: &str = "Lambda-Runtime-Function-Error-Type";

/// Time reserved after the handler budget for posting the result.
pub const SAFETY_MARGIN: Duration = Duration::from_secs(2);

/// One pending invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub request_id: String,
    pub deadline: Option<DateTime<Utc>>,
    pub body: String,
}

impl Invocation {
    /// The lesser of `configured` and the time left before the platform
    /// deadline minus [`SAFETY_MARGIN`].
    pub fn budget(&self, configured: Duration, now: DateTime<Utc>) -> Duration {
        let Some(deadline) = self.deadline else {
            return configured;
        };
        let margin = chrono::Duration::milliseconds(SAFETY_MARGIN.as_millis() as i64);
        let remaining = (deadline - now - margin).to_std().unwrap_or(Duration::ZERO);
        configured.min(remaining)
    }
}

pub struct RuntimeClient {
    http: reqwest::Client,
    base: String,
}

impl RuntimeClient {
    /// `api` is `host:port`, as found in `$AWS_LAMBDA_RUNTIME_API`.
    pub fn new(api: &str) -> Result<Self> {
        // No request timeout: `invocation/next` blocks until work arrives.
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build runtime API client")?;
        Ok(Self {
            http,
            base: format!("http://{}/{API_VERSION}/runtime", api.trim_end_matches('/')),
        })
    }

    pub fn from_env() -> Result<Self> {
        let api = std::env::var(RUNTIME_API_ENV)
            .with_context(|| format!("{RUNTIME_API_ENV} is not set; serve only runs inside the runtime"))?;
        Self::new(&api)
    }

    pub async fn next_invocation(&self) -> Result<Invocation> {
        let response = self
            .http
            .get(format!("{}/invocation/next", self.base))
            .send()
            .await
            .context("Failed to poll for the next invocation")?
            .error_for_status()
            .context("Runtime API refused the poll")?;

        let headers = response.headers();
        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .with_context(|| format!("Invocation is missing {REQUEST_ID_HEADER}"))?;
        let deadline = headers
            .get(DEADLINE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis);

        let body = response
            .text()
            .await
            .context("Failed to read invocation payload")?;
        Ok(Invocation {
            request_id,
            deadline,
            body,
        })
    }

    pub async fn post_response(&self, request_id: &str, outcomes: &[Outcome]) -> Result<()> {
        self.http
            .post(format!("{}/invocation/{request_id}/response", self.base))
            .json(&json!({ "outcomes": outcomes }))
            .send()
            .await
            .context("Failed to post invocation response")?
            .error_for_status()
            .context("Runtime API refused the response")?;
        Ok(())
    }

    /// Report the invocation as failed so the event is redelivered.
    pub async fn post_error(&self, request_id: &str, outcomes: &[Outcome]) -> Result<()> {
        let retryable = outcomes.iter().filter(|o| o.is_retryable_failure()).count();
        self.http
            .post(format!("{}/invocation/{request_id}/error", self.base))
            .header(ERROR_TYPE_HEADER, "Unhandled")
            .json(&json!({
                "errorType": "RetryableFailure",
                "errorMessage": format!("{retryable} of {} record(s) failed and should be retried", outcomes.len()),
                "outcomes": outcomes,
            }))
            .send()
            .await
            .context("Failed to post invocation error")?
            .error_for_status()
            .context("Runtime API refused the error report")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brancher_core::{FailureKind, Stage};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Answer one request with `head` + `body`; return the raw request.
    async fn serve_once(head: &str, body: &str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "{head}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf);
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text[..split]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if buf.len() >= split + 4 + length {
                        break;
                    }
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            let _ = tx.send(String::from_utf8_lossy(&buf).to_string());
        });

        (addr.to_string(), rx)
    }

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    #[test]
    fn test_budget_without_deadline_is_configured() {
        let invocation = Invocation {
            request_id: "r".into(),
            deadline: None,
            body: String::new(),
        };
        assert_eq!(
            invocation.budget(Duration::from_secs(30), at(0)),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_budget_respects_deadline_and_margin() {
        let invocation = Invocation {
            request_id: "r".into(),
            deadline: Some(at(10_000)),
            body: String::new(),
        };
        assert_eq!(
            invocation.budget(Duration::from_secs(30), at(0)),
            Duration::from_secs(8)
        );
        assert_eq!(
            invocation.budget(Duration::from_secs(5), at(0)),
            Duration::from_secs(5)
        );
        assert_eq!(
            invocation.budget(Duration::from_secs(30), at(9_000)),
            Duration::ZERO
        );
    }

    #[tokio::test]
    async fn test_next_invocation_reads_headers() {
        let (api, request) = serve_once(
            "HTTP/1.1 200 OK\r\nLambda-Runtime-Aws-Request-Id: req-1\r\nLambda-Runtime-Deadline-Ms: 1767225600000\r\nContent-Type: application/json",
            r#"{"Records":[]}"#,
        )
        .await;

        let client = RuntimeClient::new(&api).unwrap();
        let invocation = client.next_invocation().await.unwrap();

        assert_eq!(invocation.request_id, "req-1");
        assert_eq!(invocation.deadline, Some(at(1_767_225_600_000)));
        assert_eq!(invocation.body, r#"{"Records":[]}"#);
        let head = request.await.unwrap();
        assert!(head.starts_with("GET /2018-06-01/runtime/invocation/next "));
    }

    #[tokio::test]
    async fn test_next_invocation_requires_request_id() {
        let (api, _request) = serve_once("HTTP/1.1 200 OK", "{}").await;
        let client = RuntimeClient::new(&api).unwrap();
        assert!(client.next_invocation().await.is_err());
    }

    #[tokio::test]
    async fn test_post_error_marks_unhandled() {
        let (api, request) = serve_once("HTTP/1.1 202 Accepted", "").await;
        let client = RuntimeClient::new(&api).unwrap();
        let outcomes = vec![Outcome::failed(
            FailureKind::CloneFailed,
            Stage::CredentialFetched,
            "early EOF",
        )];

        client.post_error("req-7", &outcomes).await.unwrap();

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /2018-06-01/runtime/invocation/req-7/error "));
        assert!(raw.to_lowercase().contains("lambda-runtime-function-error-type: unhandled"));
        assert!(raw.contains("\"errorType\":\"RetryableFailure\""));
        assert!(raw.contains("\"kind\":\"clone_failed\""));
    }

    #[tokio::test]
    async fn test_post_response_sends_outcomes() {
        let (api, request) = serve_once("HTTP/1.1 202 Accepted", "").await;
        let client = RuntimeClient::new(&api).unwrap();
        let outcomes = vec![Outcome::AlreadySatisfied {
            branch: "rds-tools-1-2-0".into(),
        }];

        client.post_response("req-8", &outcomes).await.unwrap();

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /2018-06-01/runtime/invocation/req-8/response "));
        assert!(raw.contains("\"status\":\"already_satisfied\""));
    }
}
