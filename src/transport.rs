use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::{ConfigError, EndpointConfig};

pub const UNREACHABLE_MESSAGE: &str = "The server is not reachable. Please try again later.";

#[derive(Debug, Serialize)]
struct AskRequest<'a> {
    question: &'a str,
}

/// Successful response body. A missing or null `answer` reads as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AnswerPayload {
    #[serde(default)]
    pub answer: Option<String>,
}

impl AnswerPayload {
    pub fn new(answer: impl Into<String>) -> Self {
        AnswerPayload {
            answer: Some(answer.into()),
        }
    }

    pub fn text(&self) -> &str {
        self.answer.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("server returned {status}")]
    Rejected { status: u16, detail: Option<String> },
    #[error("server unreachable: {0}")]
    Unreachable(String),
    #[error("unreadable response: {0}")]
    InvalidPayload(String),
}

impl TransportError {
    /// What the user sees: the server's detail when it sent one.
    pub fn user_message(&self) -> String {
        match self {
            TransportError::Rejected {
                detail: Some(detail),
                ..
            } if !detail.trim().is_empty() => detail.clone(),
            _ => UNREACHABLE_MESSAGE.to_string(),
        }
    }
}

/// The request/response boundary to the inference service.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn ask(&self, question: &str) -> Result<AnswerPayload, TransportError>;
}

pub struct HttpTransport {
    url: String,
    method: reqwest::Method,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(endpoint: &EndpointConfig) -> Result<Self, ConfigError> {
        let method = endpoint.method()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(endpoint.timeout_secs))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(HttpTransport {
            url: endpoint.url.clone(),
            method,
            client,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn ask(&self, question: &str) -> Result<AnswerPayload, TransportError> {
        let request = if self.method == reqwest::Method::GET {
            self.client.get(&self.url).query(&[("question", question)])
        } else {
            self.client
                .request(self.method.clone(), &self.url)
                .json(&AskRequest { question })
        };

        debug!(url = %self.url, method = %self.method, "Sending question");
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                detail: error_detail(&body),
            });
        }

        response
            .json::<AnswerPayload>()
            .await
            .map_err(|e| TransportError::InvalidPayload(e.to_string()))
    }
}

fn error_detail(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    match parsed.detail? {
        Value::Null => None,
        Value::String(detail) => Some(detail),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned HTTP response and hands back the raw request.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/ask", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&request) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).into_owned()
        });

        (url, handle)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    fn endpoint(url: String, method: &str) -> EndpointConfig {
        EndpointConfig {
            url,
            method: method.to_string(),
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn posts_question_and_reads_answer() {
        let (url, server) = serve_once("200 OK", r#"{"answer":"**Paris**"}"#).await;
        let transport = HttpTransport::new(&endpoint(url, "POST")).unwrap();

        let payload = transport.ask("What is the capital of France?").await.unwrap();
        assert_eq!(payload.text(), "**Paris**");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /ask"));
        assert!(request.contains(r#"{"question":"What is the capital of France?"}"#));
    }

    #[tokio::test]
    async fn get_sends_question_as_query() {
        let (url, server) = serve_once("200 OK", r#"{"answer":"ok"}"#).await;
        let transport = HttpTransport::new(&endpoint(url, "get")).unwrap();

        transport.ask("a b").await.unwrap();
        let request = server.await.unwrap();
        assert!(request.starts_with("GET /ask?question=a+b"), "{request}");
    }

    #[tokio::test]
    async fn error_status_carries_detail() {
        let (url, _server) = serve_once("429 Too Many Requests", r#"{"detail":"rate limited"}"#).await;
        let transport = HttpTransport::new(&endpoint(url, "POST")).unwrap();

        let err = transport.ask("test").await.unwrap_err();
        assert_eq!(
            err,
            TransportError::Rejected {
                status: 429,
                detail: Some("rate limited".to_string())
            }
        );
        assert_eq!(err.user_message(), "rate limited");
    }

    #[tokio::test]
    async fn error_status_without_detail_uses_generic_message() {
        let (url, _server) = serve_once("500 Internal Server Error", "oops").await;
        let transport = HttpTransport::new(&endpoint(url, "POST")).unwrap();

        let err = transport.ask("test").await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected { status: 500, detail: None }));
        assert_eq!(err.user_message(), UNREACHABLE_MESSAGE);
    }

    #[tokio::test]
    async fn missing_answer_field_is_empty() {
        let (url, _server) = serve_once("200 OK", "{}").await;
        let transport = HttpTransport::new(&endpoint(url, "POST")).unwrap();
        assert_eq!(transport.ask("q").await.unwrap().text(), "");
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/ask", listener.local_addr().unwrap());
        drop(listener);

        let transport = HttpTransport::new(&endpoint(url, "POST")).unwrap();
        let err = transport.ask("q").await.unwrap_err();
        assert!(matches!(err, TransportError::Unreachable(_)));
        assert_eq!(err.user_message(), UNREACHABLE_MESSAGE);
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/ask", listener.local_addr().unwrap());
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let mut config = endpoint(url, "POST");
        config.timeout_secs = 1;
        let transport = HttpTransport::new(&config).unwrap();

        let err = tokio::time::timeout(Duration::from_secs(10), transport.ask("q"))
            .await
            .expect("request should settle on its own timeout")
            .unwrap_err();
        assert!(matches!(err, TransportError::Unreachable(_)));
        assert_eq!(err.user_message(), UNREACHABLE_MESSAGE);
    }

    #[test]
    fn structured_detail_is_stringified() {
        assert_eq!(
            error_detail(r#"{"detail":[{"msg":"field required"}]}"#).as_deref(),
            Some(r#"[{"msg":"field required"}]"#)
        );
        assert_eq!(error_detail(r#"{"detail":null}"#), None);
        assert_eq!(error_detail("<html>"), None);
    }
}
