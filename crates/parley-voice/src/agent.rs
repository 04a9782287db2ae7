//! HTTP client for the conversational agent.
//!
//! The agent endpoint receives `{"message": ..., "history": [...]}` and
//! answers with newline-delimited JSON, one object per line:
//!
//! ```text
//! {"token": "Sure"}
//! {"token": ", here"}
//! {"error": "upstream model overloaded"}
//! {"done": true}
//! ```
//!
//! A line may carry a `token`, an `error` (which ends the reply with a
//! failure) or `done` (which ends it normally). End of body also ends the
//! reply normally.

use crate::error::VoiceError;
use crate::traits::{Agent, TokenStream};
use async_trait::async_trait;
use futures_util::StreamExt;
use parley_types::ConversationTurn;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct AgentRequest<'a> {
    message: &'a str,
    history: &'a [ConversationTurn],
}

#[derive(Deserialize)]
struct ReplyLine {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum Parsed {
    Token(String),
    Done,
}

#[derive(Debug, Clone)]
pub struct HttpAgent {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAgent {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, VoiceError> {
        Self::with_connect_timeout(endpoint, DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(
        endpoint: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, VoiceError> {
        let endpoint = endpoint.into();
        let url = reqwest::Url::parse(&endpoint).map_err(|e| {
            VoiceError::Config(format!("invalid agent endpoint {:?}: {}", endpoint, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(VoiceError::Config(format!(
                "agent endpoint must be an http(s) URL, got {:?}",
                endpoint
            )));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| VoiceError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Agent for HttpAgent {
    async fn stream(
        &self,
        user_text: &str,
        history: &[ConversationTurn],
    ) -> Result<TokenStream, VoiceError> {
        let request = AgentRequest {
            message: user_text,
            history,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    VoiceError::Unavailable(format!("agent endpoint {} ({})", self.endpoint, e))
                } else {
                    VoiceError::Agent(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        {
            return Err(VoiceError::Unavailable(format!(
                "agent endpoint {} ({})",
                self.endpoint, status
            )));
        }
        if !status.is_success() {
            return Err(VoiceError::Agent(format!("agent returned {}", status)));
        }

        let mut body = response.bytes_stream();
        let tokens = async_stream::stream! {
            let mut pending: Vec<u8> = Vec::new();
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => pending.extend_from_slice(&bytes),
                    Err(e) => {
                        yield Err(VoiceError::Agent(format!("reply stream broke: {}", e)));
                        return;
                    }
                }
                while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    match parse_line(&line) {
                        Ok(Some(Parsed::Token(token))) => yield Ok(token),
                        Ok(Some(Parsed::Done)) => return,
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
            match parse_line(&pending) {
                Ok(Some(Parsed::Token(token))) => yield Ok(token),
                Ok(_) => {}
                Err(e) => yield Err(e),
            }
        };
        Ok(Box::pin(tokens))
    }
}

fn parse_line(line: &[u8]) -> Result<Option<Parsed>, VoiceError> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let reply: ReplyLine = serde_json::from_str(line)
        .map_err(|e| VoiceError::Agent(format!("malformed reply line: {}", e)))?;
    if let Some(error) = reply.error {
        return Err(VoiceError::Agent(error));
    }
    if let Some(token) = reply.token {
        return Ok(Some(Parsed::Token(token)));
    }
    if reply.done {
        return Ok(Some(Parsed::Done));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_token_done_and_blank_lines() {
        assert_eq!(
            parse_line(b"{\"token\": \"Hi\"}\n").unwrap(),
            Some(Parsed::Token("Hi".to_string()))
        );
        assert_eq!(parse_line(b"{\"done\": true}").unwrap(), Some(Parsed::Done));
        assert_eq!(parse_line(b"   \r\n").unwrap(), None);
        assert_eq!(parse_line(b"{}").unwrap(), None);
    }

    #[test]
    fn error_lines_and_garbage_fail_the_reply() {
        match parse_line(b"{\"error\": \"overloaded\"}") {
            Err(VoiceError::Agent(msg)) => assert_eq!(msg, "overloaded"),
            other => panic!("expected agent error, got {:?}", other),
        }
        assert!(matches!(parse_line(b"not json"), Err(VoiceError::Agent(_))));
    }

    #[test]
    fn rejects_non_http_endpoints() {
        assert!(matches!(
            HttpAgent::new("ftp://example.com"),
            Err(VoiceError::Config(_))
        ));
        assert!(matches!(
            HttpAgent::new("agent.local/reply"),
            Err(VoiceError::Config(_))
        ));
        assert!(matches!(
            HttpAgent::new("http://[::1/reply"),
            Err(VoiceError::Config(_))
        ));
        assert!(HttpAgent::new("http://127.0.0.1:9/reply").is_ok());
        assert!(HttpAgent::new("HTTPS://agent.example.com/reply").is_ok());
    }
}
