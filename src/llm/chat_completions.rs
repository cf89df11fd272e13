//! `OpenAI` Chat Completions API driver.
//!
//! This module implements [`CompletionClient`] for the `OpenAI` Chat Completions
//! API (`/v1/chat/completions`) and compatible providers, streaming the
//! assistant's text deltas as they arrive.

use futures::StreamExt;
use reqwest::header::RETRY_AFTER;

use super::provider::AuthScheme;
use super::{CompletionClient, CompletionError, FragmentStream, LlmSettings, Message, build_messages};

/// Driver for the `OpenAI` Chat Completions API.
///
/// Connects to the provider's chat completions URL with `stream: true` and
/// yields each non-empty `delta.content` as a fragment.
#[derive(Clone)]
pub struct ChatCompletionsDriver {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for ChatCompletionsDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsDriver")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ChatCompletionsDriver {
    /// Create a new Chat Completions driver with the given settings.
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    /// Create a driver that reuses an existing HTTP client.
    #[must_use]
    pub fn with_client(http: reqwest::Client, settings: LlmSettings) -> Self {
        Self { http, settings }
    }

    #[must_use]
    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }
}

#[async_trait::async_trait]
impl CompletionClient for ChatCompletionsDriver {
    async fn stream_completion(
        &self,
        system_prompt: &str,
        history: &[Message],
        input: &str,
        session_id: &str,
    ) -> Result<FragmentStream, CompletionError> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(CompletionError::MissingApiKey)?;

        let provider = &self.settings.provider;
        let url = provider.build_chat_url(&self.settings.base_url, &self.settings.model);

        let body = serde_json::json!({
            "model": self.settings.model,
            "stream": true,
            "messages": build_messages(system_prompt, history, input),
        });

        tracing::debug!(
            session_id = %session_id,
            url = %url,
            history_len = history.len(),
            "Opening completion stream"
        );

        let rb = self.http.post(&url).json(&body);
        let rb = match provider.auth_scheme() {
            AuthScheme::Bearer => rb.bearer_auth(api_key),
            AuthScheme::ApiKeyHeader => rb.header("api-key", api_key),
        };

        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let text = resp.text().await.unwrap_or_default();
            let err = CompletionError::from_status(status, &text, retry_after);
            tracing::warn!(
                session_id = %session_id,
                status = status.as_u16(),
                kind = err.kind(),
                "Completion request rejected"
            );
            return Err(err);
        }

        let byte_stream = resp.bytes_stream();

        let session_id = session_id.to_string();
        let out = async_stream::try_stream! {
            let mut buf = Vec::<u8>::new();
            // `[DONE]` seen; nothing more to read.
            let mut done = false;
            // A `finish_reason` seen; the turn is complete even without `[DONE]`.
            let mut finish_reason: Option<String> = None;

            futures::pin_mut!(byte_stream);
            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk?;
                buf.extend_from_slice(&chunk);

                while let Some((end, delimiter)) = find_frame_end(&buf) {
                    let frame = buf.drain(..end + delimiter).collect::<Vec<_>>();
                    let text = String::from_utf8_lossy(&frame[..end]);

                    for event in parse_frame(&text)? {
                        match event {
                            StreamEvent::Fragment(text) => {
                                yield text;
                            }
                            StreamEvent::Finished(reason) => finish_reason = Some(reason),
                            StreamEvent::Done => done = true,
                        }
                    }
                    if done {
                        break;
                    }
                }
                if done {
                    break;
                }
            }

            // A trailing frame without the final blank line.
            if !done && !buf.is_empty() {
                let text = String::from_utf8_lossy(&buf).into_owned();
                for event in parse_frame(&text)? {
                    match event {
                        StreamEvent::Fragment(text) => {
                            yield text;
                        }
                        StreamEvent::Finished(reason) => finish_reason = Some(reason),
                        StreamEvent::Done => done = true,
                    }
                }
            }

            if !done && finish_reason.is_none() {
                tracing::warn!(
                    session_id = %session_id,
                    "Completion stream closed before the model finished"
                );
                Err::<(), _>(CompletionError::Truncated)?;
            }
            tracing::debug!(
                session_id = %session_id,
                finish_reason = finish_reason.as_deref().unwrap_or("done"),
                "Completion stream finished"
            );
        };

        Ok(Box::pin(out))
    }
}

/// A decoded server-sent event from the completions stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StreamEvent {
    /// Assistant text delta.
    Fragment(String),
    /// The model reported why it stopped (`choices[0].finish_reason`).
    Finished(String),
    /// End-of-stream marker (`data: [DONE]`).
    Done,
}

/// Decode one SSE frame into stream events.
///
/// Non-`data:` lines (comments, `event:`, keep-alives) are ignored. An
/// in-band `error` object is reported as [`CompletionError::Api`].
pub(crate) fn parse_frame(frame: &str) -> Result<Vec<StreamEvent>, CompletionError> {
    let mut events = Vec::new();

    for line in frame.lines() {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() {
            continue;
        }
        if data == "[DONE]" {
            events.push(StreamEvent::Done);
            continue;
        }

        let v: serde_json::Value = serde_json::from_str(data)
            .map_err(|e| CompletionError::Decode(format!("{e}: {data}")))?;

        if let Some(err) = v.get("error") {
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown provider error")
                .to_string();
            return Err(CompletionError::Api {
                status: 200,
                message,
            });
        }

        if let Some(s) = v["choices"][0]["delta"]
            .get("content")
            .and_then(|x| x.as_str())
            && !s.is_empty()
        {
            events.push(StreamEvent::Fragment(s.to_string()));
        }

        if let Some(reason) = v["choices"][0]
            .get("finish_reason")
            .and_then(|r| r.as_str())
        {
            events.push(StreamEvent::Finished(reason.to_string()));
        }
    }

    Ok(events)
}

/// Find the end of the first complete SSE frame, returning the frame length and
/// delimiter length. Accepts both `\n\n` and `\r\n\r\n` separators.
fn find_frame_end(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}
