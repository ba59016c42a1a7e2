use std::collections::VecDeque;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{
    clients::event_stream::{SseDecoder, SseEvent},
    config::OpenAiConfig,
    services::generation::{DeltaStream, FeedbackGenerator, FeedbackPrompt, UpstreamError},
};

#[derive(Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: [InputMessage<'a>; 1],
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct InputMessage<'a> {
    role: &'static str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock<'a> {
    InputText { text: String },
    InputImage { image_url: &'a str },
}

#[derive(Deserialize, Default)]
struct StreamPayload {
    #[serde(rename = "type")]
    kind: Option<String>,
    delta: Option<String>,
    message: Option<String>,
    error: Option<ErrorBody>,
    response: Option<ResponseBody>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Deserialize)]
struct ResponseBody {
    error: Option<ErrorBody>,
    incomplete_details: Option<IncompleteDetails>,
}

#[derive(Deserialize)]
struct IncompleteDetails {
    reason: Option<String>,
}

/// What one upstream event means for the relay.
#[derive(Debug, PartialEq, Eq)]
enum Step {
    Delta(String),
    Completed,
    Failed(String),
    Ignore,
}

fn interpret(event: &SseEvent) -> Step {
    if event.data.trim() == "[DONE]" {
        return Step::Completed;
    }

    let payload: StreamPayload = sonic_rs::from_str(&event.data).unwrap_or_default();
    let kind = payload
        .kind
        .as_deref()
        .or(event.event.as_deref())
        .unwrap_or_default();

    match kind {
        "response.output_text.delta" => match payload.delta {
            Some(delta) if !delta.is_empty() => Step::Delta(delta),
            _ => Step::Ignore,
        },
        "response.completed" => Step::Completed,
        "response.failed" => Step::Failed(
            payload
                .response
                .and_then(|r| r.error)
                .and_then(|e| e.message)
                .unwrap_or_else(|| "generation failed".to_string()),
        ),
        "response.incomplete" => Step::Failed(format!(
            "generation incomplete: {}",
            payload
                .response
                .and_then(|r| r.incomplete_details)
                .and_then(|d| d.reason)
                .unwrap_or_else(|| "unknown reason".to_string())
        )),
        "error" => Step::Failed(
            payload
                .message
                .or_else(|| payload.error.and_then(|e| e.message))
                .unwrap_or_else(|| "upstream error".to_string()),
        ),
        _ => Step::Ignore,
    }
}

struct DeltaState<S> {
    body: S,
    decoder: SseDecoder,
    pending: VecDeque<Step>,
    body_ended: bool,
    finished: bool,
}

/// Turns a raw event-stream body into text deltas.
///
/// Ends cleanly only on a completion event; a body that closes without one
/// yields a final `Stream` error.
fn deltas<S, B>(body: S) -> impl Stream<Item = Result<String, UpstreamError>>
where
    S: Stream<Item = reqwest::Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    let state = DeltaState {
        body,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        body_ended: false,
        finished: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if st.finished {
                return None;
            }

            if let Some(step) = st.pending.pop_front() {
                match step {
                    Step::Delta(text) => return Some((Ok(text), st)),
                    Step::Completed => {
                        st.finished = true;
                        return None;
                    }
                    Step::Failed(message) => {
                        st.finished = true;
                        return Some((Err(UpstreamError::Stream(message)), st));
                    }
                    Step::Ignore => continue,
                }
            }

            if st.body_ended {
                st.finished = true;
                return Some((
                    Err(UpstreamError::Stream(
                        "upstream closed before completion".to_string(),
                    )),
                    st,
                ));
            }

            match st.body.next().await {
                Some(Ok(chunk)) => {
                    let events = st.decoder.push(chunk.as_ref());
                    st.pending.extend(events.iter().map(interpret));
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(UpstreamError::Stream(e.to_string())), st));
                }
                None => {
                    st.body_ended = true;
                    if let Some(event) = st.decoder.finish() {
                        st.pending.push_back(interpret(&event));
                    }
                }
            }
        }
    })
}

/// Streams feedback from the OpenAI Responses API.
pub struct OpenAiGenerator {
    http: reqwest::Client,
    api_key: Zeroizing<String>,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OpenAiGenerator {
    pub fn new(http: reqwest::Client, config: &OpenAiConfig, api_key: Zeroizing<String>) -> Self {
        Self {
            http,
            api_key,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl FeedbackGenerator for OpenAiGenerator {
    async fn open(&self, prompt: &FeedbackPrompt) -> Result<DeltaStream, UpstreamError> {
        let mut content = vec![ContentBlock::InputText {
            text: prompt.render(),
        }];
        if let Some(url) = &prompt.image_url {
            content.push(ContentBlock::InputImage {
                image_url: url.as_str(),
            });
        }

        let request = ResponsesRequest {
            model: &self.model,
            input: [InputMessage {
                role: "user",
                content,
            }],
            temperature: self.temperature,
            stream: true,
        };

        let response = self
            .http
            .post(format!("{}/responses", self.base_url))
            .bearer_auth(self.api_key.as_str())
            .json(&request)
            .send()
            .await
            .map_err(|e| UpstreamError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = sonic_rs::from_str::<StreamPayload>(&body)
                .ok()
                .and_then(|p| p.error)
                .and_then(|e| e.message)
                .unwrap_or(body);
            return Err(UpstreamError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        tracing::debug!("📡 Feedback stream opened with model {}", self.model);
        Ok(deltas(response.bytes_stream().boxed()).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(chunks: &[&'static str]) -> impl Stream<Item = reqwest::Result<&'static [u8]>> + Unpin {
        futures::stream::iter(
            chunks
                .iter()
                .map(|c| Ok(c.as_bytes()))
                .collect::<Vec<_>>(),
        )
    }

    async fn collect(chunks: &[&'static str]) -> Vec<Result<String, UpstreamError>> {
        deltas(body(chunks)).collect().await
    }

    #[tokio::test]
    async fn relays_deltas_until_completed() {
        let out = collect(&[
            "event: response.created\ndata: {\"type\":\"response.created\"}\n\n",
            "event: response.output_text.delta\ndata: {\"type\":\"response.output_text.delta\",\"delta\":\"Good \"}\n\n",
            "event: response.output_text.delta\ndata: {\"type\":\"response.output_text.delta\",\"delta\":\"job!\"}\n\n",
            "event: response.completed\ndata: {\"type\":\"response.completed\"}\n\n",
            "event: response.output_text.delta\ndata: {\"type\":\"response.output_text.delta\",\"delta\":\"ignored\"}\n\n",
        ])
        .await;
        assert_eq!(out, vec![Ok("Good ".to_string()), Ok("job!".to_string())]);
    }

    #[tokio::test]
    async fn failure_event_ends_with_error() {
        let out = collect(&[
            "data: {\"type\":\"response.output_text.delta\",\"delta\":\"Hal\"}\n\n",
            "data: {\"type\":\"response.failed\",\"response\":{\"error\":{\"message\":\"overloaded\"}}}\n\n",
        ])
        .await;
        assert_eq!(
            out,
            vec![
                Ok("Hal".to_string()),
                Err(UpstreamError::Stream("overloaded".to_string()))
            ]
        );
    }

    #[tokio::test]
    async fn truncated_body_is_an_error() {
        let out = collect(&["data: {\"type\":\"response.output_text.delta\",\"delta\":\"Hal\"}\n\n"]).await;
        assert_eq!(out.len(), 2);
        assert!(matches!(out[1], Err(UpstreamError::Stream(_))));
    }

    #[test]
    fn interprets_error_shapes() {
        let event = SseEvent {
            event: Some("error".into()),
            data: "{\"type\":\"error\",\"message\":\"rate limited\"}".into(),
        };
        assert_eq!(interpret(&event), Step::Failed("rate limited".into()));

        let event = SseEvent {
            event: None,
            data: "{\"type\":\"response.incomplete\",\"response\":{\"incomplete_details\":{\"reason\":\"max_output_tokens\"}}}".into(),
        };
        assert_eq!(
            interpret(&event),
            Step::Failed("generation incomplete: max_output_tokens".into())
        );

        let event = SseEvent {
            event: None,
            data: "[DONE]".into(),
        };
        assert_eq!(interpret(&event), Step::Completed);
    }

    #[test]
    fn request_shape_matches_responses_api() {
        let request = ResponsesRequest {
            model: "gpt-4o-mini",
            input: [InputMessage {
                role: "user",
                content: vec![
                    ContentBlock::InputText { text: "hi".into() },
                    ContentBlock::InputImage {
                        image_url: "https://cdn.example.com/a.png",
                    },
                ],
            }],
            temperature: 0.7,
            stream: true,
        };
        let json = sonic_rs::to_string(&request).unwrap();
        assert!(json.contains("\"type\":\"input_text\""));
        assert!(json.contains("\"type\":\"input_image\",\"image_url\":\"https://cdn.example.com/a.png\""));
        assert!(json.contains("\"stream\":true"));
    }
}
