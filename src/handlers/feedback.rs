use std::convert::Infallible;

use axum::{
    Extension,
    extract::{Path, State},
    http::{HeaderName, HeaderValue},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::StreamExt;
use uuid::Uuid;

use crate::{
    error::Result,
    middleware_layer::auth::CurrentUser,
    services::feedback::{FeedbackEvent, FeedbackOutcome, FeedbackStream},
    state::AppState,
};

/// Carriage returns are not allowed inside an SSE field.
fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Frames one relay event for the wire.
pub fn to_sse_event(event: FeedbackEvent) -> Event {
    match event {
        FeedbackEvent::Delta(text) => Event::default().data(normalize_newlines(&text)),
        FeedbackEvent::Error(message) => Event::default()
            .event("error")
            .data(normalize_newlines(&message)),
        FeedbackEvent::Done => Event::default().event("done").data("[DONE]"),
    }
}

/// Streams AI feedback for one of the caller's diaries as server-sent events.
///
/// A diary the caller does not own is a plain 404; everything after the
/// stream opens is reported in-band.
#[axum::debug_handler]
pub async fn stream_feedback(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(diary_id): Path<Uuid>,
) -> Result<Response> {
    let FeedbackStream { events, outcome } = state.feedback.start(&user, diary_id).await?;

    tokio::spawn(async move {
        match outcome.await {
            Ok(FeedbackOutcome::Completed { persisted }) => {
                tracing::info!("✅ Feedback for diary {} completed (persisted: {})", diary_id, persisted);
            }
            Ok(FeedbackOutcome::ClientDisconnected { persisted }) => {
                tracing::info!("🔌 Feedback for diary {} ended after disconnect (persisted: {})", diary_id, persisted);
            }
            Ok(FeedbackOutcome::UpstreamError) => {
                tracing::warn!("⚠️ Feedback for diary {} ended with an upstream error", diary_id);
            }
            Err(e) => {
                tracing::error!("❌ Feedback relay for diary {} panicked: {}", diary_id, e);
            }
        }
    });

    let events = events.map(|event| Ok::<_, Infallible>(to_sse_event(event)));

    Ok((
        [(
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        )],
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
        .into_response())
}
