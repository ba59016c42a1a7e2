use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use url::Url;

use crate::models::diary::Diary;

/// Instructions prepended to every feedback request.
pub const COACH_PREAMBLE: &str = "You are an empathetic and concise investment journal coach. \
Read the user's diary entry and mood, then provide: \n\
1) A brief reflection (2-3 sentences) acknowledging the emotion,\n\
2) 1-2 actionable next steps for tomorrow,\n\
3) A short risk reminder when relevant.\n\n\
Keep it under 120 words. Use a friendly tone in Korean.";

/// Failure of the upstream text-generation channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// The channel could not be opened.
    #[error("feedback service unavailable: {0}")]
    Unavailable(String),
    /// The upstream answered the open request with an error status.
    #[error("feedback service rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    /// The channel failed after it was opened.
    #[error("feedback stream failed: {0}")]
    Stream(String),
    /// No unit arrived within the idle timeout.
    #[error("feedback stream stalled for {0:?}")]
    IdleTimeout(Duration),
}

/// Ordered text deltas from an open generation channel.
///
/// The stream ends (`None`) only when the upstream reports completion.
pub type DeltaStream = BoxStream<'static, Result<String, UpstreamError>>;

/// Everything the upstream needs to write feedback for one entry.
#[derive(Clone, Debug, PartialEq)]
pub struct FeedbackPrompt {
    pub content: String,
    pub mood: String,
    /// Only absolute http(s) URLs survive; anything else is dropped.
    pub image_url: Option<Url>,
    pub display_name: Option<String>,
}

impl FeedbackPrompt {
    pub fn for_diary(diary: &Diary, display_name: Option<&str>) -> Self {
        Self {
            content: diary.content.clone(),
            mood: diary.mood.clone(),
            image_url: diary.photo_url.as_deref().and_then(attachable_image),
            display_name: display_name.map(str::to_string),
        }
    }

    /// The text block sent upstream.
    pub fn render(&self) -> String {
        let mut text = String::from(COACH_PREAMBLE);
        if let Some(name) = &self.display_name {
            text.push_str(&format!("\n\nWriter: {}", name));
        }
        text.push_str(&format!(
            "\n\nDiary Content:\n{}\n\nMood: {}",
            self.content, self.mood
        ));
        text
    }
}

/// Parses `raw` and keeps it only if it is an absolute http(s) URL with a host.
pub fn attachable_image(raw: &str) -> Option<Url> {
    let url = Url::parse(raw.trim()).ok()?;
    match url.scheme() {
        "http" | "https" if url.host().is_some() => Some(url),
        _ => None,
    }
}

/// Opens a streaming generation channel.
#[async_trait]
pub trait FeedbackGenerator: Send + Sync {
    async fn open(&self, prompt: &FeedbackPrompt) -> Result<DeltaStream, UpstreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_absolute_http_urls_are_attached() {
        assert!(attachable_image("https://cdn.example.com/a.png").is_some());
        assert!(attachable_image("http://cdn.example.com/a.png").is_some());
        assert!(attachable_image("/static/a.png").is_none());
        assert!(attachable_image("ftp://cdn.example.com/a.png").is_none());
        assert!(attachable_image("data:image/png;base64,AAAA").is_none());
        assert!(attachable_image("").is_none());
    }

    #[test]
    fn render_includes_entry_and_mood() {
        let prompt = FeedbackPrompt {
            content: "Sold half my position".into(),
            mood: "worried".into(),
            image_url: None,
            display_name: Some("Min".into()),
        };
        let text = prompt.render();
        assert!(text.starts_with(COACH_PREAMBLE));
        assert!(text.contains("Writer: Min"));
        assert!(text.ends_with("Diary Content:\nSold half my position\n\nMood: worried"));
    }
}
