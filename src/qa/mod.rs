//! Question answering over indexed episodes.
//!
//! A question is embedded, matched against the podcast's chunks and sent
//! to the generator together with the matched text. Answers are cached per
//! podcast and normalized question.

mod cache;
mod service;

pub use cache::{cache_key, AnswerCache};
pub use service::{AnswerService, INSUFFICIENT_INFORMATION};

use serde::{Deserialize, Serialize};

/// Characters of chunk text kept in a citation.
pub const SNIPPET_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub answer: String,
    pub citations: Vec<Citation>,
}

/// Where in which episode a piece of the answer came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub episode_id: i64,
    pub episode_title: String,
    pub audio_url: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub speaker_labels: Option<String>,
    pub text_snippet: String,
    pub listen_link: String,
}

/// `H:MM:SS` past the hour, `M:SS` below it.
pub fn format_timestamp(ms: i64) -> String {
    let seconds = ms.max(0) / 1000;
    let minutes = seconds / 60;
    let hours = minutes / 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes % 60, seconds % 60)
    } else {
        format!("{}:{:02}", minutes, seconds % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "0:00");
        assert_eq!(format_timestamp(65_000), "1:05");
        assert_eq!(format_timestamp(599_999), "9:59");
        assert_eq!(format_timestamp(3_600_000), "1:00:00");
        assert_eq!(format_timestamp(3_725_000), "1:02:05");
    }
}
