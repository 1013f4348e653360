//! Episode processing states and the legal moves between them.
//!
//! Status doubles as a lease: a stage claims an episode by moving it out of
//! the state it expects, and that move is a single compare-and-set in
//! storage. Two workers racing for the same episode cannot both win.

use crate::error::{HarkError, Result};
use crate::store::Store;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Discovered,
    Downloading,
    Downloaded,
    Transcribing,
    Transcribed,
    Indexing,
    Indexed,
    Failed,
}

impl ProcessingStatus {
    pub const ALL: [ProcessingStatus; 8] = [
        ProcessingStatus::Discovered,
        ProcessingStatus::Downloading,
        ProcessingStatus::Downloaded,
        ProcessingStatus::Transcribing,
        ProcessingStatus::Transcribed,
        ProcessingStatus::Indexing,
        ProcessingStatus::Indexed,
        ProcessingStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Discovered => "DISCOVERED",
            ProcessingStatus::Downloading => "DOWNLOADING",
            ProcessingStatus::Downloaded => "DOWNLOADED",
            ProcessingStatus::Transcribing => "TRANSCRIBING",
            ProcessingStatus::Transcribed => "TRANSCRIBED",
            ProcessingStatus::Indexing => "INDEXING",
            ProcessingStatus::Indexed => "INDEXED",
            ProcessingStatus::Failed => "FAILED",
        }
    }

    /// INDEXED and FAILED only move again on an explicit retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Indexed | ProcessingStatus::Failed)
    }

    /// Whether `self -> next` is a legal move.
    pub fn can_transition_to(&self, next: ProcessingStatus) -> bool {
        use ProcessingStatus::*;

        if next == Failed {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Discovered, Downloading)
                | (Downloading, Downloaded)
                | (Downloaded, Transcribing)
                | (Transcribing, Transcribed)
                | (Transcribed, Indexing)
                | (Indexing, Indexed)
                // Reconciliation of a stalled transcription.
                | (Transcribing, Discovered)
                | (Transcribing, Downloaded)
                // Manual retry of a failed episode.
                | (Failed, Discovered)
                | (Failed, Downloaded)
                | (Failed, Transcribed)
        )
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = HarkError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ProcessingStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| HarkError::InvalidInput(format!("Unknown processing status: {}", s)))
    }
}

/// Check the move against the table, then compare-and-set it.
///
/// Returns `Ok(false)` when the episode was no longer in `from`, which means
/// someone else got there first.
pub async fn transition(
    store: &dyn Store,
    episode_id: i64,
    from: ProcessingStatus,
    to: ProcessingStatus,
) -> Result<bool> {
    if !from.can_transition_to(to) {
        return Err(HarkError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    let moved = store.compare_and_set_status(episode_id, from, to).await?;
    if moved {
        debug!("Episode {} {} -> {}", episode_id, from, to);
    } else {
        debug!("Episode {} was not {} (wanted -> {})", episode_id, from, to);
    }
    Ok(moved)
}
