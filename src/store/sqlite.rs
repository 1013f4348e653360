//! SQLite store implementation.
//!
//! Similarity is computed in Rust over the podcast's chunks. That is fine for
//! a few thousand episodes; a vector extension would be the next step.

use super::{
    cosine_distance, rank_matches, ChunkMatch, EmbeddingChunk, Episode, NewEpisode, NewPodcast,
    Podcast, Store, TranscriptSegment,
};
use crate::error::{HarkError, Result};
use crate::pipeline::ProcessingStatus;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, instrument};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS podcasts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        feed_url TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        description TEXT,
        image_url TEXT,
        author TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        last_synced_at TEXT,
        download_until TEXT
    );

    CREATE TABLE IF NOT EXISTS episodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        podcast_id INTEGER NOT NULL REFERENCES podcasts(id),
        title TEXT NOT NULL,
        description TEXT,
        guid TEXT,
        content_hash TEXT NOT NULL,
        audio_url TEXT NOT NULL,
        audio_file_path TEXT,
        published_at TEXT,
        duration_seconds INTEGER,
        expected_parts INTEGER,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_episodes_podcast ON episodes(podcast_id);
    CREATE INDEX IF NOT EXISTS idx_episodes_status ON episodes(status);
    CREATE INDEX IF NOT EXISTS idx_episodes_guid ON episodes(guid);
    CREATE INDEX IF NOT EXISTS idx_episodes_content_hash ON episodes(content_hash);

    CREATE TABLE IF NOT EXISTS transcript_segments (
        episode_id INTEGER NOT NULL REFERENCES episodes(id),
        part_index INTEGER NOT NULL,
        segment_index INTEGER NOT NULL,
        start_ms INTEGER NOT NULL,
        end_ms INTEGER NOT NULL,
        text TEXT NOT NULL,
        speaker_label TEXT,
        PRIMARY KEY (episode_id, part_index, segment_index)
    );

    CREATE TABLE IF NOT EXISTS embedding_chunks (
        episode_id INTEGER NOT NULL REFERENCES episodes(id),
        chunk_index INTEGER NOT NULL,
        start_ms INTEGER NOT NULL,
        end_ms INTEGER NOT NULL,
        text TEXT NOT NULL,
        speaker_labels TEXT,
        embedding BLOB NOT NULL,
        PRIMARY KEY (episode_id, chunk_index)
    );
"#;

const PODCAST_COLUMNS: &str = "id, feed_url, title, description, image_url, author, \
     created_at, updated_at, last_synced_at, download_until";

const EPISODE_COLUMNS: &str = "id, podcast_id, title, description, guid, content_hash, \
     audio_url, audio_file_path, published_at, duration_seconds, expected_parts, status, \
     created_at, updated_at";

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    #[instrument(skip_all)]
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;

        info!("Initialized SQLite store at {:?}", path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| HarkError::Storage(format!("Failed to acquire lock: {}", e)))
    }

    fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| {
                let arr: [u8; 4] = chunk.try_into().unwrap_or_default();
                f32::from_le_bytes(arr)
            })
            .collect()
    }

    fn find_episode_locked(conn: &Connection, id: i64) -> Result<Option<Episode>> {
        let sql = format!("SELECT {} FROM episodes WHERE id = ?1", EPISODE_COLUMNS);
        Ok(conn.query_row(&sql, params![id], episode_from_row).optional()?)
    }
}

fn to_rfc3339(at: &DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn parse_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_optional_time(value: Option<String>) -> Option<DateTime<Utc>> {
    value.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

fn podcast_from_row(row: &Row<'_>) -> rusqlite::Result<Podcast> {
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    let download_until: Option<String> = row.get(9)?;

    Ok(Podcast {
        id: row.get(0)?,
        feed_url: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        image_url: row.get(4)?,
        author: row.get(5)?,
        created_at: parse_time(&created_at),
        updated_at: parse_time(&updated_at),
        last_synced_at: parse_optional_time(row.get(8)?),
        download_until: download_until
            .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
    })
}

fn episode_from_row(row: &Row<'_>) -> rusqlite::Result<Episode> {
    let status: String = row.get(11)?;
    let status = status.parse::<ProcessingStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(11, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let audio_file_path: Option<String> = row.get(7)?;
    let created_at: String = row.get(12)?;
    let updated_at: String = row.get(13)?;

    Ok(Episode {
        id: row.get(0)?,
        podcast_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        guid: row.get(4)?,
        content_hash: row.get(5)?,
        audio_url: row.get(6)?,
        audio_file_path: audio_file_path.map(PathBuf::from),
        published_at: parse_optional_time(row.get(8)?),
        duration_seconds: row.get(9)?,
        expected_parts: row.get(10)?,
        status,
        created_at: parse_time(&created_at),
        updated_at: parse_time(&updated_at),
    })
}

fn segment_from_row(row: &Row<'_>) -> rusqlite::Result<TranscriptSegment> {
    Ok(TranscriptSegment {
        episode_id: row.get(0)?,
        part_index: row.get(1)?,
        segment_index: row.get(2)?,
        start_ms: row.get(3)?,
        end_ms: row.get(4)?,
        text: row.get(5)?,
        speaker_label: row.get(6)?,
    })
}

fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<EmbeddingChunk> {
    let embedding: Vec<u8> = row.get(6)?;
    Ok(EmbeddingChunk {
        episode_id: row.get(0)?,
        chunk_index: row.get(1)?,
        start_ms: row.get(2)?,
        end_ms: row.get(3)?,
        text: row.get(4)?,
        speaker_labels: row.get(5)?,
        embedding: SqliteStore::bytes_to_embedding(&embedding),
    })
}

fn path_to_string(path: &Option<PathBuf>) -> Option<String> {
    path.as_ref().map(|p| p.to_string_lossy().into_owned())
}

#[async_trait]
impl Store for SqliteStore {
    #[instrument(skip(self, podcast), fields(feed_url = %podcast.feed_url))]
    async fn create_podcast(&self, podcast: NewPodcast) -> Result<Podcast> {
        let conn = self.lock()?;
        let now = Utc::now();

        let result = conn.execute(
            r#"
            INSERT INTO podcasts
            (feed_url, title, description, image_url, author, created_at, updated_at, download_until)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7)
            "#,
            params![
                podcast.feed_url,
                podcast.title,
                podcast.description,
                podcast.image_url,
                podcast.author,
                to_rfc3339(&now),
                podcast.download_until.map(|d| d.format("%Y-%m-%d").to_string()),
            ],
        );

        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(HarkError::AlreadyExists(format!("Podcast feed {}", podcast.feed_url)));
            }
            Err(e) => return Err(e.into()),
        }

        let id = conn.last_insert_rowid();
        let sql = format!("SELECT {} FROM podcasts WHERE id = ?1", PODCAST_COLUMNS);
        Ok(conn.query_row(&sql, params![id], podcast_from_row)?)
    }

    async fn find_podcast(&self, id: i64) -> Result<Option<Podcast>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM podcasts WHERE id = ?1", PODCAST_COLUMNS);
        Ok(conn.query_row(&sql, params![id], podcast_from_row).optional()?)
    }

    async fn find_podcast_by_feed_url(&self, feed_url: &str) -> Result<Option<Podcast>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM podcasts WHERE feed_url = ?1", PODCAST_COLUMNS);
        Ok(conn
            .query_row(&sql, params![feed_url], podcast_from_row)
            .optional()?)
    }

    async fn list_podcasts(&self) -> Result<Vec<Podcast>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM podcasts ORDER BY id", PODCAST_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let podcasts = stmt
            .query_map([], podcast_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(podcasts)
    }

    async fn mark_podcast_synced(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE podcasts SET last_synced_at = ?1, updated_at = ?2 WHERE id = ?3",
            params![to_rfc3339(&at), to_rfc3339(&Utc::now()), id],
        )?;
        if updated == 0 {
            return Err(HarkError::podcast_not_found(id));
        }
        Ok(())
    }

    #[instrument(skip(self, episodes), fields(count = episodes.len()))]
    async fn insert_episodes(&self, episodes: &[NewEpisode]) -> Result<Vec<Episode>> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let now = to_rfc3339(&Utc::now());
        let mut ids = Vec::with_capacity(episodes.len());

        for episode in episodes {
            tx.execute(
                r#"
                INSERT INTO episodes
                (podcast_id, title, description, guid, content_hash, audio_url,
                 published_at, status, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                "#,
                params![
                    episode.podcast_id,
                    episode.title,
                    episode.description,
                    episode.guid,
                    episode.content_hash,
                    episode.audio_url,
                    episode.published_at.as_ref().map(to_rfc3339),
                    ProcessingStatus::Discovered.as_str(),
                    now,
                ],
            )?;
            ids.push(tx.last_insert_rowid());
        }
        tx.commit()?;

        let mut created = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(episode) = Self::find_episode_locked(&conn, id)? {
                created.push(episode);
            }
        }
        debug!("Inserted {} episodes", created.len());
        Ok(created)
    }

    async fn find_episode(&self, id: i64) -> Result<Option<Episode>> {
        let conn = self.lock()?;
        Self::find_episode_locked(&conn, id)
    }

    async fn list_episodes(&self, podcast_id: i64) -> Result<Vec<Episode>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM episodes WHERE podcast_id = ?1 ORDER BY published_at DESC, id DESC",
            EPISODE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let episodes = stmt
            .query_map(params![podcast_id], episode_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(episodes)
    }

    async fn find_episodes_by_status(&self, status: ProcessingStatus) -> Result<Vec<Episode>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM episodes WHERE status = ?1 ORDER BY id",
            EPISODE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let episodes = stmt
            .query_map(params![status.as_str()], episode_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(episodes)
    }

    async fn episode_exists_by_guid(&self, guid: &str) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM episodes WHERE guid = ?1",
            params![guid],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    async fn episode_exists_by_content_hash(&self, content_hash: &str) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM episodes WHERE content_hash = ?1",
            params![content_hash],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    async fn compare_and_set_status(
        &self,
        id: i64,
        expected: ProcessingStatus,
        next: ProcessingStatus,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE episodes SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            params![next.as_str(), to_rfc3339(&Utc::now()), id, expected.as_str()],
        )?;

        if updated == 0 && Self::find_episode_locked(&conn, id)?.is_none() {
            return Err(HarkError::episode_not_found(id));
        }
        Ok(updated == 1)
    }

    async fn update_episode_if_status(
        &self,
        episode: &Episode,
        expected: ProcessingStatus,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let updated = conn.execute(
            r#"
            UPDATE episodes SET
                title = ?1, description = ?2, guid = ?3, content_hash = ?4, audio_url = ?5,
                audio_file_path = ?6, published_at = ?7, duration_seconds = ?8,
                expected_parts = ?9, status = ?10, updated_at = ?11
            WHERE id = ?12 AND status = ?13
            "#,
            params![
                episode.title,
                episode.description,
                episode.guid,
                episode.content_hash,
                episode.audio_url,
                path_to_string(&episode.audio_file_path),
                episode.published_at.as_ref().map(to_rfc3339),
                episode.duration_seconds,
                episode.expected_parts,
                episode.status.as_str(),
                to_rfc3339(&Utc::now()),
                episode.id,
                expected.as_str(),
            ],
        )?;

        if updated == 0 && Self::find_episode_locked(&conn, episode.id)?.is_none() {
            return Err(HarkError::episode_not_found(episode.id));
        }
        Ok(updated == 1)
    }

    #[instrument(skip(self, segments), fields(count = segments.len()))]
    async fn insert_segments(&self, segments: &[TranscriptSegment]) -> Result<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let mut inserted = 0;
        let mut taken = BTreeSet::new();
        let mut checked = BTreeSet::new();

        for segment in segments {
            let part = (segment.episode_id, segment.part_index);
            if checked.insert(part) {
                let existing: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM transcript_segments WHERE episode_id = ?1 AND part_index = ?2",
                    params![segment.episode_id, segment.part_index],
                    |row| row.get(0),
                )?;
                if existing > 0 {
                    taken.insert(part);
                }
            }
            if taken.contains(&part) {
                continue;
            }

            inserted += tx.execute(
                r#"
                INSERT OR IGNORE INTO transcript_segments
                (episode_id, part_index, segment_index, start_ms, end_ms, text, speaker_label)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    segment.episode_id,
                    segment.part_index,
                    segment.segment_index,
                    segment.start_ms,
                    segment.end_ms,
                    segment.text,
                    segment.speaker_label,
                ],
            )?;
        }

        tx.commit()?;
        Ok(inserted)
    }

    async fn segments_exist(&self, episode_id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM transcript_segments WHERE episode_id = ?1",
            params![episode_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    async fn transcribed_parts(&self, episode_id: i64) -> Result<BTreeSet<u32>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT part_index FROM transcript_segments WHERE episode_id = ?1",
        )?;
        let parts = stmt
            .query_map(params![episode_id], |row| row.get::<_, u32>(0))?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(parts)
    }

    async fn find_segments(&self, episode_id: i64) -> Result<Vec<TranscriptSegment>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT episode_id, part_index, segment_index, start_ms, end_ms, text, speaker_label
            FROM transcript_segments
            WHERE episode_id = ?1
            ORDER BY part_index, segment_index
            "#,
        )?;
        let segments = stmt
            .query_map(params![episode_id], segment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(segments)
    }

    #[instrument(skip(self, chunks), fields(count = chunks.len()))]
    async fn insert_chunks(&self, episode_id: i64, chunks: &[EmbeddingChunk]) -> Result<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        let existing: i64 = tx.query_row(
            "SELECT COUNT(*) FROM embedding_chunks WHERE episode_id = ?1",
            params![episode_id],
            |row| row.get(0),
        )?;
        if existing > 0 {
            debug!("Episode {} already has {} chunks", episode_id, existing);
            return Ok(0);
        }

        for chunk in chunks {
            tx.execute(
                r#"
                INSERT INTO embedding_chunks
                (episode_id, chunk_index, start_ms, end_ms, text, speaker_labels, embedding)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    episode_id,
                    chunk.chunk_index,
                    chunk.start_ms,
                    chunk.end_ms,
                    chunk.text,
                    chunk.speaker_labels,
                    Self::embedding_to_bytes(&chunk.embedding),
                ],
            )?;
        }

        tx.commit()?;
        info!("Stored {} chunks for episode {}", chunks.len(), episode_id);
        Ok(chunks.len())
    }

    async fn chunks_exist(&self, episode_id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM embedding_chunks WHERE episode_id = ?1",
            params![episode_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    async fn find_chunks(&self, episode_id: i64) -> Result<Vec<EmbeddingChunk>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT episode_id, chunk_index, start_ms, end_ms, text, speaker_labels, embedding
            FROM embedding_chunks
            WHERE episode_id = ?1
            ORDER BY chunk_index
            "#,
        )?;
        let chunks = stmt
            .query_map(params![episode_id], chunk_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    #[instrument(skip(self, query_embedding))]
    async fn search_chunks(
        &self,
        podcast_id: i64,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkMatch>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT c.episode_id, c.chunk_index, c.start_ms, c.end_ms, c.text,
                   c.speaker_labels, c.embedding, e.title, e.audio_url
            FROM embedding_chunks c
            JOIN episodes e ON e.id = c.episode_id
            WHERE e.podcast_id = ?1
            "#,
        )?;

        let rows = stmt.query_map(params![podcast_id], |row| {
            let chunk = chunk_from_row(row)?;
            Ok(ChunkMatch {
                distance: cosine_distance(query_embedding, &chunk.embedding),
                chunk,
                episode_title: row.get(7)?,
                audio_url: row.get(8)?,
            })
        })?;

        let matches = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        let ranked = rank_matches(matches, limit);
        debug!("Found {} matching chunks", ranked.len());
        Ok(ranked)
    }
}
