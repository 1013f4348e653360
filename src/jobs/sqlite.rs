//! SQLite-backed durable job queue.
//!
//! Several processes may share one database file: a CLI enqueues while a
//! worker process dequeues. In-process waiters are woken by a [`Notify`];
//! cross-process arrivals are picked up by polling in short slices.

use super::{Job, JobQueue, QueueSnapshot, POLL_SLICE};
use crate::error::{HarkError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS job_queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        payload TEXT NOT NULL,
        enqueued_at TEXT NOT NULL
    );
"#;

pub struct SqliteJobQueue {
    conn: Mutex<Connection>,
    notify: Notify,
}

impl SqliteJobQueue {
    /// Open (or create) the queue table in the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;

        info!("Opened job queue at {:?}", path);
        Ok(Self {
            conn: Mutex::new(conn),
            notify: Notify::new(),
        })
    }

    /// Create an in-memory queue (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
            notify: Notify::new(),
        })
    }

    /// Append an already-serialized item.
    pub fn push_raw(&self, raw: &str) -> Result<()> {
        {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO job_queue (payload, enqueued_at) VALUES (?1, ?2)",
                params![raw, Utc::now().to_rfc3339()],
            )?;
        }
        self.notify.notify_one();
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| HarkError::Queue(format!("Failed to acquire lock: {}", e)))
    }

    /// Remove and return the oldest raw item, if any.
    fn pop_raw(&self) -> Result<Option<String>> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        let head: Option<(i64, String)> = tx
            .query_row(
                "SELECT id, payload FROM job_queue ORDER BY id LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((id, _)) = &head {
            tx.execute("DELETE FROM job_queue WHERE id = ?1", params![id])?;
        }
        tx.commit()?;

        Ok(head.map(|(_, payload)| payload))
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(&self, mut job: Job) -> Result<String> {
        let id = job.ensure_id();
        self.push_raw(&job.to_json()?)?;
        debug!("Enqueued {} for {} ({})", job.job_type(), job.resource_id(), id);
        Ok(id)
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Job>> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.pop_raw()? {
                Some(raw) => match Job::from_json(&raw) {
                    Ok(job) => return Ok(Some(job)),
                    Err(e) => {
                        warn!("Dropping unreadable queue item: {}", e);
                        continue;
                    }
                },
                None => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    let wait = (deadline - now).min(POLL_SLICE);
                    let _ = tokio::time::timeout(wait, self.notify.notified()).await;
                }
            }
        }
    }

    async fn snapshot(&self, limit: usize) -> Result<QueueSnapshot> {
        let conn = self.lock()?;

        let total: i64 = conn.query_row("SELECT COUNT(*) FROM job_queue", [], |row| row.get(0))?;

        let mut stmt = conn.prepare("SELECT payload FROM job_queue ORDER BY id")?;
        let payloads = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut jobs = Vec::new();
        for payload in payloads {
            if jobs.len() >= limit {
                break;
            }
            if let Ok(job) = Job::from_json(&payload?) {
                jobs.push(job);
            }
        }

        Ok(QueueSnapshot {
            total_size: total as usize,
            jobs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_fifo_and_round_trip() {
        let queue = SqliteJobQueue::in_memory().unwrap();
        let part = Job::transcribe(5, 2, Some(PathBuf::from("/audio/episode_5_part2.mp3")));

        queue.enqueue(Job::sync_episodes(1)).await.unwrap();
        let part_id = queue.enqueue(part.clone()).await.unwrap();

        let first = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first.kind, Job::sync_episodes(1).kind);

        let second = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(second.kind, part.kind);
        assert_eq!(second.job_id.as_deref(), Some(part_id.as_str()));

        assert!(queue.dequeue(Duration::from_millis(5)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_does_not_consume() {
        let queue = SqliteJobQueue::in_memory().unwrap();
        for id in 0..5 {
            queue.enqueue(Job::download_audio(id)).await.unwrap();
        }
        queue.push_raw("[1,2,3]").unwrap();

        let snapshot = queue.snapshot(3).await.unwrap();
        assert_eq!(snapshot.total_size, 6);
        let ids: Vec<i64> = snapshot.jobs.iter().map(Job::resource_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(queue.size().await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_malformed_head_is_skipped() {
        let queue = SqliteJobQueue::in_memory().unwrap();
        queue.push_raw(r#"{"type":"TRANSCRIBE"}"#).unwrap();
        queue.enqueue(Job::index_episode(8)).await.unwrap();

        let job = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(job.resource_id(), 8);
        assert_eq!(queue.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        {
            let queue = SqliteJobQueue::open(&path).unwrap();
            queue.enqueue(Job::download_audio(11)).await.unwrap();
        }

        let queue = SqliteJobQueue::open(&path).unwrap();
        let job = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(job.resource_id(), 11);
    }
}
