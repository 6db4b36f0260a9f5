//! SQLite message queue backend.

use super::{MessageQueue, QueueSnapshot};
use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use guardian_types::{DeviceId, QueueStat, QueuedMessage};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// SQLite-backed per-recipient queues.
///
/// Every operation is a single SQL statement, so each one is atomic and
/// sees a consistent snapshot. Uses WAL mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteQueue {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteQueue")
            .field("connections", &self.pool.size())
            .finish()
    }
}

impl SqliteQueue {
    /// Open (or create) the queue database at `path`.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Full)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        let queue = Self { pool };
        queue.run_migrations().await?;
        Ok(queue)
    }

    /// Create an in-memory queue (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // One connection: each connection to :memory: is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let queue = Self { pool };
        queue.run_migrations().await?;
        Ok(queue)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        // seq gives FIFO order within a recipient and is never reused
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                recipient TEXT NOT NULL,
                sender TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_recipient_seq ON messages(recipient, seq)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl MessageQueue for SqliteQueue {
    async fn enqueue(
        &self,
        recipient: &DeviceId,
        message: QueuedMessage,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO messages (recipient, sender, payload, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(recipient.as_str())
        .bind(message.from.as_str())
        .bind(&message.data)
        .bind(message.timestamp.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn drain(&self, recipient: &DeviceId) -> Result<Vec<QueuedMessage>, StorageError> {
        // Read and clear in one statement: a concurrent enqueue lands either
        // wholly in this batch or wholly in the next.
        let mut rows = sqlx::query_as::<_, MessageRow>(
            r#"
            DELETE FROM messages
            WHERE recipient = ?1
            RETURNING seq, sender, payload, created_at
            "#,
        )
        .bind(recipient.as_str())
        .fetch_all(&self.pool)
        .await?;

        // RETURNING order is unspecified
        rows.sort_by_key(|row| row.seq);
        rows.into_iter().map(QueuedMessage::try_from).collect()
    }

    async fn stats(&self) -> Result<QueueSnapshot, StorageError> {
        let rows = sqlx::query_as::<_, StatRow>(
            r#"
            SELECT m.recipient AS recipient,
                   COUNT(*) AS count,
                   (SELECT l.created_at FROM messages l
                     WHERE l.recipient = m.recipient
                     ORDER BY l.seq DESC LIMIT 1) AS last_at
            FROM messages m
            GROUP BY m.recipient
            ORDER BY m.recipient
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut snapshot = QueueSnapshot::default();
        for row in rows {
            let device_id = DeviceId::parse(row.recipient)
                .map_err(|e| StorageError::Corrupt(e.to_string()))?;
            let count = row.count as u64;
            snapshot.total_messages += count;
            snapshot.queues.push(QueueStat {
                device_id,
                count,
                last_msg: row.last_at.and_then(DateTime::<Utc>::from_timestamp_millis),
            });
        }
        Ok(snapshot)
    }
}

/// Internal row type for drained messages.
#[derive(sqlx::FromRow)]
struct MessageRow {
    seq: i64,
    sender: String,
    payload: String,
    created_at: i64,
}

impl TryFrom<MessageRow> for QueuedMessage {
    type Error = StorageError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(QueuedMessage {
            from: DeviceId::parse(row.sender).map_err(|e| StorageError::Corrupt(e.to_string()))?,
            data: row.payload,
            timestamp: DateTime::<Utc>::from_timestamp_millis(row.created_at).ok_or_else(|| {
                StorageError::Corrupt(format!("timestamp out of range: {}", row.created_at))
            })?,
        })
    }
}

/// Internal row type for queue statistics.
#[derive(sqlx::FromRow)]
struct StatRow {
    recipient: String,
    count: i64,
    last_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn device(id: &str) -> DeviceId {
        DeviceId::parse(id).unwrap()
    }

    fn message(from: &str, data: &str) -> QueuedMessage {
        QueuedMessage {
            from: device(from),
            data: data.to_string(),
            timestamp: DateTime::<Utc>::from_timestamp_millis(Utc::now().timestamp_millis())
                .unwrap(),
        }
    }

    #[tokio::test]
    async fn drain_returns_messages_in_enqueue_order() {
        let queue = SqliteQueue::in_memory().await.unwrap();
        let recipient = device("target1");

        let sent: Vec<_> = (0..5)
            .map(|i| message("sender", &format!("payload-{i}")))
            .collect();
        for msg in &sent {
            queue.enqueue(&recipient, msg.clone()).await.unwrap();
        }

        let drained = queue.drain(&recipient).await.unwrap();
        assert_eq!(drained, sent);

        // Second drain is empty
        assert!(queue.drain(&recipient).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn drain_of_unknown_recipient_is_empty() {
        let queue = SqliteQueue::in_memory().await.unwrap();
        assert!(queue.drain(&device("nobody")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recipients_are_isolated() {
        let queue = SqliteQueue::in_memory().await.unwrap();
        let a = device("device-a");
        let b = device("device-b");

        queue.enqueue(&a, message("x", "for-a")).await.unwrap();
        queue.enqueue(&b, message("x", "for-b-1")).await.unwrap();
        queue.enqueue(&b, message("y", "for-b-2")).await.unwrap();

        let drained_a = queue.drain(&a).await.unwrap();
        assert_eq!(drained_a.len(), 1);
        assert_eq!(drained_a[0].data, "for-a");

        // Draining A left B untouched
        let snapshot = queue.stats().await.unwrap();
        assert_eq!(snapshot.total_messages, 2);
        assert_eq!(snapshot.queues.len(), 1);
        assert_eq!(snapshot.queues[0].device_id, b);

        let drained_b: Vec<_> = queue
            .drain(&b)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.data)
            .collect();
        assert_eq!(drained_b, vec!["for-b-1", "for-b-2"]);
    }

    #[tokio::test]
    async fn stats_reports_depth_and_last_activity() {
        let queue = SqliteQueue::in_memory().await.unwrap();
        let target1 = device("target1");

        let first = message("s", "1");
        let mut second = message("s", "2");
        second.timestamp = first.timestamp + chrono::Duration::seconds(5);

        queue.enqueue(&target1, first).await.unwrap();
        queue.enqueue(&target1, second.clone()).await.unwrap();

        let snapshot = queue.stats().await.unwrap();
        assert_eq!(snapshot.total_messages, 2);
        assert_eq!(snapshot.queues.len(), 1);
        assert_eq!(snapshot.queues[0].count, 2);
        assert_eq!(snapshot.queues[0].last_msg, Some(second.timestamp));

        // Drained queues disappear from stats
        queue.drain(&target1).await.unwrap();
        assert_eq!(queue.stats().await.unwrap(), QueueSnapshot::default());
    }

    #[tokio::test]
    async fn queue_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.db");
        let recipient = device("target1");

        {
            let queue = SqliteQueue::new(&path).await.unwrap();
            queue.enqueue(&recipient, message("s", "durable")).await.unwrap();
            queue.pool.close().await;
        }

        let queue = SqliteQueue::new(&path).await.unwrap();
        let drained = queue.drain(&recipient).await.unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].data, "durable");
    }

    #[tokio::test]
    async fn concurrent_senders_and_drains_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(SqliteQueue::new(&dir.path().join("q.db")).await.unwrap());
        let recipient = device("target1");

        let senders = 8;
        let per_sender = 25;

        let mut handles = Vec::new();
        for s in 0..senders {
            let queue = queue.clone();
            let recipient = recipient.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..per_sender {
                    queue
                        .enqueue(&recipient, message(&format!("sender-{s}"), &format!("{s}:{i}")))
                        .await
                        .unwrap();
                }
            }));
        }

        // Drain while senders are still running
        let mut received = Vec::new();
        for _ in 0..10 {
            received.extend(queue.drain(&recipient).await.unwrap());
            tokio::task::yield_now().await;
        }
        for handle in handles {
            handle.await.unwrap();
        }
        received.extend(queue.drain(&recipient).await.unwrap());

        assert_eq!(received.len(), senders * per_sender);

        // No duplicates, and each sender's messages arrive in send order
        let mut seen = std::collections::HashSet::new();
        for s in 0..senders {
            let from = device(&format!("sender-{s}"));
            let order: Vec<usize> = received
                .iter()
                .filter(|m| m.from == from)
                .map(|m| m.data.split(':').nth(1).unwrap().parse().unwrap())
                .collect();
            assert_eq!(order, (0..per_sender).collect::<Vec<_>>());
        }
        for m in &received {
            assert!(seen.insert(m.data.clone()), "duplicate {}", m.data);
        }
    }
}
