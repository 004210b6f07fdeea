pub mod models;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use models::{ChatExchange, Document, User};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use crate::embedding::{bytes_to_embedding, embedding_to_bytes};
use crate::rag::{ExchangeLog, KnowledgeBase};
use crate::rate_limit::{Admission, RateLimitPolicy};
use crate::{Error, Result};

/// Timestamps are stored as unix milliseconds so they can be compared in SQL.
fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::Internal(format!("cannot create {}: {e}", parent.display())))?;
            }
        }
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        // Several processes may share the file; wait for their locks.
        conn.busy_timeout(Duration::from_secs(5))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Internal("database lock poisoned".to_string()))
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                rate_limit_count INTEGER NOT NULL DEFAULT 0,
                rate_limit_reset INTEGER,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                embedding BLOB,
                source TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chat_exchanges (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                message TEXT NOT NULL,
                response TEXT NOT NULL,
                context TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            CREATE INDEX IF NOT EXISTS idx_chat_exchanges_conversation
                ON chat_exchanges(user_id, conversation_id);
            ",
        )?;
        Ok(())
    }

    // ── Users ──

    fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
        let reset: Option<i64> = row.get(4)?;
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            password_hash: row.get(2)?,
            rate_limit_count: row.get(3)?,
            rate_limit_reset: reset.map(from_millis),
            created_at: from_millis(row.get(5)?),
        })
    }

    pub fn create_user(&self, email: &str, password_hash: &str) -> Result<User> {
        let conn = self.conn()?;
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = from_millis(to_millis(Utc::now()));
        let inserted = conn.execute(
            "INSERT INTO users (id, email, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, email, password_hash, to_millis(created_at)],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(Error::Conflict("User already exists".to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        Ok(User {
            id,
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            rate_limit_count: 0,
            rate_limit_reset: None,
            created_at,
        })
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT id, email, password_hash, rate_limit_count, rate_limit_reset, created_at
                 FROM users WHERE id = ?1",
                params![id],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT id, email, password_hash, rate_limit_count, rate_limit_reset, created_at
                 FROM users WHERE email = ?1",
                params![email],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// Count one request against the user's fixed window.
    ///
    /// Opening a new window and incrementing inside the current one happen in a
    /// single conditional `UPDATE`. SQLite evaluates every `SET` expression
    /// against the old row, and the `WHERE` clause refuses the update once the
    /// window is full. A request that updates nothing is either over the limit
    /// or aimed at a missing user, and the follow-up read only tells them apart.
    pub fn admit_request(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        policy: &RateLimitPolicy,
    ) -> Result<Admission> {
        let conn = self.conn()?;
        let now_ms = to_millis(now);
        let next_reset = now_ms.saturating_add(policy.window_millis());

        let updated: Option<(u32, i64)> = conn
            .query_row(
                "UPDATE users SET
                    rate_limit_count = CASE
                        WHEN rate_limit_reset IS NULL OR ?2 >= rate_limit_reset THEN 1
                        ELSE rate_limit_count + 1
                    END,
                    rate_limit_reset = CASE
                        WHEN rate_limit_reset IS NULL OR ?2 >= rate_limit_reset THEN ?3
                        ELSE rate_limit_reset
                    END
                 WHERE id = ?1
                   AND ?4 > 0
                   AND (rate_limit_reset IS NULL OR ?2 >= rate_limit_reset OR rate_limit_count < ?4)
                 RETURNING rate_limit_count, rate_limit_reset",
                params![user_id, now_ms, next_reset, policy.limit],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((count, reset)) = updated {
            return Ok(Admission {
                allowed: true,
                remaining: policy.limit.saturating_sub(count),
                reset_at: from_millis(reset),
            });
        }

        let reset: Option<Option<i64>> = conn
            .query_row(
                "SELECT rate_limit_reset FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;

        match reset {
            None => Err(Error::NotFound("User not found".to_string())),
            Some(reset) => Ok(Admission {
                allowed: false,
                remaining: 0,
                reset_at: reset.map(from_millis).unwrap_or_else(|| from_millis(next_reset)),
            }),
        }
    }

    // ── Documents ──

    pub fn insert_document(
        &self,
        content: &str,
        embedding: Option<&[f32]>,
        source: Option<&str>,
    ) -> Result<Document> {
        let conn = self.conn()?;
        Self::insert_document_with(&conn, content, embedding, source)
    }

    /// Store every chunk of one upload in a single transaction.
    pub fn insert_documents(
        &self,
        chunks: &[(String, Vec<f32>)],
        source: Option<&str>,
    ) -> Result<Vec<Document>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let documents = chunks
            .iter()
            .map(|(content, embedding)| {
                Self::insert_document_with(&tx, content, Some(embedding), source)
            })
            .collect::<Result<Vec<_>>>()?;
        tx.commit()?;
        Ok(documents)
    }

    fn insert_document_with(
        conn: &Connection,
        content: &str,
        embedding: Option<&[f32]>,
        source: Option<&str>,
    ) -> Result<Document> {
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = from_millis(to_millis(Utc::now()));
        conn.execute(
            "INSERT INTO documents (id, content, embedding, source, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                content,
                embedding.map(embedding_to_bytes),
                source,
                to_millis(created_at)
            ],
        )?;
        Ok(Document {
            id,
            content: content.to_string(),
            embedding: embedding.map(<[f32]>::to_vec),
            source: source.map(str::to_string),
            created_at,
        })
    }

    /// All documents in insertion order.
    pub fn list_documents(&self) -> Result<Vec<Document>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, content, embedding, source, created_at FROM documents ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let bytes: Option<Vec<u8>> = row.get(2)?;
            Ok(Document {
                id: row.get(0)?,
                content: row.get(1)?,
                embedding: bytes.as_deref().map(bytes_to_embedding),
                source: row.get(3)?,
                created_at: from_millis(row.get(4)?),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ── Chat exchanges ──

    pub fn append_exchange(&self, exchange: &ChatExchange) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO chat_exchanges (id, user_id, conversation_id, message, response, context, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                exchange.id,
                exchange.user_id,
                exchange.conversation_id,
                exchange.message,
                exchange.response,
                exchange.context,
                to_millis(exchange.timestamp)
            ],
        )?;
        Ok(())
    }

    pub fn get_exchanges(&self, user_id: &str, conversation_id: &str) -> Result<Vec<ChatExchange>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, conversation_id, message, response, context, timestamp
             FROM chat_exchanges
             WHERE user_id = ?1 AND conversation_id = ?2
             ORDER BY timestamp ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![user_id, conversation_id], |row| {
            Ok(ChatExchange {
                id: row.get(0)?,
                user_id: row.get(1)?,
                conversation_id: row.get(2)?,
                message: row.get(3)?,
                response: row.get(4)?,
                context: row.get(5)?,
                timestamp: from_millis(row.get(6)?),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[async_trait]
impl KnowledgeBase for Database {
    async fn list_documents(&self) -> Result<Vec<Document>> {
        Database::list_documents(self)
    }
}

#[async_trait]
impl ExchangeLog for Database {
    async fn append_exchange(&self, exchange: &ChatExchange) -> Result<()> {
        Database::append_exchange(self, exchange)
    }

    async fn conversation(&self, user_id: &str, conversation_id: &str) -> Result<Vec<ChatExchange>> {
        self.get_exchanges(user_id, conversation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn policy(limit: u32) -> RateLimitPolicy {
        RateLimitPolicy {
            limit,
            window: Duration::from_secs(3600),
        }
    }

    fn now() -> DateTime<Utc> {
        from_millis(to_millis(Utc::now()))
    }

    #[test]
    fn test_create_and_fetch_user() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user("fan@example.com", "hash").unwrap();

        let by_id = db.get_user(&user.id).unwrap().unwrap();
        assert_eq!(by_id.email, "fan@example.com");
        assert_eq!(by_id.rate_limit_count, 0);
        assert!(by_id.rate_limit_reset.is_none());

        let by_email = db.get_user_by_email("fan@example.com").unwrap().unwrap();
        assert_eq!(by_email.id, user.id);
        assert!(db.get_user("missing").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_email_is_conflict() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("fan@example.com", "hash").unwrap();
        let err = db.create_user("fan@example.com", "other").unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_admit_request_fixed_window() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user("fan@example.com", "hash").unwrap();
        let policy = policy(4);
        let start = now();

        for expected_remaining in [3, 2, 1, 0] {
            let admission = db.admit_request(&user.id, start, &policy).unwrap();
            assert!(admission.allowed);
            assert_eq!(admission.remaining, expected_remaining);
            assert_eq!(admission.reset_at, start + chrono::Duration::hours(1));
        }

        let rejected = db.admit_request(&user.id, start, &policy).unwrap();
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert_eq!(rejected.reset_at, start + chrono::Duration::hours(1));

        // The rejected call did not consume anything.
        let stored = db.get_user(&user.id).unwrap().unwrap();
        assert_eq!(stored.rate_limit_count, 4);

        let after_reset = rejected.reset_at;
        let admission = db.admit_request(&user.id, after_reset, &policy).unwrap();
        assert!(admission.allowed);
        assert_eq!(admission.remaining, 3);
        assert_eq!(admission.reset_at, after_reset + chrono::Duration::hours(1));
    }

    #[test]
    fn test_admit_request_matches_pure_rule() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user("fan@example.com", "hash").unwrap();
        let policy = policy(3);
        let start = now();

        let mut state = None;
        let times = [
            start,
            start + chrono::Duration::minutes(5),
            start + chrono::Duration::minutes(10),
            start + chrono::Duration::minutes(15),
            start + chrono::Duration::minutes(61),
            start + chrono::Duration::minutes(62),
        ];
        for t in times {
            let (expected, next) = policy.evaluate(state, t);
            if next.is_some() {
                state = next;
            }
            let actual = db.admit_request(&user.id, t, &policy).unwrap();
            assert_eq!(actual, expected, "diverged at {t}");
        }
    }

    #[test]
    fn test_admit_request_unknown_user() {
        let db = Database::open_in_memory().unwrap();
        let err = db.admit_request("ghost", now(), &policy(4)).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_documents_roundtrip_embeddings() {
        let db = Database::open_in_memory().unwrap();
        db.insert_document("Sachin scored 100 international centuries.", Some(&[0.5, -0.25][..]), Some("notes.txt"))
            .unwrap();
        db.insert_document("Unembedded note.", None, None).unwrap();

        let docs = db.list_documents().unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].embedding.as_deref(), Some(&[0.5, -0.25][..]));
        assert_eq!(docs[0].source.as_deref(), Some("notes.txt"));
        assert!(docs[1].embedding.is_none());
    }

    #[test]
    fn test_insert_documents_is_all_or_nothing() {
        let db = Database::open_in_memory().unwrap();
        db.conn()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_bad BEFORE INSERT ON documents
                 WHEN NEW.content = 'bad'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let chunks = vec![
            ("Bradman averaged 99.94.".to_string(), vec![1.0, 0.0]),
            ("bad".to_string(), vec![0.0, 1.0]),
        ];
        let err = db.insert_documents(&chunks, Some("stats.txt")).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(db.list_documents().unwrap().is_empty());

        let stored = db.insert_documents(&chunks[..1], Some("stats.txt")).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(db.list_documents().unwrap().len(), 1);
    }

    #[test]
    fn test_exchanges_are_scoped_to_user_and_conversation() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user("alice@example.com", "hash").unwrap();
        let bob = db.create_user("bob@example.com", "hash").unwrap();

        let exchange = |user_id: &str, conversation_id: &str, message: &str| ChatExchange {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            message: message.to_string(),
            response: "answer".to_string(),
            context: String::new(),
            timestamp: now(),
            conversation_id: conversation_id.to_string(),
        };

        db.append_exchange(&exchange(&alice.id, "c1", "first")).unwrap();
        db.append_exchange(&exchange(&alice.id, "c1", "second")).unwrap();
        db.append_exchange(&exchange(&alice.id, "c2", "elsewhere")).unwrap();
        db.append_exchange(&exchange(&bob.id, "c1", "bob's")).unwrap();

        let history = db.get_exchanges(&alice.id, "c1").unwrap();
        let messages: Vec<&str> = history.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }

    #[test]
    fn test_exchange_requires_existing_user() {
        let db = Database::open_in_memory().unwrap();
        let orphan = ChatExchange {
            id: "x".to_string(),
            user_id: "nobody".to_string(),
            message: "hi".to_string(),
            response: "hello".to_string(),
            context: String::new(),
            timestamp: now(),
            conversation_id: "c".to_string(),
        };
        assert!(matches!(db.append_exchange(&orphan), Err(Error::Storage(_))));
    }

    #[test]
    fn test_database_file_persists_counters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("chat.db");
        let start = now();

        let user_id = {
            let db = Database::new(&path).unwrap();
            let user = db.create_user("fan@example.com", "hash").unwrap();
            db.admit_request(&user.id, start, &policy(2)).unwrap();
            db.admit_request(&user.id, start, &policy(2)).unwrap();
            user.id
        };

        let reopened = Database::new(&path).unwrap();
        let rejected = reopened.admit_request(&user_id, start, &policy(2)).unwrap();
        assert!(!rejected.allowed);
    }
}
