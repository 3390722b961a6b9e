// src/store/sqlite.rs
// SQLite-backed Store implementation. Schema is bootstrapped inline via
// `CREATE TABLE IF NOT EXISTS` on connect, matching the teacher's
// lightweight stores rather than pulling in a separate migration
// toolchain — there is exactly one schema version to manage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

use crate::error::StoreError;

use super::{
    ConflictEntryRow, Conversation, LexicalTokenRow, MemoryStats, Message, NewMessage,
    SemanticItemRow, Store, SummaryRow, Tier,
};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connects to (creating if absent) the SQLite file at `path`, creating
    /// its parent directory if needed, and bootstraps the schema.
    pub async fn connect(path: &str) -> Result<Self, StoreError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))
            .map_err(StoreError::Sqlx)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub async fn connect_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(StoreError::Sqlx)?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                topic TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                turn INTEGER NOT NULL,
                speaker_id TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (conversation_id, turn)
            );

            CREATE TABLE IF NOT EXISTS lexical_tokens (
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                token TEXT NOT NULL,
                weight REAL NOT NULL,
                occurrences INTEGER NOT NULL,
                last_turn INTEGER NOT NULL,
                PRIMARY KEY (conversation_id, token)
            );

            CREATE TABLE IF NOT EXISTS semantic_items (
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                item_type TEXT NOT NULL,
                canonical_text TEXT NOT NULL,
                evidence_text TEXT NOT NULL,
                weight REAL NOT NULL,
                confidence REAL NOT NULL,
                occurrences INTEGER NOT NULL,
                first_turn INTEGER NOT NULL,
                last_turn INTEGER NOT NULL,
                status TEXT NOT NULL,
                PRIMARY KEY (conversation_id, item_type, canonical_text)
            );

            CREATE TABLE IF NOT EXISTS micro_summaries (
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                start_turn INTEGER NOT NULL,
                end_turn INTEGER NOT NULL,
                summary TEXT NOT NULL,
                PRIMARY KEY (conversation_id, start_turn, end_turn)
            );

            CREATE TABLE IF NOT EXISTS tier_summaries (
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                tier TEXT NOT NULL,
                start_turn INTEGER NOT NULL,
                end_turn INTEGER NOT NULL,
                summary TEXT NOT NULL,
                PRIMARY KEY (conversation_id, tier, start_turn, end_turn)
            );

            CREATE TABLE IF NOT EXISTS conflict_entries (
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                issue_key TEXT NOT NULL,
                item_a TEXT NOT NULL,
                item_b TEXT NOT NULL,
                confidence REAL NOT NULL,
                status TEXT NOT NULL,
                first_turn INTEGER NOT NULL,
                last_turn INTEGER NOT NULL,
                occurrences INTEGER NOT NULL,
                PRIMARY KEY (conversation_id, issue_key)
            );

            CREATE INDEX IF NOT EXISTS idx_messages_conv_turn ON messages(conversation_id, turn);
            CREATE INDEX IF NOT EXISTS idx_lexical_weight ON lexical_tokens(conversation_id, weight DESC, last_turn DESC);
            CREATE INDEX IF NOT EXISTS idx_semantic_weight ON semantic_items(conversation_id, weight DESC, last_turn DESC);
            CREATE INDEX IF NOT EXISTS idx_conflict_conf ON conflict_entries(conversation_id, confidence DESC, last_turn DESC);
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("colloquy schema bootstrapped");
        Ok(())
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Message {
        let created_ts: i64 = row.get("created_at");
        Message {
            conversation_id: row.get("conversation_id"),
            turn: row.get("turn"),
            speaker_id: row.get("speaker_id"),
            text: row.get("text"),
            created_at: DateTime::from_timestamp(created_ts, 0).unwrap_or_else(Utc::now),
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>, StoreError> {
        let row = sqlx::query("SELECT id, topic, created_at, updated_at FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| {
            let created_ts: i64 = r.get("created_at");
            let updated_ts: i64 = r.get("updated_at");
            Conversation {
                id: r.get("id"),
                topic: r.get("topic"),
                created_at: DateTime::from_timestamp(created_ts, 0).unwrap_or_else(Utc::now),
                updated_at: DateTime::from_timestamp(updated_ts, 0).unwrap_or_else(Utc::now),
            }
        }))
    }

    async fn create_conversation(&self, id: &str, topic: &str) -> Result<Conversation, StoreError> {
        let now = Utc::now();
        sqlx::query("INSERT INTO conversations (id, topic, created_at, updated_at) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(topic)
            .bind(now.timestamp())
            .bind(now.timestamp())
            .execute(&self.pool)
            .await?;

        Ok(Conversation {
            id: id.to_string(),
            topic: topic.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    async fn append_messages(
        &self,
        conversation_id: &str,
        entries: &[NewMessage],
    ) -> Result<Vec<Message>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let mut saved = Vec::with_capacity(entries.len());

        for entry in entries {
            let exists: Option<(i64,)> = sqlx::query_as(
                "SELECT 1 FROM messages WHERE conversation_id = ? AND turn = ?",
            )
            .bind(conversation_id)
            .bind(entry.turn)
            .fetch_optional(&mut *tx)
            .await?;

            if exists.is_some() {
                return Err(StoreError::DuplicateTurn {
                    conversation_id: conversation_id.to_string(),
                    turn: entry.turn,
                });
            }

            sqlx::query(
                "INSERT INTO messages (conversation_id, turn, speaker_id, text, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(conversation_id)
            .bind(entry.turn)
            .bind(&entry.speaker_id)
            .bind(&entry.text)
            .bind(now.timestamp())
            .execute(&mut *tx)
            .await?;

            saved.push(Message {
                conversation_id: conversation_id.to_string(),
                turn: entry.turn,
                speaker_id: entry.speaker_id.clone(),
                text: entry.text.clone(),
                created_at: now,
            });
        }

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(now.timestamp())
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(saved)
    }

    async fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            "SELECT conversation_id, turn, speaker_id, text, created_at FROM messages WHERE conversation_id = ? ORDER BY turn ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_message).collect())
    }

    async fn get_messages_in_range(
        &self,
        conversation_id: &str,
        start_turn: i64,
        end_turn: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            "SELECT conversation_id, turn, speaker_id, text, created_at FROM messages WHERE conversation_id = ? AND turn >= ? AND turn <= ? ORDER BY turn ASC",
        )
        .bind(conversation_id)
        .bind(start_turn)
        .bind(end_turn)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_message).collect())
    }

    async fn get_messages_up_to_turn(
        &self,
        conversation_id: &str,
        turn: i64,
    ) -> Result<Vec<Message>, StoreError> {
        self.get_messages_in_range(conversation_id, 1, turn).await
    }

    async fn upsert_lexical_tokens(
        &self,
        conversation_id: &str,
        tokens: &[LexicalTokenRow],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for t in tokens {
            sqlx::query(
                r#"
                INSERT INTO lexical_tokens (conversation_id, token, weight, occurrences, last_turn)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(conversation_id, token) DO UPDATE SET
                    weight = lexical_tokens.weight + excluded.weight,
                    occurrences = lexical_tokens.occurrences + excluded.occurrences,
                    last_turn = MAX(lexical_tokens.last_turn, excluded.last_turn)
                "#,
            )
            .bind(conversation_id)
            .bind(&t.token)
            .bind(t.weight)
            .bind(t.occurrences)
            .bind(t.last_turn)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn prune_lexical_tokens(&self, conversation_id: &str, keep: usize) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            DELETE FROM lexical_tokens
            WHERE conversation_id = ? AND token NOT IN (
                SELECT token FROM lexical_tokens
                WHERE conversation_id = ?
                ORDER BY weight DESC, last_turn DESC, token ASC
                LIMIT ?
            )
            "#,
        )
        .bind(conversation_id)
        .bind(conversation_id)
        .bind(keep as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_lexical_tokens(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<LexicalTokenRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT token, weight, occurrences, last_turn FROM lexical_tokens WHERE conversation_id = ? ORDER BY weight DESC, last_turn DESC, token ASC LIMIT ?",
        )
        .bind(conversation_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| LexicalTokenRow {
                token: r.get("token"),
                weight: r.get("weight"),
                occurrences: r.get("occurrences"),
                last_turn: r.get("last_turn"),
            })
            .collect())
    }

    async fn upsert_semantic_items(
        &self,
        conversation_id: &str,
        items: &[SemanticItemRow],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for it in items {
            sqlx::query(
                r#"
                INSERT INTO semantic_items (
                    conversation_id, item_type, canonical_text, evidence_text,
                    weight, confidence, occurrences, first_turn, last_turn, status
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(conversation_id, item_type, canonical_text) DO UPDATE SET
                    evidence_text = excluded.evidence_text,
                    weight = semantic_items.weight + excluded.weight,
                    occurrences = semantic_items.occurrences + excluded.occurrences,
                    confidence = MAX(semantic_items.confidence, excluded.confidence),
                    first_turn = MIN(semantic_items.first_turn, excluded.first_turn),
                    last_turn = MAX(semantic_items.last_turn, excluded.last_turn)
                "#,
            )
            .bind(conversation_id)
            .bind(&it.item_type)
            .bind(&it.canonical_text)
            .bind(&it.evidence_text)
            .bind(it.weight)
            .bind(it.confidence)
            .bind(it.occurrences)
            .bind(it.first_turn)
            .bind(it.last_turn)
            .bind(&it.status)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn prune_semantic_items(&self, conversation_id: &str, keep: usize) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            DELETE FROM semantic_items
            WHERE conversation_id = ? AND rowid NOT IN (
                SELECT rowid FROM semantic_items
                WHERE conversation_id = ?
                ORDER BY weight DESC, last_turn DESC, canonical_text ASC
                LIMIT ?
            )
            "#,
        )
        .bind(conversation_id)
        .bind(conversation_id)
        .bind(keep as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_semantic_items(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<SemanticItemRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT item_type, canonical_text, evidence_text, weight, confidence, occurrences, first_turn, last_turn, status
            FROM semantic_items WHERE conversation_id = ?
            ORDER BY weight DESC, last_turn DESC, canonical_text ASC LIMIT ?
            "#,
        )
        .bind(conversation_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| SemanticItemRow {
                item_type: r.get("item_type"),
                canonical_text: r.get("canonical_text"),
                evidence_text: r.get("evidence_text"),
                weight: r.get("weight"),
                confidence: r.get("confidence"),
                occurrences: r.get("occurrences"),
                first_turn: r.get("first_turn"),
                last_turn: r.get("last_turn"),
                status: r.get("status"),
            })
            .collect())
    }

    async fn insert_micro_summary(
        &self,
        conversation_id: &str,
        row: &SummaryRow,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR IGNORE INTO micro_summaries (conversation_id, start_turn, end_turn, summary) VALUES (?, ?, ?, ?)",
        )
        .bind(conversation_id)
        .bind(row.start_turn)
        .bind(row.end_turn)
        .bind(&row.summary)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_recent_micro_summaries(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<SummaryRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT start_turn, end_turn, summary FROM micro_summaries WHERE conversation_id = ? ORDER BY end_turn DESC LIMIT ?",
        )
        .bind(conversation_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out: Vec<SummaryRow> = rows
            .into_iter()
            .map(|r| SummaryRow {
                start_turn: r.get("start_turn"),
                end_turn: r.get("end_turn"),
                summary: r.get("summary"),
            })
            .collect();
        out.reverse();
        Ok(out)
    }

    async fn list_all_micro_summaries(&self, conversation_id: &str) -> Result<Vec<SummaryRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT start_turn, end_turn, summary FROM micro_summaries WHERE conversation_id = ? ORDER BY start_turn ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| SummaryRow {
                start_turn: r.get("start_turn"),
                end_turn: r.get("end_turn"),
                summary: r.get("summary"),
            })
            .collect())
    }

    async fn insert_tier_summary(
        &self,
        conversation_id: &str,
        tier: Tier,
        row: &SummaryRow,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR IGNORE INTO tier_summaries (conversation_id, tier, start_turn, end_turn, summary) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(conversation_id)
        .bind(tier.as_str())
        .bind(row.start_turn)
        .bind(row.end_turn)
        .bind(&row.summary)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_recent_tier_summaries(
        &self,
        conversation_id: &str,
        tier: Tier,
        limit: usize,
    ) -> Result<Vec<SummaryRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT start_turn, end_turn, summary FROM tier_summaries WHERE conversation_id = ? AND tier = ? ORDER BY end_turn DESC LIMIT ?",
        )
        .bind(conversation_id)
        .bind(tier.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out: Vec<SummaryRow> = rows
            .into_iter()
            .map(|r| SummaryRow {
                start_turn: r.get("start_turn"),
                end_turn: r.get("end_turn"),
                summary: r.get("summary"),
            })
            .collect();
        out.reverse();
        Ok(out)
    }

    async fn list_all_tier_summaries(
        &self,
        conversation_id: &str,
        tier: Tier,
    ) -> Result<Vec<SummaryRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT start_turn, end_turn, summary FROM tier_summaries WHERE conversation_id = ? AND tier = ? ORDER BY start_turn ASC",
        )
        .bind(conversation_id)
        .bind(tier.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| SummaryRow {
                start_turn: r.get("start_turn"),
                end_turn: r.get("end_turn"),
                summary: r.get("summary"),
            })
            .collect())
    }

    async fn upsert_conflict_entries(
        &self,
        conversation_id: &str,
        entries: &[ConflictEntryRow],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for e in entries {
            sqlx::query(
                r#"
                INSERT INTO conflict_entries (
                    conversation_id, issue_key, item_a, item_b, confidence, status, first_turn, last_turn, occurrences
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(conversation_id, issue_key) DO UPDATE SET
                    item_a = excluded.item_a,
                    item_b = excluded.item_b,
                    confidence = MAX(conflict_entries.confidence, excluded.confidence),
                    status = excluded.status,
                    first_turn = MIN(conflict_entries.first_turn, excluded.first_turn),
                    last_turn = MAX(conflict_entries.last_turn, excluded.last_turn),
                    occurrences = conflict_entries.occurrences + excluded.occurrences
                "#,
            )
            .bind(conversation_id)
            .bind(&e.issue_key)
            .bind(&e.item_a)
            .bind(&e.item_b)
            .bind(e.confidence)
            .bind(&e.status)
            .bind(e.first_turn)
            .bind(e.last_turn)
            .bind(e.occurrences)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn prune_conflict_entries(&self, conversation_id: &str, keep: usize) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            DELETE FROM conflict_entries
            WHERE conversation_id = ? AND issue_key NOT IN (
                SELECT issue_key FROM conflict_entries
                WHERE conversation_id = ?
                ORDER BY confidence DESC, last_turn DESC, issue_key ASC
                LIMIT ?
            )
            "#,
        )
        .bind(conversation_id)
        .bind(conversation_id)
        .bind(keep as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_conflict_entries(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ConflictEntryRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT issue_key, item_a, item_b, confidence, status, first_turn, last_turn, occurrences FROM conflict_entries WHERE conversation_id = ? ORDER BY confidence DESC, last_turn DESC LIMIT ?",
        )
        .bind(conversation_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ConflictEntryRow {
                issue_key: r.get("issue_key"),
                item_a: r.get("item_a"),
                item_b: r.get("item_b"),
                confidence: r.get("confidence"),
                status: r.get("status"),
                first_turn: r.get("first_turn"),
                last_turn: r.get("last_turn"),
                occurrences: r.get("occurrences"),
            })
            .collect())
    }

    async fn get_memory_stats(&self, conversation_id: &str) -> Result<MemoryStats, StoreError> {
        let token_count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM lexical_tokens WHERE conversation_id = ?")
                .bind(conversation_id)
                .fetch_one(&self.pool)
                .await?;

        let summary_count: (i64,) = sqlx::query_as(
            "SELECT (SELECT COUNT(*) FROM micro_summaries WHERE conversation_id = ?) + (SELECT COUNT(*) FROM tier_summaries WHERE conversation_id = ?)",
        )
        .bind(conversation_id)
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await?;

        let semantic_count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM semantic_items WHERE conversation_id = ?")
                .bind(conversation_id)
                .fetch_one(&self.pool)
                .await?;

        let type_count = |item_type: &'static str| {
            let conversation_id = conversation_id.to_string();
            let pool = self.pool.clone();
            async move {
                let row: (i64,) = sqlx::query_as(
                    "SELECT COUNT(*) FROM semantic_items WHERE conversation_id = ? AND item_type = ?",
                )
                .bind(&conversation_id)
                .bind(item_type)
                .fetch_one(&pool)
                .await?;
                Ok::<i64, sqlx::Error>(row.0)
            }
        };

        let decision_count = type_count("decision").await?;
        let open_question_count = type_count("open_question").await?;
        let constraint_count = type_count("constraint").await?;
        let definition_count = type_count("definition").await?;

        let last_summary_turn: (Option<i64>,) =
            sqlx::query_as("SELECT MAX(end_turn) FROM micro_summaries WHERE conversation_id = ?")
                .bind(conversation_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(MemoryStats {
            token_count: token_count.0,
            summary_count: summary_count.0,
            semantic_count: semantic_count.0,
            decision_count,
            open_question_count,
            constraint_count,
            definition_count,
            last_summary_turn: last_summary_turn.0.unwrap_or(0),
        })
    }
}
