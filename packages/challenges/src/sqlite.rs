// ABOUTME: SQLite-backed challenge store layered over the bundled catalog
// ABOUTME: Database rows override bundled entries; any database failure falls back to the catalog

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

use crate::catalog::CatalogStore;
use crate::error::Result;
use crate::types::{Challenge, ChallengeStore, Difficulty};

/// Challenge store that reads operator-managed rows from SQLite and keeps
/// the bundled catalog underneath. A row with a bundled id shadows the
/// bundled entry; lookups never fail outright while the catalog is intact.
#[derive(Clone)]
pub struct SqliteChallengeStore {
    pool: Arc<SqlitePool>,
    fallback: CatalogStore,
}

impl SqliteChallengeStore {
    pub fn new(pool: Arc<SqlitePool>, fallback: CatalogStore) -> Self {
        Self { pool, fallback }
    }

    /// Create the challenges table if it does not exist.
    pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(include_str!("../migrations/001_challenges.sql"))
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Insert or replace a challenge row.
    pub async fn upsert(&self, challenge: &Challenge) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO challenges (
                id, title, difficulty, summary, description,
                broken_code, test_code, success_message,
                solution_code, debrief, setup_command, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                difficulty = excluded.difficulty,
                summary = excluded.summary,
                description = excluded.description,
                broken_code = excluded.broken_code,
                test_code = excluded.test_code,
                success_message = excluded.success_message,
                solution_code = excluded.solution_code,
                debrief = excluded.debrief,
                setup_command = excluded.setup_command,
                updated_at = datetime('now')
            "#,
        )
        .bind(&challenge.id)
        .bind(&challenge.title)
        .bind(challenge.difficulty.as_str())
        .bind(&challenge.summary)
        .bind(&challenge.description)
        .bind(&challenge.broken_code)
        .bind(&challenge.test_code)
        .bind(&challenge.success_message)
        .bind(&challenge.solution_code)
        .bind(&challenge.debrief)
        .bind(&challenge.setup_command)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_one(&self, id: &str) -> Result<Option<Challenge>> {
        let row = sqlx::query(
            r#"
            SELECT id, title, difficulty, summary, description,
                   broken_code, test_code, success_message,
                   solution_code, debrief, setup_command
            FROM challenges
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        row.map(row_to_challenge).transpose()
    }

    async fn fetch_all(&self) -> Result<Vec<Challenge>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, difficulty, summary, description,
                   broken_code, test_code, success_message,
                   solution_code, debrief, setup_command
            FROM challenges
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await?;

        rows.into_iter().map(row_to_challenge).collect()
    }
}

fn row_to_challenge(row: sqlx::sqlite::SqliteRow) -> Result<Challenge> {
    let difficulty: String = row.get("difficulty");

    Ok(Challenge {
        id: row.get("id"),
        title: row.get("title"),
        difficulty: difficulty.parse::<Difficulty>()?,
        summary: row.get("summary"),
        description: row.get("description"),
        broken_code: row.get("broken_code"),
        test_code: row.get("test_code"),
        success_message: row.get("success_message"),
        solution_code: row.get("solution_code"),
        debrief: row.get("debrief"),
        setup_command: row.get("setup_command"),
    })
}

#[async_trait]
impl ChallengeStore for SqliteChallengeStore {
    async fn get(&self, id: &str) -> Result<Option<Challenge>> {
        let from_db = match self.fetch_one(id).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Challenge lookup for '{}' hit the catalog fallback: {}", id, e);
                return Ok(self.fallback.find(id).cloned());
            }
        };

        Ok(from_db.or_else(|| self.fallback.find(id).cloned()))
    }

    async fn list(&self) -> Result<Vec<Challenge>> {
        let mut merged = match self.fetch_all().await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Challenge listing hit the catalog fallback: {}", e);
                return Ok(self.fallback.all());
            }
        };

        let seen: HashSet<String> = merged.iter().map(|c| c.id.clone()).collect();
        merged.extend(
            self.fallback
                .all()
                .into_iter()
                .filter(|c| !seen.contains(&c.id)),
        );

        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn store_with_schema() -> SqliteChallengeStore {
        let pool = SqlitePool::connect(":memory:")
            .await
            .expect("Failed to create test database");
        SqliteChallengeStore::init_schema(&pool)
            .await
            .expect("Failed to create schema");
        SqliteChallengeStore::new(Arc::new(pool), CatalogStore::bundled().unwrap())
    }

    fn sample_challenge(id: &str) -> Challenge {
        Challenge {
            id: id.to_string(),
            title: "Operator Special".to_string(),
            difficulty: Difficulty::Medium,
            summary: "Seeded from the database.".to_string(),
            description: "Long form.".to_string(),
            broken_code: "def broken(): ...\n".to_string(),
            test_code: "def test_broken(): ...\n".to_string(),
            success_message: "Done.".to_string(),
            solution_code: None,
            debrief: None,
            setup_command: Some("pip install requests".to_string()),
        }
    }

    #[tokio::test]
    async fn database_rows_round_trip() {
        let store = store_with_schema().await;
        let seeded = sample_challenge("ops-only-101");
        store.upsert(&seeded).await.unwrap();

        let fetched = store.get("ops-only-101").await.unwrap().unwrap();
        assert_eq!(fetched, seeded);
    }

    #[tokio::test]
    async fn bundled_entries_resolve_through_an_empty_table() {
        let store = store_with_schema().await;
        let challenge = store.get("ai-cost-cache-002").await.unwrap().unwrap();
        assert_eq!(challenge.id, "ai-cost-cache-002");
    }

    #[tokio::test]
    async fn database_row_shadows_bundled_entry() {
        let store = store_with_schema().await;
        let mut shadow = sample_challenge("ai-cost-cache-002");
        shadow.title = "Patched In Production".to_string();
        store.upsert(&shadow).await.unwrap();

        let fetched = store.get("ai-cost-cache-002").await.unwrap().unwrap();
        assert_eq!(fetched.title, "Patched In Production");
    }

    #[tokio::test]
    async fn missing_schema_falls_back_to_catalog() {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        let store = SqliteChallengeStore::new(Arc::new(pool), CatalogStore::bundled().unwrap());

        let challenge = store.get("token-window-003").await.unwrap();
        assert!(challenge.is_some());

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), CatalogStore::bundled().unwrap().len());
    }

    #[tokio::test]
    async fn list_merges_database_and_catalog() {
        let store = store_with_schema().await;
        store.upsert(&sample_challenge("ops-only-101")).await.unwrap();

        let all = store.list().await.unwrap();
        let ids: Vec<&str> = all.iter().map(|c| c.id.as_str()).collect();
        assert!(ids.contains(&"ops-only-101"));
        assert!(ids.contains(&"retry-storm-001"));
        assert_eq!(
            ids.iter().filter(|id| **id == "retry-storm-001").count(),
            1
        );
    }
}
