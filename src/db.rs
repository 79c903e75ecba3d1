use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};

use crate::error::Result;
use crate::models::Repository;

/// Shared durable store. All row access goes through the owning component
/// stores; this type only manages the pool and the schema.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(url: &str) -> Result<Self> {
        // Options apply per pooled connection, unlike ad-hoc PRAGMA queries
        let options = SqliteConnectOptions::from_str(url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// In-memory database for tests. One connection only: each SQLite
    /// in-memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        // SQLite executes one statement per call
        for statement in include_str!("../migrations/001_initial.sql").split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Look up a connected repository by its GitHub identifier. `None` for
    /// repositories this deployment does not know about.
    pub async fn find_repository_by_github_id(
        &self,
        github_id: i64,
    ) -> Result<Option<Repository>> {
        let row = sqlx::query_as::<_, RepositoryRow>(
            "SELECT id, github_id, owner, name, full_name, user_id, auto_review_enabled
             FROM repositories WHERE github_id = ?",
        )
        .bind(github_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Repository::from))
    }
}

#[derive(sqlx::FromRow)]
struct RepositoryRow {
    id: i64,
    github_id: i64,
    owner: String,
    name: String,
    full_name: String,
    user_id: i64,
    auto_review_enabled: bool,
}

impl From<RepositoryRow> for Repository {
    fn from(r: RepositoryRow) -> Self {
        Repository {
            id: r.id,
            github_id: r.github_id,
            owner: r.owner,
            name: r.name,
            full_name: r.full_name,
            user_id: r.user_id,
            auto_review_enabled: r.auto_review_enabled,
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use super::Database;

    /// Insert a user and connected repository, returning (user_id, repo_id).
    pub async fn seed_repository(db: &Database, github_id: i64, auto_review: bool) -> (i64, i64) {
        let user_id = sqlx::query("INSERT INTO users (github_login) VALUES (?)")
            .bind(format!("user-{github_id}"))
            .execute(db.pool())
            .await
            .unwrap()
            .last_insert_rowid();

        let repo_id = sqlx::query(
            "INSERT INTO repositories (github_id, owner, name, full_name, user_id, auto_review_enabled)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(github_id)
        .bind("acme")
        .bind(format!("widgets-{github_id}"))
        .bind(format!("acme/widgets-{github_id}"))
        .bind(user_id)
        .bind(auto_review)
        .execute(db.pool())
        .await
        .unwrap()
        .last_insert_rowid();

        (user_id, repo_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_apply_and_repository_lookup_works() {
        let db = Database::in_memory().await.unwrap();
        let (_user_id, repo_id) = test_support::seed_repository(&db, 42, true).await;

        let found = db.find_repository_by_github_id(42).await.unwrap().unwrap();
        assert_eq!(found.id, repo_id);
        assert!(found.auto_review_enabled);

        assert!(db.find_repository_by_github_id(999).await.unwrap().is_none());
    }
}
