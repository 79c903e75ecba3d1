pub mod types;

use chrono::Utc;
use sqlx::sqlite::SqlitePool;

use crate::error::Result;
use types::{EffectiveSettings, SettingsPatch};

const SETTINGS_KEY: &str = "review";

/// Resolves the four-tier configuration cascade: built-in defaults, then
/// the user blob, then the repository blob, then the user+repository blob.
/// Each present layer shallow-merges over the previous result.
#[derive(Clone)]
pub struct SettingsResolver {
    pool: SqlitePool,
}

impl SettingsResolver {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Merge the cascade for a user and (optionally) a repository. Absent
    /// layers are skipped; resolution always succeeds with at least the
    /// defaults.
    pub async fn resolve(
        &self,
        user_id: i64,
        repository_id: Option<i64>,
    ) -> Result<EffectiveSettings> {
        let mut effective = EffectiveSettings::default();

        if let Some(patch) = self.load(Some(user_id), None).await? {
            effective = patch.apply(effective);
        }
        if let Some(repo_id) = repository_id {
            if let Some(patch) = self.load(None, Some(repo_id)).await? {
                effective = patch.apply(effective);
            }
            if let Some(patch) = self.load(Some(user_id), Some(repo_id)).await? {
                effective = patch.apply(effective);
            }
        }

        Ok(effective)
    }

    /// Merge a partial update into the user-scoped blob. Fields the update
    /// does not mention keep their stored value; clearing a list requires
    /// sending it explicitly empty.
    pub async fn update(&self, user_id: i64, partial: &SettingsPatch) -> Result<EffectiveSettings> {
        self.upsert(Some(user_id), None, partial).await?;
        self.resolve(user_id, None).await
    }

    /// Merge a partial update into the repository-scoped blob.
    pub async fn update_for_repository(
        &self,
        repository_id: i64,
        partial: &SettingsPatch,
    ) -> Result<()> {
        self.upsert(None, Some(repository_id), partial).await
    }

    /// Merge a partial update into the user+repository-scoped blob.
    pub async fn update_for_user_and_repository(
        &self,
        user_id: i64,
        repository_id: i64,
        partial: &SettingsPatch,
    ) -> Result<()> {
        self.upsert(Some(user_id), Some(repository_id), partial).await
    }

    async fn upsert(
        &self,
        user_id: Option<i64>,
        repository_id: Option<i64>,
        partial: &SettingsPatch,
    ) -> Result<()> {
        let current = self
            .load(user_id, repository_id)
            .await?
            .unwrap_or_default();
        let merged = current.overlay(partial);
        let data = serde_json::to_string(&merged)?;
        let now = Utc::now().to_rfc3339();

        let updated = sqlx::query(
            "UPDATE settings SET data = ?, updated_at = ?
             WHERE user_id IS ? AND repository_id IS ? AND key = ?",
        )
        .bind(&data)
        .bind(&now)
        .bind(user_id)
        .bind(repository_id)
        .bind(SETTINGS_KEY)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            sqlx::query(
                "INSERT INTO settings (user_id, repository_id, key, data, updated_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(user_id)
            .bind(repository_id)
            .bind(SETTINGS_KEY)
            .bind(&data)
            .bind(&now)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    pub async fn load(
        &self,
        user_id: Option<i64>,
        repository_id: Option<i64>,
    ) -> Result<Option<SettingsPatch>> {
        let data: Option<String> = sqlx::query_scalar(
            "SELECT data FROM settings
             WHERE user_id IS ? AND repository_id IS ? AND key = ?",
        )
        .bind(user_id)
        .bind(repository_id)
        .bind(SETTINGS_KEY)
        .fetch_optional(&self.pool)
        .await?;

        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
