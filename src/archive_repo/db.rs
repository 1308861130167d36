// SQLite persistence for the archive. One row per tracked metric; the series is a versioned
// wincode BLOB. A save rewrites every row inside one transaction (whole-document replace).

use super::blob;
use crate::models::ArchivePoint;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

pub struct ArchiveDb {
    pool: SqlitePool,
}

impl ArchiveDb {
    pub async fn connect(path: &str) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS archive_series (
                metric_key TEXT PRIMARY KEY,
                point_count INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                data BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, series), fields(repo = "archive", operation = "save_all", series_count = series.len()))]
    pub async fn save_all(
        &self,
        series: &HashMap<String, Vec<ArchivePoint>>,
        updated_at_ms: i64,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM archive_series")
            .execute(&mut *tx)
            .await?;
        for (metric_key, points) in series {
            let data = blob::with_version_prefix(
                blob::BLOB_VERSION,
                wincode::serialize(points).map_err(|e| anyhow::anyhow!("wincode: {}", e))?,
            );
            sqlx::query(
                "INSERT INTO archive_series (metric_key, point_count, updated_at, data) VALUES ($1, $2, $3, $4)",
            )
            .bind(metric_key)
            .bind(points.len() as i64)
            .bind(updated_at_ms)
            .bind(&data)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Every stored series. Rows that fail to decode come back empty rather than failing the load.
    #[instrument(skip(self), fields(repo = "archive", operation = "load_all"))]
    pub async fn load_all(&self) -> anyhow::Result<HashMap<String, Vec<ArchivePoint>>> {
        let rows = sqlx::query("SELECT metric_key, data FROM archive_series")
            .fetch_all(&self.pool)
            .await?;
        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            let metric_key: String = row.try_get("metric_key")?;
            let data: Vec<u8> = row.try_get("data")?;
            let points = decode_series(&data).unwrap_or_else(|e| {
                tracing::warn!(metric_key = %metric_key, error = %e, "archive series corrupt, starting empty");
                Vec::new()
            });
            out.insert(metric_key, points);
        }
        Ok(out)
    }
}

fn decode_series(data: &[u8]) -> anyhow::Result<Vec<ArchivePoint>> {
    let payload = blob::blob_payload(data, blob::BLOB_VERSION)
        .ok_or_else(|| anyhow::anyhow!("unknown blob version"))?;
    wincode::deserialize(payload).map_err(|e| anyhow::anyhow!("wincode deserialize: {}", e))
}
