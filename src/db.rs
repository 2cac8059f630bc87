use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::config::Config;

pub async fn connect_pg(cfg: &Config) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_max_connections)
        .connect(&cfg.database_url)
        .await?;

    if cfg.run_migrations {
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("migrations applied");
    }

    Ok(pool)
}

/// Serializes schedule and patient-number writers for one clinic until the
/// surrounding transaction ends. Must be called on a transaction connection.
pub async fn lock_clinic<'e, E>(conn: E, clinic_id: Uuid) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
        .bind(clinic_id)
        .execute(conn)
        .await?;
    Ok(())
}
