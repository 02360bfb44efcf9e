use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

use crate::error::EngineResult;

pub async fn connect(database_url: &str) -> EngineResult<Arc<PgPool>> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(Arc::new(pool))
}

pub async fn run_migrations(pool: &PgPool) -> EngineResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| crate::error::EngineError::Transient(e.to_string()))?;
    Ok(())
}
