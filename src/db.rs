//! Database module
//!
//! Connectivity and schema checks. The schema itself lives in raw SQL
//! files under `migrations/`.

use sqlx::PgPool;

/// Tables the service reads or writes
pub const REQUIRED_TABLES: [&str; 5] = [
    "partners",
    "partner_api_keys",
    "pos_terminals",
    "pos_transactions",
    "export_jobs",
];

/// Simple connectivity check
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Required tables absent from the `public` schema, in declaration order
pub async fn missing_tables(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
    let present: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT table_name::text FROM information_schema.tables
        WHERE table_schema = 'public' AND table_name = ANY($1)
        "#,
    )
    .bind(&REQUIRED_TABLES[..])
    .fetch_all(pool)
    .await?;

    Ok(REQUIRED_TABLES
        .iter()
        .filter(|table| !present.iter().any(|p| p == *table))
        .map(|table| table.to_string())
        .collect())
}

/// True when every required table exists
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    let missing = missing_tables(pool).await?;
    if missing.is_empty() {
        return Ok(true);
    }

    tracing::error!(
        missing = ?missing,
        "Required tables do not exist. Apply migrations/0001_init.sql first."
    );
    Ok(false)
}
