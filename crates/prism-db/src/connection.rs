//! Database connection management

use crate::error::Result;
use sea_orm::{ConnectOptions, Database, DatabaseConnection as SeaOrmConnection};
use std::time::Duration;

/// Type alias for the database connection
pub type DatabaseConnection = SeaOrmConnection;

/// Pool sizing: 20 primary connections plus 10 overflow, recycled hourly.
const MAX_CONNECTIONS: u32 = 30;
const MIN_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);
const MAX_LIFETIME: Duration = Duration::from_secs(3600);

/// Establish a database connection pool for the given URL
pub async fn establish_connection(database_url: &str) -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new(database_url.to_string());
    options
        .max_connections(MAX_CONNECTIONS)
        .min_connections(MIN_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .idle_timeout(IDLE_TIMEOUT)
        .max_lifetime(MAX_LIFETIME)
        .sqlx_logging(false);

    tracing::info!("establishing database connection");
    let connection = Database::connect(options).await?;
    tracing::info!("database connection established");
    Ok(connection)
}

/// Test database connectivity
pub async fn test_connection(connection: &DatabaseConnection) -> Result<()> {
    connection.ping().await?;
    Ok(())
}
