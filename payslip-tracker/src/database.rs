use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;

use crate::migration::Migrator;

/// Whether `url` names an in-memory SQLite database.
#[must_use]
pub fn is_in_memory(url: &str) -> bool {
    url.starts_with("sqlite::memory:") || url.contains("mode=memory")
}

/// Opens the pool and applies pending migrations. An in-memory SQLite
/// database exists only inside its connection, so that pool holds one.
///
/// # Errors
/// Connection or migration failures.
pub async fn connect(url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(url);
    if is_in_memory(url) {
        options.max_connections(1).min_connections(1);
    }
    let db = Database::connect(options).await?;
    Migrator::up(&db, None).await?;
    tracing::info!(backend = ?db.get_database_backend(), "database ready");
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_urls() {
        assert!(is_in_memory("sqlite::memory:"));
        assert!(is_in_memory("sqlite://file:tracker?mode=memory&cache=shared"));
        assert!(!is_in_memory("sqlite://tracker.db?mode=rwc"));
        assert!(!is_in_memory("postgres://localhost/tracker"));
    }

    #[tokio::test]
    async fn test_connect_runs_migrations() {
        let db = connect("sqlite::memory:").await.unwrap();
        let applied = Migrator::get_applied_migrations(&db).await.unwrap();
        assert_eq!(applied.len(), 1);
    }
}
