use sea_orm::{ConnectOptions, Database, DbErr};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing::{error, info};

use stockledger::migrator::Migrator;

#[tokio::main]
async fn main() -> Result<(), DbErr> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let rollback = std::env::args().nth(1).as_deref() == Some("down");

    // Configure database connection
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite://stockledger.db?mode=rwc".to_string());

    info!("Connecting to database: {}", database_url);

    let mut options = ConnectOptions::new(database_url);
    options
        .max_connections(1)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        .sqlx_logging(true);

    let db = Database::connect(options).await?;

    let result = if rollback {
        info!("Rolling back the last migration");
        Migrator::down(&db, Some(1)).await
    } else {
        info!("Applying pending migrations");
        Migrator::up(&db, None).await
    };

    match result {
        Ok(()) => {
            let applied = Migrator::get_applied_migrations(&db).await?;
            info!(applied = applied.len(), "Migration completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Migration failed: {}", e);
            Err(e)
        }
    }
}
