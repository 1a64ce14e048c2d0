use crate::entities::{
    access_logs, files, room_presence, room_secrets, room_user_counter, room_user_index, rooms,
};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use std::env;
use std::time::Duration;
use tracing::info;

/// Connect to the metadata store and bring the schema up.
///
/// Pool sizing leans generous: most handlers issue several short queries
/// and the burn/countdown tasks run on the same pool as the request path.
pub async fn setup_database() -> anyhow::Result<DatabaseConnection> {
    let url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let mut options = ConnectOptions::new(&url);
    options
        .max_connections(100)
        .min_connections(5)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let db = Database::connect(options).await?;
    info!(url = %url, "Metadata store connected");

    run_migrations(&db).await?;
    Ok(db)
}

/// Build the schema directly from the entities. Works on SQLite (tests and
/// single-node dev) and PostgreSQL alike.
pub async fn run_migrations(db: &DatabaseConnection) -> anyhow::Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let stmts = vec![
        schema
            .create_table_from_entity(rooms::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(room_secrets::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(files::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(access_logs::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(room_presence::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(room_user_counter::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(room_user_index::Entity)
            .if_not_exists()
            .to_owned(),
    ];

    for stmt in stmts {
        db.execute(builder.build(&stmt)).await?;
    }

    info!("Schema migrations applied");
    Ok(())
}
