// src/main.rs

use std::sync::Arc;
use std::time::Duration;

use dotenvy::dotenv;
use exam_session::{
    clock::SystemClock,
    config::Config,
    routes,
    session::handle::SessionRegistry,
    state::AppState,
    store::{QuizCatalog, RemoteStore, memory::MemoryKv, memory::MemoryStore, postgres::PgStore},
};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenv().ok();

    let config = Config::from_env();

    let file_appender = tracing_appender::rolling::daily("logs", "exam-session.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::new(&config.rust_log);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout).with_target(false);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    let (remote, catalog): (Arc<dyn RemoteStore>, Arc<dyn QuizCatalog>) =
        match &config.database_url {
            Some(database_url) => {
                let pool = connect_with_retry(database_url).await;

                tracing::info!("Running migrations...");
                sqlx::migrate!("./migrations")
                    .run(&pool)
                    .await
                    .expect("Failed to run database migrations");
                tracing::info!("Migrations applied successfully.");

                let store = Arc::new(PgStore::new(pool));
                let remote: Arc<dyn RemoteStore> = store.clone();
                let catalog: Arc<dyn QuizCatalog> = store;
                (remote, catalog)
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using in-memory stores; nothing survives a restart");
                let store = Arc::new(MemoryStore::new());
                let remote: Arc<dyn RemoteStore> = store.clone();
                let catalog: Arc<dyn QuizCatalog> = store;
                (remote, catalog)
            }
        };

    let state = AppState {
        config: config.clone(),
        remote,
        catalog,
        local: Arc::new(MemoryKv::default()),
        clock: Arc::new(SystemClock),
        sessions: SessionRegistry::default(),
    };

    let app = routes::create_router(state);

    tracing::info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind listening address");

    axum::serve(listener, app).await.expect("Server error");
}

async fn connect_with_retry(database_url: &str) -> PgPool {
    let mut retry_count = 0;
    loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_url)
            .await
        {
            Ok(pool) => {
                tracing::info!("Database connected...");
                return pool;
            }
            Err(e) => {
                retry_count += 1;
                if retry_count > 5 {
                    panic!("Failed to connect to database after 5 retries: {}", e);
                }
                tracing::warn!("Database not ready, retrying in 2s... (Attempt {})", retry_count);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}
