use std::sync::Arc;

use collabcanvas::config::Config;
use collabcanvas::db::{self, BoardRecordStore, MemoryBoardStore, PgBoardStore};
use collabcanvas::{routes, state};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env();

    let records: Arc<dyn BoardRecordStore> = match &config.database_url {
        Some(url) => {
            let pool = db::init_pool(url, config.db_max_connections)
                .await
                .expect("database init failed");
            Arc::new(PgBoardStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; boards are kept in memory and lost on restart");
            Arc::new(MemoryBoardStore::new())
        }
    };

    let port = config.port;
    let state = state::AppState::new(records, config);

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "collabcanvas listening");
    axum::serve(listener, app).await.expect("server failed");
}
