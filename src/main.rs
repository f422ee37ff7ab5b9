use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    Router,
};
use mongodb::{Client, Database};
use std::{sync::Arc, time::Duration};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

mod auth;
mod cleanup;
mod config;
mod error;
mod handlers;
mod ids;
mod media;
mod models;
mod pagination;
mod pipeline;
mod probe;
mod response;
mod store;
mod system_info;
mod toggle;
mod uploads;

#[cfg(test)]
mod test_support;

use config::{Config, StorageBackend};
use media::CloudinaryHost;
use models::{AppState, Comment, Entity, Like, Playlist, Subscription, Tweet, User, Video};
use store::{InMemoryStore, MongoRepository, Repository};

async fn mongo_repository<T: Entity>(db: &Database) -> anyhow::Result<Arc<dyn Repository<T>>> {
    let repository = MongoRepository::<T>::new(db);
    repository.ensure_indexes(db).await?;
    Ok(Arc::new(repository))
}

async fn build_state(config: Config) -> anyhow::Result<AppState> {
    let media = Arc::new(CloudinaryHost::new(config.media.clone())?);

    let state = match config.storage.backend {
        StorageBackend::Mongo => {
            let client = Client::with_uri_str(&config.storage.mongodb_uri).await?;
            let db = client.database(&config.storage.database);
            info!("📦 Connected to MongoDB database `{}`", config.storage.database);

            AppState {
                users: mongo_repository::<User>(&db).await?,
                videos: mongo_repository::<Video>(&db).await?,
                comments: mongo_repository::<Comment>(&db).await?,
                likes: mongo_repository::<Like>(&db).await?,
                tweets: mongo_repository::<Tweet>(&db).await?,
                playlists: mongo_repository::<Playlist>(&db).await?,
                subscriptions: mongo_repository::<Subscription>(&db).await?,
                media,
                config,
            }
        }
        StorageBackend::Memory => {
            let store = InMemoryStore::new();
            info!("📦 Using the in-memory store; data is lost on restart");

            AppState {
                users: Arc::new(store.repository::<User>()),
                videos: Arc::new(store.repository::<Video>()),
                comments: Arc::new(store.repository::<Comment>()),
                likes: Arc::new(store.repository::<Like>()),
                tweets: Arc::new(store.repository::<Tweet>()),
                playlists: Arc::new(store.repository::<Playlist>()),
                subscriptions: Arc::new(store.repository::<Subscription>()),
                media,
                config,
            }
        }
    };

    Ok(state)
}

fn cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let origin = match &config.cors_origin {
        Some(origin) => origin.parse::<HeaderValue>()?,
        None => return Ok(CorsLayer::permissive()),
    };

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter("vidtube_backend=debug,tower_http=debug")
        .init();

    // Load configuration
    let config = Config::from_env();

    // Ensure directories exist
    tokio::fs::create_dir_all(&config.upload_dir).await?;

    // Print system info at startup
    system_info::print_startup_info(&config);

    // Multipart bodies are buffered whole: room for a video and a thumbnail.
    let body_limit = usize::try_from(config.max_file_size.saturating_mul(2)).unwrap_or(usize::MAX);
    let timeout = Duration::from_secs(config.request_timeout_seconds);
    let cors = cors_layer(&config)?;
    let port = config.port;

    let app_state = Arc::new(build_state(config).await?);

    // Start background cleanup of abandoned uploads
    cleanup::start_cleanup_task(Arc::new(app_state.config.clone()));

    // Build router
    let app = Router::new()
        .nest("/api/v1", handlers::routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(TimeoutLayer::new(timeout)),
        )
        .with_state(app_state.clone());

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    info!("🚀 Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!("{}", "=".repeat(60));
    println!("✅ Server running on http://0.0.0.0:{}", port);
    println!("✅ API available at http://localhost:{}/api/v1", port);
    println!("{}", "=".repeat(60));
    println!("⚙️  Runtime Settings:");
    println!("   Max File Size: {} MB", app_state.config.max_file_size / 1024 / 1024);
    println!("   Request Timeout: {}s", app_state.config.request_timeout_seconds);
    println!(
        "   CORS Origin: {}",
        app_state.config.cors_origin.as_deref().unwrap_or("*")
    );
    println!(
        "   Page Size: {} (max {})",
        app_state.config.pagination.default_limit, app_state.config.pagination.max_limit
    );
    println!("{}", "=".repeat(60));

    info!("✅ Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
