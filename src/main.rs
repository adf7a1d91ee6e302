use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::{Any, CorsLayer}, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use course_engine::{
    config::Config,
    db::{self, PgStore},
    objects::LocalObjectStore,
    payment::{DisabledPaymentGateway, HttpPaymentGateway, PaymentGateway},
    routes::{self, AppState},
    store::{MemoryStore, Store},
    Engine,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let pool = db::connect(url).await?;
            // crate-relative path for sqlx migrations
            sqlx::migrate!("./migrations").run(&pool).await?;
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let payments: Arc<dyn PaymentGateway> = match &config.payment_gateway_url {
        Some(url) => Arc::new(HttpPaymentGateway::new(url.clone(), config.public_base_url.clone())),
        None => {
            tracing::warn!("PAYMENT_GATEWAY_URL not set, paid checkout disabled");
            Arc::new(DisabledPaymentGateway)
        }
    };

    tokio::fs::create_dir_all(&config.data_dir).await?;
    let objects = Arc::new(LocalObjectStore::new(config.data_dir.clone()));

    let state = AppState {
        engine: Engine::new(store, objects, payments),
        data_dir: config.data_dir.clone(),
        max_upload_bytes: config.max_upload_bytes,
    };

    let app = routes::router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)),
    );

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
