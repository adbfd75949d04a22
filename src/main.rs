use actix_web::{web, App, HttpServer};
use anyhow::Context;
use chrono::Local;
use log::info;
use sqlx::postgres::PgPoolOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use epay_bridge::config::{Config, StoreBackend};
use epay_bridge::middleware::RequestLogging;
use epay_bridge::routes;
use epay_bridge::state::AppState;
use epay_bridge::storage::{MemoryStore, PgStore, Store};

/// 按配置创建存储后端
async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn Store>> {
    match config.database.backend {
        StoreBackend::Memory => {
            info!("Using in-memory store, data will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let db = &config.database;
            let pool = PgPoolOptions::new()
                .max_connections(db.max_connections)
                .min_connections(db.min_connections)
                .acquire_timeout(Duration::from_secs(db.connect_timeout))
                .idle_timeout(Duration::from_secs(db.idle_timeout))
                .connect(&db.url)
                .await
                .context("Failed to connect to database")?;

            if db.run_migrations {
                sqlx::migrate!("./migrations")
                    .run(&pool)
                    .await
                    .context("Failed to run database migrations")?;
                info!("Database migrations applied");
            }
            Ok(Arc::new(PgStore::new(pool)))
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    let mut log_builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    log_builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S %:z"),
                record.level(),
                record.args()
            )
        })
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let store = build_store(&config).await?;
    let bind_address = config.bind_address();
    let workers = config.server.workers;
    let request_timeout = Duration::from_secs(config.server.timeout);
    let route_config = config.clone();
    let app_state = web::Data::new(AppState::with_http_clients(config, store)?);

    info!("Starting epay-bridge on {}", bind_address);

    let mut server = HttpServer::new(move || {
        let route_config = route_config.clone();
        App::new()
            .app_data(app_state.clone())
            .wrap(RequestLogging)
            .configure(move |cfg| routes::configure(cfg, &route_config))
    })
    .client_request_timeout(request_timeout);
    if let Some(workers) = workers {
        server = server.workers(workers);
    }

    server.bind(&bind_address)?.run().await?;
    info!("Server stopped");
    Ok(())
}
