use actix_web::{web, App, HttpServer};
use discovery_service::bus::{lifecycle_topics, EventBus, KafkaEventBus, MemoryEventBus};
use discovery_service::config::{Config, IndexBackend};
use discovery_service::geo::{GeoIndex, GridGeoIndex, PostStore};
use discovery_service::handlers::{self, AppState};
use discovery_service::ledger::ViewLedger;
use discovery_service::propagation::{
    AccountService, LifecycleConsumer, PgEffectStore, PostCommands,
};
use discovery_service::repository::{PgAccountRepository, PgPostRepository, PgViewLedger};
use discovery_service::services::ProximityResolver;
use discovery_service::workers::{outbox_worker, processed_cleanup};
use idempotent_consumer::{IdempotencyGuard, SeenSet};
use sqlx::postgres::PgPoolOptions;
use std::io;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transactional_outbox::SqlxOutboxRepository;

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,actix_web=info,sqlx=warn,rdkafka=warn".into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Discovery Service
///
/// Serves proximity queries over geotagged posts and keeps them consistent
/// with account and post lifecycle events from other services.
#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.app.log_json);

    tracing::info!(
        env = %config.app.env,
        index = ?config.proximity.index_backend,
        "Starting {}",
        config.app.service_name
    );

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await?;

    sqlx::migrate!("./migrations").run(&db_pool).await?;
    tracing::info!("Database migrations applied");

    let topic_prefix = config
        .kafka
        .as_ref()
        .map(|k| k.topic_prefix.clone())
        .unwrap_or_else(discovery_service::config::topic_prefix_from_env);

    let bus: Arc<dyn EventBus> = match &config.kafka {
        Some(kafka) => {
            tracing::info!(brokers = %kafka.brokers, "Using Kafka event bus");
            Arc::new(KafkaEventBus::new(kafka.clone())?)
        }
        None => {
            tracing::warn!("KAFKA_BROKERS not set; using in-process event bus");
            Arc::new(MemoryEventBus::new())
        }
    };

    let post_repo = Arc::new(PgPostRepository::new(db_pool.clone()));
    let views: Arc<dyn ViewLedger> = Arc::new(PgViewLedger::new(db_pool.clone()));

    let index: Arc<dyn GeoIndex>;
    let posts: Arc<dyn PostStore>;
    let local_index: Option<Arc<dyn GeoIndex>>;
    match config.proximity.index_backend {
        IndexBackend::Grid => {
            let grid = Arc::new(GridGeoIndex::new(config.proximity.cell_size_deg));
            let warmed = grid.warm(post_repo.load_live().await?);
            tracing::info!(posts = warmed, "Grid index warmed");
            index = grid.clone();
            posts = grid.clone();
            local_index = Some(grid as Arc<dyn GeoIndex>);
        }
        IndexBackend::Postgres => {
            index = post_repo.clone();
            posts = post_repo.clone();
            local_index = None;
        }
    }

    let resolver = Arc::new(ProximityResolver::new(
        index,
        posts,
        views,
        config.proximity.query_timeout,
    ));
    let post_commands = Arc::new(PostCommands::new(
        post_repo.clone(),
        local_index.clone(),
        config.app.service_name.clone(),
    ));
    let accounts = Arc::new(AccountService::new(
        Arc::new(PgAccountRepository::new(db_pool.clone())),
        config.app.service_name.clone(),
    ));

    let guard = IdempotencyGuard::new(db_pool.clone(), config.consumer.processed_retention);
    let consumer = Arc::new(LifecycleConsumer::new(
        Arc::new(PgEffectStore::new(guard.clone())),
        local_index,
        SeenSet::new(
            config.consumer.seen_set_ttl,
            config.consumer.seen_set_capacity,
        ),
        config.consumer.handler_timeout,
    ));
    bus.subscribe(&lifecycle_topics(&topic_prefix), consumer)
        .await?;

    let outbox_repo = Arc::new(SqlxOutboxRepository::new(db_pool.clone()));

    let state = web::Data::new(AppState {
        resolver,
        posts: post_commands,
        accounts,
        outbox: outbox_repo.clone(),
        outbox_max_retries: config.outbox.max_retries,
        service_name: config.app.service_name.clone(),
        default_radius_m: config.proximity.default_radius_m,
    });

    let bind_addr = format!("{}:{}", config.app.host, config.app.http_port);
    tracing::info!("HTTP server listening on {}", bind_addr);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(TracingLogger::default())
            .configure(handlers::configure)
    })
    .bind(&bind_addr)?
    .run();
    let server_handle = server.handle();

    let mut tasks: JoinSet<io::Result<()>> = JoinSet::new();

    tasks.spawn(async move { server.await });

    let outbox_config = config.outbox.clone();
    let service_name = config.app.service_name.clone();
    let worker_bus = bus.clone();
    tasks.spawn(async move {
        outbox_worker::run(outbox_repo, worker_bus, outbox_config, topic_prefix, service_name)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    });

    let cleanup_interval = config.consumer.cleanup_interval;
    tasks.spawn(async move {
        processed_cleanup::run(guard, cleanup_interval)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    });

    let mut first_error: Option<io::Error> = None;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = tasks.join_next() => {
                match result {
                    Some(Ok(Ok(_))) => {
                        tracing::info!("Background task completed");
                    }
                    Some(Ok(Err(e))) => {
                        tracing::error!("Task returned error: {}", e);
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                        server_handle.stop(true).await;
                        tasks.shutdown().await;
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::error!("Task join error: {}", e);
                        if first_error.is_none() {
                            first_error = Some(io::Error::new(io::ErrorKind::Other, e.to_string()));
                        }
                        server_handle.stop(true).await;
                        tasks.shutdown().await;
                        break;
                    }
                    None => break,
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received");
                server_handle.stop(true).await;
                tasks.shutdown().await;
                break;
            }
        }
    }

    tracing::info!("discovery-service shutting down");

    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
