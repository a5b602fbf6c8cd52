//! Entry point: load config, wire collaborators, run the poll loop, the mod watcher and the HTTP server.

use presence_watch::config::Config;
use presence_watch::db::{self, PgSessionStore};
use presence_watch::logging::init_logging;
use presence_watch::repositories::RedisRepository;
use presence_watch::services::RedisNotifier;
use presence_watch::{create_app, AppError, AppState, ModWatcher, Poller, QueryClient};
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().map_err(|e| AppError::Config(e.to_string()))?;
    let _log_guard = init_logging(&config.log_level, config.log_dir.as_deref())?;

    let db_pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&db_pool).await?;
    let repo = Arc::new(RedisRepository::new(&config.redis_url)?);
    let query_client = QueryClient::new(
        config.query_host.clone(),
        config.query_port,
        config.query_timeout,
    );
    tracing::info!(
        host = %config.query_host,
        port = config.query_port,
        "monitoring server"
    );

    let store = Arc::new(PgSessionStore::new(db_pool.clone()));
    let notifier = Arc::new(RedisNotifier::new(repo, config.notify_channel.clone()));
    let (mut poller, dispatcher) =
        Poller::new(query_client.clone(), store, notifier.clone(), config.poll_interval);
    let dispatch_task = tokio::spawn(dispatcher.run());
    poller.bootstrap().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poll_task = tokio::spawn(poller.run(shutdown_rx.clone()));

    let mut mod_watcher = ModWatcher::load(
        config.hoster_branch_path.clone(),
        config.server_mods_path.clone(),
        config.mod_names_file.clone(),
        notifier,
        config.mod_check_interval,
    )
    .await?;
    let mod_task = if mod_watcher.is_watching() {
        Some(tokio::spawn(mod_watcher.run(shutdown_rx)))
    } else {
        mod_watcher.save().await?;
        tracing::info!("no mod folders configured");
        None
    };

    let state = AppState {
        query_client,
        db: db_pool,
    };
    let app = create_app(state);

    tracing::info!(addr = %config.server_addr, "listening");
    let listener = tokio::net::TcpListener::bind(config.server_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    shutdown_tx.send(true).ok();
    poll_task.await?;
    dispatch_task.await?;
    if let Some(task) = mod_task {
        task.await?;
    }
    Ok(())
}
