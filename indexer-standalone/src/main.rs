mod config;

#[tokio::main]
async fn main() {
    use indexer_common::telemetry;
    use log::error;
    use std::panic;

    telemetry::init_logging();
    panic::set_hook(Box::new(|panic| error!(panic:%; "process panicked")));

    if let Err(error) = run().await {
        let backtrace = error.backtrace();
        let error = format!("{error:#}");
        error!(error, backtrace:%; "process exited with ERROR");
        std::process::exit(1);
    }
}

/// Startup/shutdown wiring (SPEC_FULL.md §10.7): load config, init tracing/metrics, create the
/// Postgres pool, run migrations, construct each component's concrete implementation, spawn the
/// hub's event loop and its WebSocket listener, then hand off to the orchestrator until SIGTERM.
async fn run() -> anyhow::Result<()> {
    use anyhow::Context;
    use axum::{Router, routing::get};
    use crate::config::Config;
    use indexer_common::{
        config::ConfigExt, infra::migrations, infra::pool::postgres::PostgresPool, telemetry,
    };
    use log::info;
    use rpc_client::infra::http::HttpRpcClient;
    use store::PostgresStorage;
    use tokio::{
        net::TcpListener,
        signal::unix::{SignalKind, signal},
    };

    let sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler can be registered");

    let config = Config::load().context("load configuration")?;
    let Config {
        rpc_client: rpc_client_config,
        event_subscriber: event_subscriber_config,
        postgres: postgres_config,
        broadcast_hub: broadcast_hub_config,
        hub_server,
        indexer: indexer_config,
        telemetry:
            telemetry::Config {
                tracing_config,
                metrics_config,
            },
    } = config;

    telemetry::init_tracing(tracing_config);
    telemetry::init_metrics(metrics_config);

    info!("starting indexer-standalone");

    let pool = PostgresPool::new(postgres_config)
        .await
        .context("create Postgres pool")?;
    migrations::postgres::run(&pool)
        .await
        .context("run database migrations")?;

    let rpc = HttpRpcClient::new(rpc_client_config).context("create RPC client")?;
    let storage = PostgresStorage::new(pool);

    let (hub_handle, hub_task) = broadcast_hub::spawn(broadcast_hub_config);

    let router = Router::new()
        .route("/ws", get(broadcast_hub::upgrade))
        .with_state(hub_handle.clone());
    let listener = TcpListener::bind(hub_server.addr)
        .await
        .context("bind hub listen address")?;
    info!(addr:? = hub_server.addr; "broadcast hub listening");
    let server_task = tokio::spawn(async move {
        axum::serve(listener, router).await
    });

    let subscriber = event_subscriber::WsSubscriber::new(event_subscriber_config)
        .await
        .context("connect event subscriber")?;

    let result = indexer::run(indexer_config, rpc, subscriber, storage, hub_handle.clone(), sigterm)
        .await
        .context("run indexer");

    info!("shutting down");
    hub_handle.stop().await;
    server_task.abort();
    let _ = hub_task.await;

    result
}
