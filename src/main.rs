use anyhow::Context;
use care_messaging::{
    api::{build_router, AppState},
    circuit_breaker::CircuitBreaker,
    config::{BrokerBackend, Config},
    messaging::{
        AmqpConnector, BrokerConnector, ConnectionRole, ConnectionSupervisor, ConsumerLifecycle,
        CreationConsumer, EventPublisher, InMemoryBroker, MessagingError, QueueSpec,
        PUBLISH_BREAKER_NAME,
    },
    metrics::{MetricsSink, NoopMetrics, PrometheusMetrics},
    services::InMemoryBabyRegistry,
};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "care-messaging", version, about = "Care service messaging core", long_about = None)]
struct Cli {
    /// Configuration file layered over the built-in defaults
    #[arg(short, long, env = "CARE_CONFIG_PATH")]
    config: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "care_messaging={},tower_http=info",
            config.observability.log_level
        )
        .into()
    });
    if cli.json_logs || config.observability.json_logs {
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

    tracing::info!("Starting care-messaging v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Broker backend: {:?}", config.broker.backend);

    // Initialize Prometheus metrics
    let prometheus = if config.observability.metrics_enabled {
        Some(Arc::new(
            PrometheusMetrics::new().context("failed to register metrics")?,
        ))
    } else {
        tracing::info!("Prometheus metrics disabled in configuration");
        None
    };
    let sink: Arc<dyn MetricsSink> = match &prometheus {
        Some(metrics) => metrics.clone(),
        None => Arc::new(NoopMetrics),
    };

    let (publisher_connector, consumer_connector) = connectors(config.broker.backend);
    let policy = config.retry_policy();

    // Publisher side
    let publisher_supervisor = ConnectionSupervisor::start(
        ConnectionRole::Publisher,
        publisher_connector,
        config.broker.url.clone(),
        QueueSpec::durable(&config.broker.alerts_queue),
        policy,
        sink.clone(),
    )
    .await
    .context("publisher could not reach the broker")?;

    let breaker = CircuitBreaker::new(
        PUBLISH_BREAKER_NAME,
        config.circuit_breaker.to_breaker_config()?,
    )
    .with_metrics(sink.clone());

    let publisher = Arc::new(
        EventPublisher::new(publisher_supervisor, breaker, policy)
            .with_thresholds(config.alert_thresholds())
            .with_metrics(sink.clone()),
    );
    tracing::info!(queue = %config.broker.alerts_queue, "Event publisher ready");

    // Consumer side
    let consumer_supervisor = ConnectionSupervisor::start(
        ConnectionRole::Consumer,
        consumer_connector,
        config.broker.url.clone(),
        QueueSpec::durable(&config.broker.creation_queue),
        policy,
        sink.clone(),
    )
    .await
    .context("consumer could not reach the broker")?;

    let registry = Arc::new(InMemoryBabyRegistry::new());
    let consumer = CreationConsumer::new(registry).with_metrics(sink.clone());
    let lifecycle = ConsumerLifecycle::new(consumer_supervisor, consumer);

    let run_token = CancellationToken::new();
    match lifecycle.start(run_token.clone()).await {
        Ok(_) => {
            tracing::info!(queue = %config.broker.creation_queue, "Creation consumer started")
        }
        // Bound to the run token; resumes after the reconnect already requested
        Err(MessagingError::ConnectionClosed) => tracing::warn!(
            queue = %config.broker.creation_queue,
            "Broker connection lost before the consumer started, waiting for reconnect"
        ),
        Err(e) => return Err(e).context("failed to start creation consumer"),
    }

    // HTTP server. Measurement handlers raise alerts through `AppState::alerts`.
    let mut state = AppState::new(publisher.clone()).with_consumer(lifecycle.clone());
    if let Some(metrics) = &prometheus {
        state = state.with_metrics(metrics.clone());
    }
    let app = build_router(state);

    let http_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("failed to bind {}", http_addr))?;
    tracing::info!("HTTP server listening on http://{}", http_addr);

    let http_token = CancellationToken::new();
    let server_token = http_token.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_token.cancelled().await })
            .await
    });

    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received");
        }
        result = &mut server => {
            tracing::error!("HTTP server stopped unexpectedly: {:?}", result);
        }
    }

    // Consumption stops before anything it depends on is torn down
    run_token.cancel();
    lifecycle.stop().await;

    http_token.cancel();
    if !server.is_finished() {
        let timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
        match tokio::time::timeout(timeout, &mut server).await {
            Ok(Ok(Ok(()))) => tracing::info!("HTTP server drained"),
            Ok(Ok(Err(e))) => tracing::error!("HTTP server error: {}", e),
            Ok(Err(e)) => tracing::error!("HTTP server task failed: {}", e),
            Err(_) => {
                tracing::warn!(timeout_secs = timeout.as_secs(), "HTTP server did not drain in time");
                server.abort();
            }
        }
    }

    publisher.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// One connector per role. The in-memory backend shares a single broker.
fn connectors(backend: BrokerBackend) -> (Arc<dyn BrokerConnector>, Arc<dyn BrokerConnector>) {
    match backend {
        BrokerBackend::Amqp => (
            Arc::new(AmqpConnector::new("care-messaging-publisher")),
            Arc::new(AmqpConnector::new("care-messaging-consumer")),
        ),
        BrokerBackend::InMemory => {
            let broker = InMemoryBroker::new();
            (Arc::new(broker.clone()), Arc::new(broker))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
