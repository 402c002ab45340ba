use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use health::{ComponentStatus, HealthRegistry};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Config;
use crate::pipeline::EventPipeline;
use crate::processor::MessageProcessor;
use crate::router::{self, FatalSignal};
use crate::sinks::kafka::KafkaPublisher;
use crate::sinks::print::PrintPublisher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeOutcome {
    /// Stopped by the shutdown future.
    Shutdown,
    /// Stopped after a request hit an unrecoverable internal error.
    Fatal,
}

pub async fn serve<F>(
    config: Config,
    listener: TcpListener,
    shutdown: F,
) -> anyhow::Result<ServeOutcome>
where
    F: Future<Output = ()> + Send + 'static,
{
    let rules = config.routing.rules()?;
    let validator = config.validator()?;
    let processor = MessageProcessor::new(EventPipeline::new(rules, validator));

    let liveness = HealthRegistry::new("liveness");
    let fatal = FatalSignal::default();

    let (app, kafka) = if config.print_sink {
        // Print sink is only used for local debug, don't allow a container with it to run on prod
        liveness
            .register("print_sink", Duration::from_secs(30))
            .await
            .report_status(ComponentStatus::Unhealthy)
            .await;

        let app = router::router(
            processor,
            PrintPublisher {},
            liveness,
            fatal.clone(),
            config.export_prometheus,
        );
        (app, None)
    } else {
        let sink_liveness = liveness
            .register("rdkafka", Duration::from_secs(30))
            .await;
        let publisher = KafkaPublisher::new(&config.kafka, sink_liveness)
            .await
            .context("failed to start Kafka publisher")?;
        let app = router::router(
            processor,
            publisher.clone(),
            liveness,
            fatal.clone(),
            config.export_prometheus,
        );
        (app, Some(publisher))
    };

    info!("listening on {:?}", listener.local_addr()?);
    let outcome = run(listener, app, fatal, shutdown).await?;

    if let Some(publisher) = kafka {
        if let Err(err) = publisher.flush() {
            error!("failed to flush Kafka producer on shutdown: {}", err);
        }
    }

    Ok(outcome)
}

/// Serves `app` until `shutdown` resolves or `fatal` is raised, letting
/// in-flight requests finish.
pub async fn run<F>(
    listener: TcpListener,
    app: Router,
    fatal: FatalSignal,
    shutdown: F,
) -> std::io::Result<ServeOutcome>
where
    F: Future<Output = ()> + Send + 'static,
{
    let stop = {
        let fatal = fatal.clone();
        async move {
            tokio::select! {
                _ = shutdown => {},
                _ = fatal.raised() => {},
            }
        }
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(stop)
        .await?;

    if fatal.is_raised() {
        Ok(ServeOutcome::Fatal)
    } else {
        Ok(ServeOutcome::Shutdown)
    }
}
