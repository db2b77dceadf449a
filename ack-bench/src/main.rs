//! Drive an acknowledgement processor under synthetic load and report commit throughput.
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use envconfig::Envconfig;
use futures::future::join_all;
use ::metrics::counter;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};
use uuid::Uuid;

use acknowledgement::{AcknowledgementOrdering, AcknowledgementProcessor, MessageHandle};

use crate::config::Config;
use crate::executor::SimulatedExecutor;
use crate::metrics::{serve, setup_metrics_router};

mod config;
mod executor;
mod metrics;

/// Acknowledge `messages` handles, returning how many the processor reported as failed.
async fn produce(
    producer: usize,
    messages: usize,
    group: Option<String>,
    processor: Arc<dyn AcknowledgementProcessor>,
) -> usize {
    let mut pending = Vec::with_capacity(messages);

    for index in 0..messages {
        let mut handle = MessageHandle::new(Uuid::now_v7(), format!("{producer}-{index}"));
        if let Some(group) = &group {
            handle = handle.with_group(group.clone());
        }

        pending.push(processor.on_acknowledge(handle));
        counter!("ack_bench_messages_submitted_total").increment(1);
        tokio::task::yield_now().await;
    }

    join_all(pending)
        .await
        .into_iter()
        .filter(Result::is_err)
        .count()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_filter(EnvFilter::from_default_env()),
        )
        .init();

    let config = Config::init_from_env().context("invalid configuration")?;

    let router = setup_metrics_router().context("failed to install metrics recorder")?;
    let bind = config.bind();
    tokio::task::spawn(async move {
        if let Err(e) = serve(router, &bind).await {
            error!(error = %e, "failed to serve metrics");
        }
    });

    let executor = Arc::new(
        SimulatedExecutor::new(config.commit_latency_ms.0, config.commit_failure_rate)
            .context("invalid COMMIT_FAILURE_RATE")?,
    );
    let processor: Arc<dyn AcknowledgementProcessor> = Arc::from(
        config
            .acknowledgement
            .build_processor("ack-bench", executor.clone())?,
    );
    processor.start()?;

    info!(
        mode = %config.acknowledgement.mode,
        ordering = %config.acknowledgement.ordering,
        producers = config.producers,
        messages_per_producer = config.messages_per_producer,
        "starting acknowledgement benchmark"
    );

    let grouped = config.acknowledgement.ordering == AcknowledgementOrdering::OrderedByGroup;
    let start = Instant::now();
    let producers: Vec<_> = (0..config.producers)
        .map(|producer| {
            let group = grouped.then(|| format!("producer-{producer}"));
            tokio::spawn(produce(
                producer,
                config.messages_per_producer,
                group,
                processor.clone(),
            ))
        })
        .collect();

    let mut reported_failures = 0;
    for producer in join_all(producers).await {
        reported_failures += producer.context("producer panicked")?;
    }

    processor.stop().await;

    let elapsed = start.elapsed();
    let committed = executor.committed();
    info!(
        committed,
        rejected = executor.rejected(),
        reported_failures,
        elapsed_ms = elapsed.as_millis() as u64,
        per_second = committed as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        "acknowledgement benchmark completed"
    );

    Ok(())
}
