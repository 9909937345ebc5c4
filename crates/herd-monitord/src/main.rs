mod config;
mod metrics;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, warn};

use herd_cluster::{ClusterError, EventNotifier, GrpcLifecycle, GrpcTrainer, KubePodLister, PodLister};
use herd_monitor::{Collaborators, JobMonitor, MonitorSettings, MonitorTimings};
use herd_observe::{job_span, logger_init};
use herd_prometheus::MonitorMetrics;

use crate::config::Config;

/// Deadline of a single trainer, lifecycle manager or event endpoint request.
const RPC_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env();
    let logger = cfg.as_ref().map(|c| c.logger.clone()).unwrap_or_default();
    logger_init(&logger)?;

    let cfg = cfg.inspect_err(|e| error!(error = %e, "invalid configuration"))?;
    info!(
        monitor_id = %herd_core::monitor_id(),
        platform = herd_core::platform(),
        arch = herd_core::arch(),
        "herd-monitord starting"
    );

    let span = job_span(&cfg.job.training_id, &cfg.job.job_name);
    run(cfg).instrument(span).await
}

async fn run(cfg: Config) -> anyhow::Result<()> {
    let started = Instant::now();
    let metrics = MonitorMetrics::new()?;
    let stop = CancellationToken::new();

    if let Some(addr) = cfg.metrics_addr {
        let (exported, stop) = (metrics.clone(), stop.clone());
        tokio::spawn(
            async move {
                if let Err(e) = metrics::serve(addr, exported, stop).await {
                    error!(error = %e, "metrics endpoint stopped");
                }
            }
            .in_current_span(),
        );
    }

    let collab = Collaborators {
        sink: Arc::new(GrpcTrainer::connect_lazy(&cfg.trainer_address, RPC_TIMEOUT)?),
        lifecycle: Arc::new(GrpcLifecycle::connect_lazy(&cfg.lcm_address, RPC_TIMEOUT)?),
        notifier: Some(EventNotifier::new(RPC_TIMEOUT)?),
        metrics: metrics.clone(),
    };
    let namespace = cfg.namespace.clone();
    let connect_orchestrator = || {
        let namespace = namespace.clone();
        async move {
            let lister = KubePodLister::connect(&namespace).await?;
            Ok::<_, ClusterError>(Arc::new(lister) as Arc<dyn PodLister>)
        }
    };
    let settings = MonitorSettings {
        timings: MonitorTimings::default(),
        trigger: cfg.trigger,
    };
    info!(
        trigger = %settings.trigger,
        namespace = %cfg.namespace,
        lcm = %cfg.lcm_address,
        trainer = %cfg.trainer_address,
        "connecting job monitor"
    );

    let monitor = match JobMonitor::connect(cfg.job, &cfg.store, connect_orchestrator, collab, settings).await {
        Ok(monitor) => monitor,
        Err(e) => {
            error!(error = %e, "job monitor could not start");
            stop.cancel();
            return Err(e.into());
        }
    };

    let mut managed = tokio::spawn({
        let monitor = monitor.clone();
        async move { monitor.manage().await }.in_current_span()
    });

    tokio::select! {
        joined = &mut managed => {
            if let Err(e) = joined {
                error!(error = %e, "job monitor task failed");
            }
        }
        _ = shutdown_signal() => {
            info!("signal received, shutting down");
            monitor.shutdown();
            if let Err(e) = managed.await {
                error!(error = %e, "job monitor task failed");
            }
        }
    }

    monitor.coordinator().close().await;
    stop.cancel();
    info!(uptime_secs = started.elapsed().as_secs(), torn_down = monitor.is_torn_down(), "herd-monitord stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
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
