use std::{net::SocketAddr, path::PathBuf};

use anyhow::{Context, bail};

use herd_coord::StoreConfig;
use herd_model::JobIdentity;
use herd_monitor::AggregationTrigger;
use herd_observe::LoggerConfig;

/// Everything the daemon reads from its environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub job: JobIdentity,
    pub store: StoreConfig,
    pub namespace: String,
    pub lcm_address: String,
    pub trainer_address: String,
    pub trigger: AggregationTrigger,
    pub logger: LoggerConfig,
    pub metrics_addr: Option<SocketAddr>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any variable source; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| var(key).with_context(|| format!("{key} is not set"));

        let num_learners = required("NUM_LEARNERS")?;
        let job = JobIdentity {
            training_id: required("TRAINING_ID")?,
            user_id: required("USER_ID")?,
            job_name: required("JOB_NAME")?,
            num_learners: num_learners
                .parse()
                .with_context(|| format!("NUM_LEARNERS is not a number: {num_learners}"))?,
            use_native_distribution: flag("USE_NATIVE_DISTRIBUTION", var("USE_NATIVE_DISTRIBUTION"))?,
            uses_parameter_server: flag("USES_PARAMETER_SERVER", var("USES_PARAMETER_SERVER"))?,
        };
        job.validate()?;

        let mut store = StoreConfig::default()
            .with_endpoints(&required("ETCD_ENDPOINTS")?)
            .with_prefix(var("ETCD_PREFIX").unwrap_or_default());
        store.username = var("ETCD_USERNAME");
        store.password = var("ETCD_PASSWORD");
        store.ca_cert = var("ETCD_CERT").map(PathBuf::from);
        store.server_name = var("ETCD_SERVER_NAME");
        store.validate()?;

        let pod_namespace = var("POD_NAMESPACE").unwrap_or_else(|| "default".to_string());
        let lcm_address = var("LCM_ADDRESS")
            .unwrap_or_else(|| format!("http://ffdl-lcm.{pod_namespace}.svc.cluster.local:80"));
        let trainer_address = var("TRAINER_ADDRESS")
            .unwrap_or_else(|| format!("http://ffdl-trainer.{pod_namespace}.svc.cluster.local:80"));

        let trigger = var("AGGREGATION_TRIGGER")
            .unwrap_or_default()
            .parse::<AggregationTrigger>()
            .map_err(anyhow::Error::msg)?;

        let logger = LoggerConfig::parse(
            &var("LOG_FORMAT").unwrap_or_else(|| "text".to_string()),
            &var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        )?;

        let metrics_addr = var("METRICS_ADDR")
            .map(|addr| {
                addr.parse::<SocketAddr>()
                    .with_context(|| format!("METRICS_ADDR is not a socket address: {addr}"))
            })
            .transpose()?;

        Ok(Self {
            job,
            store,
            namespace: var("LEARNER_NAMESPACE").unwrap_or_else(|| "default".to_string()),
            lcm_address,
            trainer_address,
            trigger,
            logger,
            metrics_addr,
        })
    }
}

fn flag(key: &str, value: Option<String>) -> anyhow::Result<bool> {
    let Some(value) = value else {
        return Ok(false);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" => Ok(true),
        "0" | "f" | "false" | "no" => Ok(false),
        _ => bail!("{key} is not a boolean: {value}"),
    }
}
