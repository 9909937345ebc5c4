use std::sync::Arc;

use tracing::{info, warn};

use herd_core::{RetryError, retry_if};

use crate::{
    backend::{
        Compare, CompareOp, CompareTarget, EtcdBackend, KeyValue, KvBackend, LeaseDetails,
        LeaseGrant, MemoryBackend, Txn, TxnOp, TxnOpResponse, WatchStream,
    },
    client::{KvClient, TransientHook},
    config::StoreConfig,
    error::CoordError,
    queue::Queue,
    sequence::ValueSequence,
};

/// Time-bound handle; keys attached with [`Coordinator::put_with_lease`] vanish when it expires.
pub type Lease = LeaseGrant;

/// Result of an unconditional put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResponse {
    pub revision: i64,
    pub previous_value: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Delete every key under the path instead of the path itself.
    pub prefix: bool,
}

/// Coordination primitives on top of the key-value store.
///
/// Cloning is cheap and clones share one connection.
#[derive(Clone)]
pub struct Coordinator {
    client: KvClient,
}

impl Coordinator {
    /// Connect to the configured store, retrying transient failures under `cfg.connect_retry`.
    pub async fn connect(cfg: &StoreConfig) -> Result<Self, CoordError> {
        Self::connect_observed(cfg, None).await
    }

    /// Like [`connect`](Self::connect); `hook` sees every transient failure, during connect and afterwards.
    pub async fn connect_observed(cfg: &StoreConfig, hook: Option<TransientHook>) -> Result<Self, CoordError> {
        cfg.validate()?;

        let backend: Arc<dyn KvBackend> = if cfg.is_memory() {
            info!("using in-process memory store");
            Arc::new(MemoryBackend::new())
        } else {
            let connected = retry_if(
                "connect",
                &cfg.connect_retry,
                CoordError::is_transient,
                |e, attempt, delay| {
                    if let Some(hook) = &hook {
                        hook(e);
                    }
                    warn!(attempt, ?delay, error = %e, "store connection failed, retrying");
                },
                || EtcdBackend::connect(cfg),
            )
            .await;

            match connected {
                Ok(backend) => Arc::new(backend),
                Err(RetryError::Permanent(e)) => return Err(e),
                Err(RetryError::Exhausted { attempts, last }) => {
                    if let Some(hook) = &hook {
                        hook(&last);
                    }
                    return Err(CoordError::StoreUnavailable {
                        op: "connect".into(),
                        attempts,
                        last: Box::new(last),
                    });
                }
            }
        };

        let mut coordinator = Self::with_backend(backend, cfg);
        if let Some(hook) = hook {
            coordinator.client = coordinator.client.with_transient_hook(hook);
        }
        Ok(coordinator)
    }

    /// Use an already built backend, e.g. a shared [`MemoryBackend`] in tests.
    pub fn with_backend(backend: Arc<dyn KvBackend>, cfg: &StoreConfig) -> Self {
        Self {
            client: KvClient::new(backend, cfg),
        }
    }

    pub fn client(&self) -> &KvClient {
        &self.client
    }

    pub async fn get(&self, path: &str, prefix: bool) -> Result<Vec<KeyValue>, CoordError> {
        self.client.get(path, prefix).await
    }

    /// Value of a single key, `None` if missing.
    pub async fn get_value(&self, path: &str) -> Result<Option<String>, CoordError> {
        Ok(self.client.get(path, false).await?.into_iter().next().map(|kv| kv.value))
    }

    pub async fn put(&self, path: &str, value: &str) -> Result<PutResponse, CoordError> {
        let outcome = self.client.put(path, value, 0).await?;
        Ok(PutResponse {
            revision: outcome.revision,
            previous_value: outcome.prev.map(|kv| kv.value),
        })
    }

    /// Create `path` only if it does not exist yet.
    pub async fn put_if_missing(&self, path: &str, value: &str) -> Result<bool, CoordError> {
        self.conditional_put(
            path,
            value,
            Compare::new(path, CompareOp::Equal, CompareTarget::CreateRevision(0)),
        )
        .await
    }

    /// Overwrite `path` only if it already exists.
    pub async fn put_if_exists(&self, path: &str, value: &str) -> Result<bool, CoordError> {
        self.conditional_put(
            path,
            value,
            Compare::new(path, CompareOp::Greater, CompareTarget::Version(0)),
        )
        .await
    }

    /// Replace `expected` with `value`. `false` means the stored value differs; another writer got there first.
    pub async fn compare_and_swap(&self, path: &str, value: &str, expected: &str) -> Result<bool, CoordError> {
        self.conditional_put(
            path,
            value,
            Compare::new(path, CompareOp::Equal, CompareTarget::Value(expected.to_string())),
        )
        .await
    }

    pub async fn delete_if_exists(&self, path: &str) -> Result<bool, CoordError> {
        let txn = Txn::when(vec![Compare::new(
            path,
            CompareOp::Greater,
            CompareTarget::Version(0),
        )])
        .and_then(vec![TxnOp::Delete(crate::KeyRange::Key(path.to_string()))]);

        let outcome = self.client.txn(txn).await?;
        let deleted = outcome
            .responses
            .iter()
            .any(|r| matches!(r, TxnOpResponse::Delete { deleted } if *deleted > 0));
        Ok(outcome.succeeded && deleted)
    }

    /// Number of deleted keys.
    pub async fn delete_with_options(&self, path: &str, opts: DeleteOptions) -> Result<i64, CoordError> {
        self.client.delete(path, opts.prefix).await
    }

    pub async fn watch(&self, path: &str, prefix: bool) -> Result<WatchStream, CoordError> {
        self.client.watch(path, prefix).await
    }

    pub async fn grant_lease(&self, ttl_secs: i64) -> Result<Lease, CoordError> {
        self.client.lease_grant(ttl_secs).await
    }

    /// Restart the lease's TTL; fails with [`CoordError::LeaseNotFound`] once it has expired.
    pub async fn refresh_lease(&self, lease: &Lease) -> Result<i64, CoordError> {
        self.client.lease_keep_alive(lease.id).await
    }

    /// Drop the lease and every key attached to it.
    pub async fn revoke_lease(&self, lease: &Lease) -> Result<(), CoordError> {
        self.client.lease_revoke(lease.id).await
    }

    pub async fn lease_details(&self, lease: &Lease) -> Result<LeaseDetails, CoordError> {
        self.client.lease_time_to_live(lease.id).await
    }

    pub async fn put_with_lease(&self, path: &str, value: &str, lease: &Lease) -> Result<PutResponse, CoordError> {
        let outcome = self.client.put(path, value, lease.id).await?;
        Ok(PutResponse {
            revision: outcome.revision,
            previous_value: outcome.prev.map(|kv| kv.value),
        })
    }

    pub fn queue(&self, name: &str) -> Queue {
        Queue::new(self.client.clone(), name)
    }

    pub fn value_sequence(&self, name: &str) -> ValueSequence {
        ValueSequence::new(self.client.clone(), name)
    }

    /// Release the store connection. Every clone is affected.
    pub async fn close(&self) {
        self.client.close().await;
    }

    async fn conditional_put(&self, path: &str, value: &str, guard: Compare) -> Result<bool, CoordError> {
        let txn = Txn::when(vec![guard]).and_then(vec![TxnOp::Put {
            key: path.to_string(),
            value: value.to_string(),
            lease: 0,
        }]);
        Ok(self.client.txn(txn).await?.succeeded)
    }
}
