use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tokio_stream::StreamExt;
use tracing::warn;

use herd_core::{RetryError, retry_if};
use herd_model::BackoffStrategy;

use crate::{
    backend::{
        Compare, KeyRange, KeyValue, KvBackend, LeaseDetails, LeaseGrant, PutOutcome, RangeOptions,
        Txn, TxnOpResponse, TxnOutcome, WatchStream,
    },
    config::StoreConfig,
    error::CoordError,
};

/// Called for every transient store failure, e.g. to count it in metrics.
pub type TransientHook = Arc<dyn Fn(&CoordError) + Send + Sync>;

/// Store access confined to one namespace, with a deadline on every call and bounded retry on transient errors.
///
/// Keys passed in are relative to the namespace; keys handed back have it stripped.
/// Conditional operations ([`txn`](Self::txn)) are never retried: a timed-out transaction may have been applied.
#[derive(Clone)]
pub struct KvClient {
    backend: Arc<dyn KvBackend>,
    namespace: String,
    op_timeout: Duration,
    op_retry: BackoffStrategy,
    on_transient: Option<TransientHook>,
    last_stamp: Arc<AtomicU64>,
}

impl KvClient {
    pub fn new(backend: Arc<dyn KvBackend>, cfg: &StoreConfig) -> Self {
        Self {
            backend,
            namespace: normalize_namespace(&cfg.prefix),
            op_timeout: cfg.op_timeout,
            op_retry: cfg.op_retry.clone(),
            on_transient: None,
            last_stamp: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_transient_hook(mut self, hook: TransientHook) -> Self {
        self.on_transient = Some(hook);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn get(&self, path: &str, prefix: bool) -> Result<Vec<KeyValue>, CoordError> {
        self.range(path, prefix, RangeOptions::default()).await
    }

    pub async fn range(
        &self,
        path: &str,
        prefix: bool,
        opts: RangeOptions,
    ) -> Result<Vec<KeyValue>, CoordError> {
        let range = KeyRange::new(self.full_key(path), prefix);
        let kvs = self
            .retried("get", || self.deadline("get", self.backend.range(range.clone(), opts)))
            .await?;
        Ok(kvs.into_iter().map(|kv| self.strip(kv)).collect())
    }

    pub async fn put(&self, path: &str, value: &str, lease: i64) -> Result<PutOutcome, CoordError> {
        let key = self.full_key(path);
        let outcome = self
            .retried("put", || {
                self.deadline(
                    "put",
                    self.backend.put(key.clone(), value.to_string(), lease),
                )
            })
            .await?;
        Ok(PutOutcome {
            revision: outcome.revision,
            prev: outcome.prev.map(|kv| self.strip(kv)),
        })
    }

    pub async fn delete(&self, path: &str, prefix: bool) -> Result<i64, CoordError> {
        let range = KeyRange::new(self.full_key(path), prefix);
        self.retried("delete", || self.deadline("delete", self.backend.delete(range.clone())))
            .await
    }

    /// Atomic transaction; keys in compares and ops are namespace-relative.
    pub async fn txn(&self, txn: Txn) -> Result<TxnOutcome, CoordError> {
        let txn = Txn {
            compare: txn
                .compare
                .into_iter()
                .map(|c: Compare| c.map_key(|k| self.full_key(&k)))
                .collect(),
            success: txn
                .success
                .into_iter()
                .map(|op| op.map_key(|k| self.full_key(&k)))
                .collect(),
            failure: txn
                .failure
                .into_iter()
                .map(|op| op.map_key(|k| self.full_key(&k)))
                .collect(),
        };

        let outcome = self
            .deadline("txn", self.backend.txn(txn))
            .await
            .inspect_err(|e| self.observe(e))?;

        Ok(TxnOutcome {
            responses: outcome
                .responses
                .into_iter()
                .map(|r| match r {
                    TxnOpResponse::Put(p) => TxnOpResponse::Put(PutOutcome {
                        revision: p.revision,
                        prev: p.prev.map(|kv| self.strip(kv)),
                    }),
                    other => other,
                })
                .collect(),
            ..outcome
        })
    }

    /// Changes under `path` from now on, with namespace-relative keys.
    pub async fn watch(&self, path: &str, prefix: bool) -> Result<WatchStream, CoordError> {
        let range = KeyRange::new(self.full_key(path), prefix);
        let stream = self
            .retried("watch", || self.deadline("watch", self.backend.watch(range.clone())))
            .await?;

        let namespace = self.namespace.clone();
        Ok(WatchStream::new(stream.map(move |event| {
            event.map(|mut e| {
                if let Some(rest) = e.key.strip_prefix(namespace.as_str()) {
                    e.key = rest.to_string();
                }
                e
            })
        })))
    }

    /// Not retried: a lost response would leak a lease.
    pub async fn lease_grant(&self, ttl: i64) -> Result<LeaseGrant, CoordError> {
        self.deadline("lease_grant", self.backend.lease_grant(ttl))
            .await
            .inspect_err(|e| self.observe(e))
    }

    pub async fn lease_revoke(&self, id: i64) -> Result<(), CoordError> {
        self.retried("lease_revoke", || {
            self.deadline("lease_revoke", self.backend.lease_revoke(id))
        })
        .await
    }

    pub async fn lease_keep_alive(&self, id: i64) -> Result<i64, CoordError> {
        self.retried("lease_keep_alive", || {
            self.deadline("lease_keep_alive", self.backend.lease_keep_alive(id))
        })
        .await
    }

    pub async fn lease_time_to_live(&self, id: i64) -> Result<LeaseDetails, CoordError> {
        let mut details = self
            .retried("lease_time_to_live", || {
                self.deadline("lease_time_to_live", self.backend.lease_time_to_live(id))
            })
            .await?;
        details.keys = details
            .keys
            .into_iter()
            .map(|k| k.strip_prefix(self.namespace.as_str()).map(str::to_string).unwrap_or(k))
            .collect();
        Ok(details)
    }

    pub async fn close(&self) {
        self.backend.close().await;
    }

    /// Strictly increasing wall-clock nanoseconds for sequence and queue keys.
    pub(crate) fn next_stamp(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let mut prev = self.last_stamp.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev + 1);
            match self
                .last_stamp
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }

    fn full_key(&self, path: &str) -> String {
        format!("{}{}", self.namespace, path)
    }

    fn strip(&self, mut kv: KeyValue) -> KeyValue {
        if let Some(rest) = kv.key.strip_prefix(self.namespace.as_str()) {
            kv.key = rest.to_string();
        }
        kv
    }

    fn observe(&self, err: &CoordError) {
        if err.is_transient()
            && let Some(hook) = &self.on_transient
        {
            hook(err);
        }
    }

    async fn deadline<T>(
        &self,
        op: &str,
        fut: impl Future<Output = Result<T, CoordError>>,
    ) -> Result<T, CoordError> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(CoordError::DeadlineExceeded(format!(
                "{op} took longer than {:?}",
                self.op_timeout
            ))),
        }
    }

    async fn retried<T, F, Fut>(&self, op: &str, f: F) -> Result<T, CoordError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CoordError>>,
    {
        let result = retry_if(
            op,
            &self.op_retry,
            CoordError::is_transient,
            |e, attempt, delay| {
                self.observe(e);
                warn!(op, attempt, ?delay, error = %e, "transient store error, retrying");
            },
            f,
        )
        .await;

        result.map_err(|err| match err {
            RetryError::Permanent(e) => e,
            RetryError::Exhausted { attempts, last } => {
                self.observe(&last);
                CoordError::StoreUnavailable {
                    op: op.to_string(),
                    attempts,
                    last: Box::new(last),
                }
            }
        })
    }
}

fn normalize_namespace(prefix: &str) -> String {
    let trimmed = prefix.trim();
    if trimmed.is_empty() || trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;
    use crate::MemoryBackend;

    fn config(prefix: &str) -> StoreConfig {
        StoreConfig::default()
            .with_endpoints("memory://")
            .with_prefix(prefix)
    }

    /// Fails `range` with a fixed error, counting calls; everything else is unsupported.
    struct FailingBackend {
        calls: AtomicU32,
        transient: bool,
    }

    #[async_trait]
    impl KvBackend for FailingBackend {
        async fn range(&self, _: KeyRange, _: RangeOptions) -> Result<Vec<KeyValue>, CoordError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.transient {
                Err(CoordError::DeadlineExceeded("slow".into()))
            } else {
                Err(CoordError::Auth("denied".into()))
            }
        }
        async fn put(&self, _: String, _: String, _: i64) -> Result<PutOutcome, CoordError> {
            Err(CoordError::Closed)
        }
        async fn delete(&self, _: KeyRange) -> Result<i64, CoordError> {
            Err(CoordError::Closed)
        }
        async fn txn(&self, _: Txn) -> Result<TxnOutcome, CoordError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CoordError::Unavailable("down".into()))
        }
        async fn watch(&self, _: KeyRange) -> Result<WatchStream, CoordError> {
            Err(CoordError::Closed)
        }
        async fn lease_grant(&self, _: i64) -> Result<LeaseGrant, CoordError> {
            Err(CoordError::Closed)
        }
        async fn lease_revoke(&self, _: i64) -> Result<(), CoordError> {
            Err(CoordError::Closed)
        }
        async fn lease_keep_alive(&self, _: i64) -> Result<i64, CoordError> {
            Err(CoordError::Closed)
        }
        async fn lease_time_to_live(&self, _: i64) -> Result<LeaseDetails, CoordError> {
            Err(CoordError::Closed)
        }
        async fn close(&self) {}
    }

    /// Never answers `range`.
    struct HangingBackend;

    #[async_trait]
    impl KvBackend for HangingBackend {
        async fn range(&self, _: KeyRange, _: RangeOptions) -> Result<Vec<KeyValue>, CoordError> {
            std::future::pending().await
        }
        async fn put(&self, _: String, _: String, _: i64) -> Result<PutOutcome, CoordError> {
            std::future::pending().await
        }
        async fn delete(&self, _: KeyRange) -> Result<i64, CoordError> {
            std::future::pending().await
        }
        async fn txn(&self, _: Txn) -> Result<TxnOutcome, CoordError> {
            std::future::pending().await
        }
        async fn watch(&self, _: KeyRange) -> Result<WatchStream, CoordError> {
            std::future::pending().await
        }
        async fn lease_grant(&self, _: i64) -> Result<LeaseGrant, CoordError> {
            std::future::pending().await
        }
        async fn lease_revoke(&self, _: i64) -> Result<(), CoordError> {
            std::future::pending().await
        }
        async fn lease_keep_alive(&self, _: i64) -> Result<i64, CoordError> {
            std::future::pending().await
        }
        async fn lease_time_to_live(&self, _: i64) -> Result<LeaseDetails, CoordError> {
            std::future::pending().await
        }
        async fn close(&self) {}
    }

    #[test]
    fn namespace_gets_a_trailing_slash() {
        assert_eq!(normalize_namespace(""), "");
        assert_eq!(normalize_namespace("herd"), "herd/");
        assert_eq!(normalize_namespace("herd/"), "herd/");
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let backend: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
        let a = KvClient::new(backend.clone(), &config("a"));
        let b = KvClient::new(backend.clone(), &config("b"));

        a.put("job/status", "PENDING", 0).await.unwrap();
        b.put("job/status", "FAILED", 0).await.unwrap();

        let got = a.get("job/", true).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].key, "job/status");
        assert_eq!(got[0].value, "PENDING");

        let raw = backend
            .range(KeyRange::Prefix(String::new()), RangeOptions::default())
            .await
            .unwrap();
        let keys: Vec<_> = raw.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(keys, vec!["a/job/status", "b/job/status"]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_exhaust_into_store_unavailable() {
        let backend = Arc::new(FailingBackend {
            calls: AtomicU32::new(0),
            transient: true,
        });
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let client = KvClient::new(backend.clone(), &config("ns")).with_transient_hook(Arc::new(
            move |_: &CoordError| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        ));

        let started = Instant::now();
        let err = client.get("k", false).await.unwrap_err();
        assert!(matches!(err, CoordError::StoreUnavailable { attempts: 2, .. }));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_surface_immediately() {
        let backend = Arc::new(FailingBackend {
            calls: AtomicU32::new(0),
            transient: false,
        });
        let client = KvClient::new(backend.clone(), &config("ns"));

        let err = client.get("k", false).await.unwrap_err();
        assert!(matches!(err, CoordError::Auth(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transactions_are_not_retried() {
        let backend = Arc::new(FailingBackend {
            calls: AtomicU32::new(0),
            transient: true,
        });
        let client = KvClient::new(backend.clone(), &config("ns"));

        let err = client.txn(Txn::default()).await.unwrap_err();
        assert!(matches!(err, CoordError::Unavailable(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn every_call_has_a_deadline() {
        let client = KvClient::new(Arc::new(HangingBackend), &config("ns"));

        let started = Instant::now();
        let err = client.txn(Txn::default()).await.unwrap_err();
        assert!(matches!(err, CoordError::DeadlineExceeded(_)));
        assert_eq!(started.elapsed(), Duration::from_secs(10));

        let err = client.get("k", true).await.unwrap_err();
        assert!(matches!(err, CoordError::StoreUnavailable { .. }));
    }

    #[test]
    fn stamps_are_strictly_increasing() {
        let client = KvClient::new(Arc::new(MemoryBackend::new()), &config(""));
        let mut prev = 0;
        for _ in 0..1_000 {
            let next = client.next_stamp();
            assert!(next > prev);
            prev = next;
        }
    }
}
