//! Raw key-value transport under the coordinator.
//!
//! A backend knows nothing about namespaces, deadlines or retries; [`KvClient`](crate::KvClient) adds those.

mod etcd;
pub use etcd::EtcdBackend;

mod memory;
pub use memory::MemoryBackend;

use std::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
};

use async_trait::async_trait;
use tokio_stream::Stream;

use crate::error::CoordError;

/// Stored entry together with its revision metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    pub create_revision: i64,
    pub mod_revision: i64,
    /// Number of writes since creation; 0 means the key does not exist.
    pub version: i64,
    /// Attached lease id, 0 when none.
    pub lease: i64,
}

/// Keys addressed by an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRange {
    Key(String),
    Prefix(String),
}

impl KeyRange {
    pub fn new(path: impl Into<String>, prefix: bool) -> Self {
        if prefix {
            KeyRange::Prefix(path.into())
        } else {
            KeyRange::Key(path.into())
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyRange::Key(k) => k == key,
            KeyRange::Prefix(p) => key.starts_with(p.as_str()),
        }
    }

    /// Same range with `f` applied to the path.
    pub fn map(self, f: impl FnOnce(String) -> String) -> Self {
        match self {
            KeyRange::Key(k) => KeyRange::Key(f(k)),
            KeyRange::Prefix(p) => KeyRange::Prefix(f(p)),
        }
    }
}

/// Ascending order of a range result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortTarget {
    Key,
    CreateRevision,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeOptions {
    /// Maximum number of entries, 0 for unlimited. The limit applies after sorting.
    pub limit: i64,
    pub sort: Option<SortTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub revision: i64,
    pub prev: Option<KeyValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    Greater,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompareTarget {
    Version(i64),
    CreateRevision(i64),
    ModRevision(i64),
    Value(String),
}

/// Guard of a transaction: `target(key) op operand`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compare {
    pub key: String,
    pub op: CompareOp,
    pub target: CompareTarget,
}

impl Compare {
    pub fn new(key: impl Into<String>, op: CompareOp, target: CompareTarget) -> Self {
        Self {
            key: key.into(),
            op,
            target,
        }
    }

    /// Evaluate against the current entry (`None` if the key is missing).
    ///
    /// A missing key compares as version, create and mod revision 0 and never matches a value.
    pub fn evaluate(&self, current: Option<&KeyValue>) -> bool {
        use std::cmp::Ordering;

        let ord = match (&self.target, current) {
            (CompareTarget::Version(v), kv) => kv.map_or(0, |kv| kv.version).cmp(v),
            (CompareTarget::CreateRevision(r), kv) => kv.map_or(0, |kv| kv.create_revision).cmp(r),
            (CompareTarget::ModRevision(r), kv) => kv.map_or(0, |kv| kv.mod_revision).cmp(r),
            (CompareTarget::Value(v), Some(kv)) => kv.value.as_str().cmp(v.as_str()),
            (CompareTarget::Value(_), None) => return false,
        };
        match self.op {
            CompareOp::Equal => ord == Ordering::Equal,
            CompareOp::Greater => ord == Ordering::Greater,
        }
    }

    pub fn map_key(mut self, f: impl FnOnce(String) -> String) -> Self {
        self.key = f(self.key);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    Put {
        key: String,
        value: String,
        lease: i64,
    },
    Delete(KeyRange),
}

impl TxnOp {
    pub fn map_key(self, f: impl FnOnce(String) -> String) -> Self {
        match self {
            TxnOp::Put { key, value, lease } => TxnOp::Put {
                key: f(key),
                value,
                lease,
            },
            TxnOp::Delete(r) => TxnOp::Delete(r.map(f)),
        }
    }
}

/// If every compare holds, apply `success`, else apply `failure`; atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Txn {
    pub compare: Vec<Compare>,
    pub success: Vec<TxnOp>,
    pub failure: Vec<TxnOp>,
}

impl Txn {
    pub fn when(compare: Vec<Compare>) -> Self {
        Self {
            compare,
            ..Self::default()
        }
    }

    pub fn and_then(mut self, ops: Vec<TxnOp>) -> Self {
        self.success = ops;
        self
    }

    pub fn or_else(mut self, ops: Vec<TxnOp>) -> Self {
        self.failure = ops;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOpResponse {
    Put(PutOutcome),
    Delete { deleted: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnOutcome {
    pub succeeded: bool,
    pub revision: i64,
    pub responses: Vec<TxnOpResponse>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseGrant {
    pub id: i64,
    pub ttl: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseDetails {
    pub id: i64,
    /// Remaining seconds.
    pub ttl: i64,
    pub granted_ttl: i64,
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub key: String,
    /// Empty for deletes.
    pub value: String,
    pub mod_revision: i64,
}

/// Change events of a watched range. Dropping the stream cancels the watch.
pub struct WatchStream {
    inner: Pin<Box<dyn Stream<Item = Result<WatchEvent, CoordError>> + Send>>,
}

impl WatchStream {
    pub fn new(stream: impl Stream<Item = Result<WatchEvent, CoordError>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }
}

impl Stream for WatchStream {
    type Item = Result<WatchEvent, CoordError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for WatchStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchStream").finish_non_exhaustive()
    }
}

/// Linearizable key-value store with transactions, watches and leases.
#[async_trait]
pub trait KvBackend: Send + Sync + 'static {
    async fn range(&self, range: KeyRange, opts: RangeOptions) -> Result<Vec<KeyValue>, CoordError>;

    async fn put(&self, key: String, value: String, lease: i64) -> Result<PutOutcome, CoordError>;

    /// Number of deleted keys.
    async fn delete(&self, range: KeyRange) -> Result<i64, CoordError>;

    async fn txn(&self, txn: Txn) -> Result<TxnOutcome, CoordError>;

    /// Changes under `range` made after the call.
    async fn watch(&self, range: KeyRange) -> Result<WatchStream, CoordError>;

    async fn lease_grant(&self, ttl: i64) -> Result<LeaseGrant, CoordError>;

    async fn lease_revoke(&self, id: i64) -> Result<(), CoordError>;

    /// Refresh once; returns the new TTL.
    async fn lease_keep_alive(&self, id: i64) -> Result<i64, CoordError>;

    async fn lease_time_to_live(&self, id: i64) -> Result<LeaseDetails, CoordError>;

    /// Release the connection; later calls fail with [`CoordError::Closed`].
    async fn close(&self);
}

/// Smallest key greater than every key starting with `prefix` (etcd `range_end` convention).
pub(crate) fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    // Every byte is 0xff (or the prefix is empty): the range extends to the end of the keyspace.
    vec![0]
}
