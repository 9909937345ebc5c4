use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::mpsc, time::Instant};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

use crate::{
    backend::{
        EventKind, KeyRange, KeyValue, KvBackend, LeaseDetails, LeaseGrant, PutOutcome,
        RangeOptions, SortTarget, Txn, TxnOp, TxnOpResponse, TxnOutcome, WatchEvent, WatchStream,
    },
    error::CoordError,
};

const FIRST_LEASE_ID: i64 = 0x694d_0000;

/// In-process store with etcd semantics: a global revision, atomic transactions, watches and leases.
///
/// Leases expire lazily: every call first removes the keys of leases whose deadline has passed.
/// Deadlines follow `tokio::time`, so a paused test clock drives expiry.
/// Watches only deliver changes made after they were created.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    revision: i64,
    kvs: BTreeMap<String, KeyValue>,
    leases: HashMap<i64, LeaseEntry>,
    issued_leases: i64,
    watchers: Vec<Watcher>,
    closed: bool,
}

struct LeaseEntry {
    granted_ttl: i64,
    deadline: Instant,
    keys: BTreeSet<String>,
}

struct Watcher {
    range: KeyRange,
    tx: mpsc::UnboundedSender<Result<WatchEvent, CoordError>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the state for an operation: refuse after close, then drop expired leases.
    fn open_state(&self) -> Result<MutexGuard<'_, State>, CoordError> {
        let mut state = self.state();
        if state.closed {
            return Err(CoordError::Closed);
        }
        state.expire_leases(Instant::now());
        Ok(state)
    }
}

impl State {
    fn expire_leases(&mut self, now: Instant) {
        let expired: Vec<i64> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            trace!(lease = id, "lease expired");
            self.drop_lease(id);
        }
    }

    /// Remove a lease and every key attached to it in one revision.
    fn drop_lease(&mut self, id: i64) -> bool {
        let Some(lease) = self.leases.remove(&id) else {
            return false;
        };
        if lease.keys.is_empty() {
            return true;
        }

        let rev = self.revision + 1;
        for key in lease.keys {
            self.apply_delete_key(rev, &key);
        }
        self.revision = rev;
        true
    }

    fn select(&self, range: &KeyRange, opts: RangeOptions) -> Vec<KeyValue> {
        let mut kvs: Vec<KeyValue> = match range {
            KeyRange::Key(k) => self.kvs.get(k).cloned().into_iter().collect(),
            KeyRange::Prefix(p) => self
                .kvs
                .range(p.clone()..)
                .take_while(|(k, _)| k.starts_with(p.as_str()))
                .map(|(_, kv)| kv.clone())
                .collect(),
        };

        // The map is ordered by key already.
        if opts.sort == Some(SortTarget::CreateRevision) {
            kvs.sort_by_key(|kv| kv.create_revision);
        }
        if opts.limit > 0 {
            kvs.truncate(opts.limit as usize);
        }
        kvs
    }

    fn check_put(&self, key: &str, lease: i64) -> Result<(), CoordError> {
        if key.is_empty() {
            return Err(CoordError::InvalidKey("key is not provided".into()));
        }
        if lease != 0 && !self.leases.contains_key(&lease) {
            return Err(CoordError::LeaseNotFound(lease));
        }
        Ok(())
    }

    fn apply_put(&mut self, rev: i64, key: String, value: String, lease: i64) -> PutOutcome {
        let prev = self.kvs.get(&key).cloned();
        if let Some(old) = &prev
            && old.lease != 0
            && old.lease != lease
            && let Some(entry) = self.leases.get_mut(&old.lease)
        {
            entry.keys.remove(&key);
        }
        if let Some(entry) = self.leases.get_mut(&lease) {
            entry.keys.insert(key.clone());
        }

        let kv = KeyValue {
            key: key.clone(),
            value,
            create_revision: prev.as_ref().map_or(rev, |p| p.create_revision),
            mod_revision: rev,
            version: prev.as_ref().map_or(0, |p| p.version) + 1,
            lease,
        };
        self.notify(EventKind::Put, &kv);
        self.kvs.insert(key, kv);

        PutOutcome {
            revision: rev,
            prev,
        }
    }

    fn apply_delete_key(&mut self, rev: i64, key: &str) -> bool {
        let Some(old) = self.kvs.remove(key) else {
            return false;
        };
        if old.lease != 0
            && let Some(entry) = self.leases.get_mut(&old.lease)
        {
            entry.keys.remove(key);
        }
        let tombstone = KeyValue {
            value: String::new(),
            mod_revision: rev,
            ..old
        };
        self.notify(EventKind::Delete, &tombstone);
        true
    }

    fn apply_delete(&mut self, rev: i64, range: &KeyRange) -> i64 {
        let keys: Vec<String> = self
            .select(range, RangeOptions::default())
            .into_iter()
            .map(|kv| kv.key)
            .collect();
        keys.iter()
            .filter(|key| self.apply_delete_key(rev, key))
            .count() as i64
    }

    fn notify(&mut self, kind: EventKind, kv: &KeyValue) {
        self.watchers.retain(|w| !w.tx.is_closed());
        for watcher in self.watchers.iter().filter(|w| w.range.matches(&kv.key)) {
            let _ = watcher.tx.send(Ok(WatchEvent {
                kind,
                key: kv.key.clone(),
                value: kv.value.clone(),
                mod_revision: kv.mod_revision,
            }));
        }
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn range(&self, range: KeyRange, opts: RangeOptions) -> Result<Vec<KeyValue>, CoordError> {
        let state = self.open_state()?;
        Ok(state.select(&range, opts))
    }

    async fn put(&self, key: String, value: String, lease: i64) -> Result<PutOutcome, CoordError> {
        let mut state = self.open_state()?;
        state.check_put(&key, lease)?;

        let rev = state.revision + 1;
        let outcome = state.apply_put(rev, key, value, lease);
        state.revision = rev;
        Ok(outcome)
    }

    async fn delete(&self, range: KeyRange) -> Result<i64, CoordError> {
        let mut state = self.open_state()?;
        let rev = state.revision + 1;
        let deleted = state.apply_delete(rev, &range);
        if deleted > 0 {
            state.revision = rev;
        }
        Ok(deleted)
    }

    async fn txn(&self, txn: Txn) -> Result<TxnOutcome, CoordError> {
        let mut state = self.open_state()?;

        let succeeded = txn
            .compare
            .iter()
            .all(|c| c.evaluate(state.kvs.get(&c.key)));
        let ops = if succeeded { txn.success } else { txn.failure };

        for op in &ops {
            if let TxnOp::Put { key, lease, .. } = op {
                state.check_put(key, *lease)?;
            }
        }

        let rev = state.revision + 1;
        let mut changed = false;
        let mut responses = Vec::with_capacity(ops.len());
        for op in ops {
            let response = match op {
                TxnOp::Put { key, value, lease } => {
                    changed = true;
                    TxnOpResponse::Put(state.apply_put(rev, key, value, lease))
                }
                TxnOp::Delete(range) => {
                    let deleted = state.apply_delete(rev, &range);
                    changed |= deleted > 0;
                    TxnOpResponse::Delete { deleted }
                }
            };
            responses.push(response);
        }
        if changed {
            state.revision = rev;
        }

        Ok(TxnOutcome {
            succeeded,
            revision: state.revision,
            responses,
        })
    }

    async fn watch(&self, range: KeyRange) -> Result<WatchStream, CoordError> {
        let mut state = self.open_state()?;
        let (tx, rx) = mpsc::unbounded_channel();
        state.watchers.push(Watcher { range, tx });
        Ok(WatchStream::new(UnboundedReceiverStream::new(rx)))
    }

    async fn lease_grant(&self, ttl: i64) -> Result<LeaseGrant, CoordError> {
        let mut state = self.open_state()?;
        let ttl = ttl.max(1);
        state.issued_leases += 1;
        let id = FIRST_LEASE_ID + state.issued_leases;

        state.leases.insert(
            id,
            LeaseEntry {
                granted_ttl: ttl,
                deadline: Instant::now() + Duration::from_secs(ttl as u64),
                keys: BTreeSet::new(),
            },
        );
        Ok(LeaseGrant { id, ttl })
    }

    async fn lease_revoke(&self, id: i64) -> Result<(), CoordError> {
        let mut state = self.open_state()?;
        if state.drop_lease(id) {
            Ok(())
        } else {
            Err(CoordError::LeaseNotFound(id))
        }
    }

    async fn lease_keep_alive(&self, id: i64) -> Result<i64, CoordError> {
        let mut state = self.open_state()?;
        let lease = state
            .leases
            .get_mut(&id)
            .ok_or(CoordError::LeaseNotFound(id))?;
        lease.deadline = Instant::now() + Duration::from_secs(lease.granted_ttl as u64);
        Ok(lease.granted_ttl)
    }

    async fn lease_time_to_live(&self, id: i64) -> Result<LeaseDetails, CoordError> {
        let state = self.open_state()?;
        let lease = state.leases.get(&id).ok_or(CoordError::LeaseNotFound(id))?;
        let remaining = lease.deadline.saturating_duration_since(Instant::now());

        Ok(LeaseDetails {
            id,
            ttl: remaining.as_secs_f64().ceil() as i64,
            granted_ttl: lease.granted_ttl,
            keys: lease.keys.iter().cloned().collect(),
        })
    }

    async fn close(&self) {
        let mut state = self.state();
        state.closed = true;
        state.watchers.clear();
    }
}
