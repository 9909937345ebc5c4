//! Client for the coordination store: namespaced key-value access with deadlines and retries,
//! and the coordination primitives built on it (conditional puts, compare-and-swap, leases, queues, value sequences).

pub mod pb {
    tonic::include_proto!("etcdserverpb");
}

pub mod backend;
pub use backend::{
    Compare, CompareOp, CompareTarget, EtcdBackend, EventKind, KeyRange, KeyValue, KvBackend,
    LeaseDetails, MemoryBackend, RangeOptions, SortTarget, Txn, TxnOp, TxnOpResponse,
    TxnOutcome, WatchEvent, WatchStream,
};

mod client;
pub use client::{KvClient, TransientHook};

mod config;
pub use config::{MEMORY_ENDPOINT, StoreConfig};

mod coordinator;
pub use coordinator::{Coordinator, DeleteOptions, Lease, PutResponse};

mod error;
pub use error::CoordError;

mod queue;
pub use queue::Queue;

mod sequence;
pub use sequence::ValueSequence;
