use tracing::debug;

use crate::{
    backend::{Compare, CompareOp, CompareTarget, KeyRange, RangeOptions, SortTarget, Txn, TxnOp},
    client::KvClient,
    error::CoordError,
};

/// FIFO queue stored as keys under `{name}/`, ordered by creation revision.
///
/// Dequeue never blocks: an empty queue fails with [`CoordError::QueueEmpty`].
#[derive(Clone)]
pub struct Queue {
    client: KvClient,
    name: String,
    prefix: String,
}

impl Queue {
    pub(crate) fn new(client: KvClient, name: &str) -> Self {
        let name = name.trim_end_matches('/').to_string();
        Self {
            prefix: format!("{name}/"),
            client,
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append `msg`; returns the key it was stored under.
    pub async fn enqueue(&self, msg: &str) -> Result<String, CoordError> {
        loop {
            let key = format!("{}{}", self.prefix, self.client.next_stamp());
            let txn = Txn::when(vec![Compare::new(
                key.as_str(),
                CompareOp::Equal,
                CompareTarget::CreateRevision(0),
            )])
            .and_then(vec![TxnOp::Put {
                key: key.clone(),
                value: msg.to_string(),
                lease: 0,
            }]);

            if self.client.txn(txn).await?.succeeded {
                return Ok(key);
            }
            debug!(queue = %self.name, key, "queue key taken, picking another");
        }
    }

    /// Remove and return the oldest message.
    ///
    /// When another consumer removes the head first, the next head is tried.
    pub async fn dequeue(&self) -> Result<String, CoordError> {
        let oldest = RangeOptions {
            limit: 1,
            sort: Some(SortTarget::CreateRevision),
        };

        loop {
            let Some(head) = self
                .client
                .range(&self.prefix, true, oldest)
                .await?
                .into_iter()
                .next()
            else {
                return Err(CoordError::QueueEmpty(self.name.clone()));
            };

            let txn = Txn::when(vec![Compare::new(
                head.key.as_str(),
                CompareOp::Equal,
                CompareTarget::ModRevision(head.mod_revision),
            )])
            .and_then(vec![TxnOp::Delete(KeyRange::Key(head.key.clone()))]);

            if self.client.txn(txn).await?.succeeded {
                return Ok(head.value);
            }
            debug!(queue = %self.name, key = %head.key, "lost dequeue race, retrying");
        }
    }

    /// Number of queued messages.
    pub async fn len(&self) -> Result<usize, CoordError> {
        Ok(self.client.get(&self.prefix, true).await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool, CoordError> {
        Ok(self.len().await? == 0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{Coordinator, MemoryBackend, StoreConfig};

    fn coordinator() -> Coordinator {
        Coordinator::with_backend(
            Arc::new(MemoryBackend::new()),
            &StoreConfig::default().with_endpoints("memory://"),
        )
    }

    #[tokio::test]
    async fn fifo_order() {
        let q = coordinator().queue("jobs");
        for msg in ["a", "b", "c"] {
            q.enqueue(msg).await.unwrap();
        }
        assert_eq!(q.len().await.unwrap(), 3);

        assert_eq!(q.dequeue().await.unwrap(), "a");
        assert_eq!(q.dequeue().await.unwrap(), "b");
        q.enqueue("d").await.unwrap();
        assert_eq!(q.dequeue().await.unwrap(), "c");
        assert_eq!(q.dequeue().await.unwrap(), "d");
        assert!(q.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn empty_queue_fails() {
        let q = coordinator().queue("jobs/");
        assert_eq!(q.name(), "jobs");
        assert!(matches!(q.dequeue().await, Err(CoordError::QueueEmpty(name)) if name == "jobs"));
    }

    #[tokio::test]
    async fn queues_do_not_share_keys() {
        let c = coordinator();
        c.queue("a").enqueue("1").await.unwrap();
        c.queue("ab").enqueue("2").await.unwrap();
        assert_eq!(c.queue("a").len().await.unwrap(), 1);
        assert_eq!(c.queue("a").dequeue().await.unwrap(), "1");
        assert!(c.queue("a").dequeue().await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumers_never_share_a_message() {
        let c = coordinator();
        let q = c.queue("work");
        for i in 0..20 {
            q.enqueue(&i.to_string()).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let q = q.clone();
            handles.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Ok(msg) = q.dequeue().await {
                    got.push(msg.parse::<u32>().unwrap());
                }
                got
            }));
        }

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        all.sort_unstable();
        assert_eq!(all, (0..20).collect::<Vec<_>>());
    }
}
