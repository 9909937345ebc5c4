use crate::{
    backend::{Compare, CompareOp, CompareTarget, KeyValue, RangeOptions, SortTarget, Txn, TxnOp},
    client::KvClient,
    error::CoordError,
};

/// Append-only log of values under `{name}/{unix_nanos}`.
///
/// Keys sort chronologically, so a prefix scan returns values in append order.
#[derive(Clone)]
pub struct ValueSequence {
    client: KvClient,
    name: String,
    prefix: String,
}

impl ValueSequence {
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

    /// Append `value`; returns the key it was stored under.
    ///
    /// Fails with [`CoordError::SequenceCollision`] if another writer already used the same timestamp.
    pub async fn add_new(&self, value: &str) -> Result<String, CoordError> {
        self.add_at(self.client.next_stamp(), value).await
    }

    /// Append `value` under the timestamp `stamp`.
    pub(crate) async fn add_at(&self, stamp: u64, value: &str) -> Result<String, CoordError> {
        let key = format!("{}{stamp}", self.prefix);
        let txn = Txn::when(vec![Compare::new(
            key.as_str(),
            CompareOp::Equal,
            CompareTarget::CreateRevision(0),
        )])
        .and_then(vec![TxnOp::Put {
            key: key.clone(),
            value: value.to_string(),
            lease: 0,
        }]);

        if self.client.txn(txn).await?.succeeded {
            Ok(key)
        } else {
            Err(CoordError::SequenceCollision(key))
        }
    }

    /// Every value, oldest first.
    pub async fn get_all(&self) -> Result<Vec<String>, CoordError> {
        Ok(self.entries().await?.into_iter().map(|kv| kv.value).collect())
    }

    /// Every entry with its key, oldest first.
    pub async fn entries(&self) -> Result<Vec<KeyValue>, CoordError> {
        let by_key = RangeOptions {
            limit: 0,
            sort: Some(SortTarget::Key),
        };
        self.client.range(&self.prefix, true, by_key).await
    }
}
