use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{
    Request,
    metadata::AsciiMetadataValue,
    service::{Interceptor, interceptor::InterceptedService},
    transport::{Certificate, Channel, ClientTlsConfig, Endpoint},
};
use tracing::{debug, info, warn};

use crate::{
    backend::{
        CompareOp, CompareTarget, EventKind, KeyRange, KeyValue, KvBackend, LeaseDetails,
        LeaseGrant, PutOutcome, RangeOptions, SortTarget, Txn, TxnOp, TxnOpResponse, TxnOutcome,
        WatchEvent, WatchStream, prefix_end,
    },
    config::StoreConfig,
    error::CoordError,
    pb,
};

const WATCH_BUFFER: usize = 64;

/// Attaches the auth token obtained at connect time to every request.
#[derive(Clone, Default)]
pub struct AuthToken(Option<AsciiMetadataValue>);

impl Interceptor for AuthToken {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, tonic::Status> {
        if let Some(token) = &self.0 {
            request.metadata_mut().insert("token", token.clone());
        }
        Ok(request)
    }
}

type Authed = InterceptedService<Channel, AuthToken>;

/// etcd v3 over gRPC.
pub struct EtcdBackend {
    kv: pb::kv_client::KvClient<Authed>,
    watch: pb::watch_client::WatchClient<Authed>,
    lease: pb::lease_client::LeaseClient<Authed>,
    closed: AtomicBool,
}

impl EtcdBackend {
    /// Open a channel to the configured endpoints and authenticate if credentials are set.
    ///
    /// At least one endpoint must accept a connection; the others are added to the balanced channel lazily.
    pub async fn connect(cfg: &StoreConfig) -> Result<Self, CoordError> {
        cfg.validate()?;
        let tls = load_tls(cfg).await?;

        let mut endpoints = Vec::with_capacity(cfg.endpoints.len());
        for url in &cfg.endpoints {
            let mut endpoint = Endpoint::from_shared(url.clone())
                .map_err(|e| CoordError::Config(format!("invalid endpoint {url}: {e}")))?
                .connect_timeout(cfg.op_timeout)
                .timeout(cfg.op_timeout);
            if let Some(tls) = &tls {
                endpoint = endpoint.tls_config(tls.clone())?;
            }
            endpoints.push(endpoint);
        }

        let channel = match endpoints.as_slice() {
            [single] => single.connect().await?,
            many => {
                connect_any(many).await?;
                Channel::balance_list(many.to_vec().into_iter())
            }
        };

        let token = match (&cfg.username, &cfg.password) {
            (Some(name), Some(password)) => Some(authenticate(channel.clone(), name, password).await?),
            _ => None,
        };
        let auth = AuthToken(token);

        info!(endpoints = ?cfg.endpoints, tls = tls.is_some(), auth = auth.0.is_some(), "connected to etcd");
        Ok(Self {
            kv: pb::kv_client::KvClient::with_interceptor(channel.clone(), auth.clone()),
            watch: pb::watch_client::WatchClient::with_interceptor(channel.clone(), auth.clone()),
            lease: pb::lease_client::LeaseClient::with_interceptor(channel, auth),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), CoordError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoordError::Closed);
        }
        Ok(())
    }
}

async fn load_tls(cfg: &StoreConfig) -> Result<Option<ClientTlsConfig>, CoordError> {
    let Some(path) = &cfg.ca_cert else {
        return Ok(None);
    };
    let pem = tokio::fs::read(path)
        .await
        .map_err(|e| CoordError::Config(format!("cannot read CA file {}: {e}", path.display())))?;

    let mut tls = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(pem));
    if let Some(name) = &cfg.server_name {
        tls = tls.domain_name(name.clone());
    }
    Ok(Some(tls))
}

/// Fail unless at least one endpoint accepts a connection.
async fn connect_any(endpoints: &[Endpoint]) -> Result<(), CoordError> {
    let mut last = None;
    for endpoint in endpoints {
        match endpoint.connect().await {
            Ok(_) => return Ok(()),
            Err(e) => {
                debug!(endpoint = %endpoint.uri(), error = %e, "store endpoint unreachable");
                last = Some(e);
            }
        }
    }
    match last {
        Some(e) => Err(e.into()),
        None => Err(CoordError::Config("no store endpoints configured".into())),
    }
}

async fn authenticate(channel: Channel, name: &str, password: &str) -> Result<AsciiMetadataValue, CoordError> {
    let mut client = pb::auth_client::AuthClient::new(channel);
    let response = client
        .authenticate(pb::AuthenticateRequest {
            name: name.to_string(),
            password: password.to_string(),
        })
        .await?
        .into_inner();

    response
        .token
        .parse()
        .map_err(|_| CoordError::Auth("store returned a token that is not valid metadata".into()))
}

fn range_bounds(range: &KeyRange) -> (Vec<u8>, Vec<u8>) {
    match range {
        KeyRange::Key(k) => (k.as_bytes().to_vec(), Vec::new()),
        KeyRange::Prefix(p) if p.is_empty() => (vec![0], vec![0]),
        KeyRange::Prefix(p) => (p.as_bytes().to_vec(), prefix_end(p.as_bytes())),
    }
}

fn range_request(range: &KeyRange, opts: RangeOptions) -> pb::RangeRequest {
    use pb::range_request::{SortOrder as PbOrder, SortTarget as PbTarget};

    let (key, range_end) = range_bounds(range);
    let (target, order) = match opts.sort {
        None => (PbTarget::Key, PbOrder::None),
        Some(SortTarget::Key) => (PbTarget::Key, PbOrder::Ascend),
        Some(SortTarget::CreateRevision) => (PbTarget::Create, PbOrder::Ascend),
    };

    pb::RangeRequest {
        key,
        range_end,
        limit: opts.limit,
        sort_order: order as i32,
        sort_target: target as i32,
        ..Default::default()
    }
}

fn delete_request(range: &KeyRange) -> pb::DeleteRangeRequest {
    let (key, range_end) = range_bounds(range);
    pb::DeleteRangeRequest {
        key,
        range_end,
        prev_kv: false,
    }
}

fn put_request(key: String, value: String, lease: i64) -> pb::PutRequest {
    pb::PutRequest {
        key: key.into_bytes(),
        value: value.into_bytes(),
        lease,
        prev_kv: true,
    }
}

fn from_pb(kv: pb::KeyValue) -> KeyValue {
    KeyValue {
        key: String::from_utf8_lossy(&kv.key).into_owned(),
        value: String::from_utf8_lossy(&kv.value).into_owned(),
        create_revision: kv.create_revision,
        mod_revision: kv.mod_revision,
        version: kv.version,
        lease: kv.lease,
    }
}

fn revision(header: Option<pb::ResponseHeader>) -> i64 {
    header.map_or(0, |h| h.revision)
}

fn compare_to_pb(c: crate::backend::Compare) -> pb::Compare {
    use pb::compare::{CompareResult, CompareTarget as PbTarget, TargetUnion};

    let result = match c.op {
        CompareOp::Equal => CompareResult::Equal,
        CompareOp::Greater => CompareResult::Greater,
    };
    let (target, union) = match c.target {
        CompareTarget::Version(v) => (PbTarget::Version, TargetUnion::Version(v)),
        CompareTarget::CreateRevision(r) => (PbTarget::Create, TargetUnion::CreateRevision(r)),
        CompareTarget::ModRevision(r) => (PbTarget::Mod, TargetUnion::ModRevision(r)),
        CompareTarget::Value(v) => (PbTarget::Value, TargetUnion::Value(v.into_bytes())),
    };

    pb::Compare {
        result: result as i32,
        target: target as i32,
        key: c.key.into_bytes(),
        range_end: Vec::new(),
        target_union: Some(union),
    }
}

fn op_to_pb(op: TxnOp) -> pb::RequestOp {
    use pb::request_op::Request;

    let request = match op {
        TxnOp::Put { key, value, lease } => Request::RequestPut(put_request(key, value, lease)),
        TxnOp::Delete(range) => Request::RequestDeleteRange(delete_request(&range)),
    };
    pb::RequestOp {
        request: Some(request),
    }
}

fn response_from_pb(op: pb::ResponseOp) -> Option<TxnOpResponse> {
    use pb::response_op::Response;

    match op.response? {
        Response::ResponsePut(r) => Some(TxnOpResponse::Put(PutOutcome {
            revision: revision(r.header),
            prev: r.prev_kv.map(from_pb),
        })),
        Response::ResponseDeleteRange(r) => Some(TxnOpResponse::Delete { deleted: r.deleted }),
        Response::ResponseRange(_) | Response::ResponseTxn(_) => None,
    }
}

fn lease_error(id: i64, status: tonic::Status) -> CoordError {
    if status.message().contains("lease not found") {
        CoordError::LeaseNotFound(id)
    } else {
        status.into()
    }
}

#[async_trait]
impl KvBackend for EtcdBackend {
    async fn range(&self, range: KeyRange, opts: RangeOptions) -> Result<Vec<KeyValue>, CoordError> {
        self.ensure_open()?;
        let response = self
            .kv
            .clone()
            .range(range_request(&range, opts))
            .await?
            .into_inner();
        Ok(response.kvs.into_iter().map(from_pb).collect())
    }

    async fn put(&self, key: String, value: String, lease: i64) -> Result<PutOutcome, CoordError> {
        self.ensure_open()?;
        let response = self
            .kv
            .clone()
            .put(put_request(key, value, lease))
            .await
            .map_err(|s| lease_error(lease, s))?
            .into_inner();
        Ok(PutOutcome {
            revision: revision(response.header),
            prev: response.prev_kv.map(from_pb),
        })
    }

    async fn delete(&self, range: KeyRange) -> Result<i64, CoordError> {
        self.ensure_open()?;
        let response = self
            .kv
            .clone()
            .delete_range(delete_request(&range))
            .await?
            .into_inner();
        Ok(response.deleted)
    }

    async fn txn(&self, txn: Txn) -> Result<TxnOutcome, CoordError> {
        self.ensure_open()?;
        let request = pb::TxnRequest {
            compare: txn.compare.into_iter().map(compare_to_pb).collect(),
            success: txn.success.into_iter().map(op_to_pb).collect(),
            failure: txn.failure.into_iter().map(op_to_pb).collect(),
        };
        let response = self.kv.clone().txn(request).await?.into_inner();

        Ok(TxnOutcome {
            succeeded: response.succeeded,
            revision: revision(response.header),
            responses: response
                .responses
                .into_iter()
                .filter_map(response_from_pb)
                .collect(),
        })
    }

    async fn watch(&self, range: KeyRange) -> Result<WatchStream, CoordError> {
        use pb::watch_request::RequestUnion;

        self.ensure_open()?;
        let (key, range_end) = range_bounds(&range);
        let (req_tx, req_rx) = mpsc::channel(1);
        req_tx
            .send(pb::WatchRequest {
                request_union: Some(RequestUnion::CreateRequest(pb::WatchCreateRequest {
                    key,
                    range_end,
                    ..Default::default()
                })),
            })
            .await
            .map_err(|_| CoordError::Closed)?;

        let mut inbound = self
            .watch
            .clone()
            .watch(ReceiverStream::new(req_rx))
            .await?
            .into_inner();

        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        tokio::spawn(async move {
            // Holding the request sender keeps the server-side watch open.
            let _requests = req_tx;
            loop {
                let response = match inbound.message().await {
                    Ok(Some(response)) => response,
                    Ok(None) => break,
                    Err(status) => {
                        let _ = tx.send(Err(status.into())).await;
                        break;
                    }
                };
                if response.canceled {
                    warn!(reason = %response.cancel_reason, compact_revision = response.compact_revision, "watch canceled by store");
                    let _ = tx
                        .send(Err(CoordError::Unavailable(format!(
                            "watch canceled: {}",
                            response.cancel_reason
                        ))))
                        .await;
                    break;
                }
                for event in response.events {
                    let kind = match pb::event::EventType::try_from(event.r#type) {
                        Ok(pb::event::EventType::Delete) => EventKind::Delete,
                        _ => EventKind::Put,
                    };
                    let Some(kv) = event.kv.map(from_pb) else {
                        continue;
                    };
                    let event = WatchEvent {
                        kind,
                        key: kv.key,
                        value: kv.value,
                        mod_revision: kv.mod_revision,
                    };
                    if tx.send(Ok(event)).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(WatchStream::new(ReceiverStream::new(rx)))
    }

    async fn lease_grant(&self, ttl: i64) -> Result<LeaseGrant, CoordError> {
        self.ensure_open()?;
        let response = self
            .lease
            .clone()
            .lease_grant(pb::LeaseGrantRequest { ttl, id: 0 })
            .await?
            .into_inner();
        if !response.error.is_empty() {
            return Err(CoordError::Unavailable(format!("lease grant: {}", response.error)));
        }
        Ok(LeaseGrant {
            id: response.id,
            ttl: response.ttl,
        })
    }

    async fn lease_revoke(&self, id: i64) -> Result<(), CoordError> {
        self.ensure_open()?;
        self.lease
            .clone()
            .lease_revoke(pb::LeaseRevokeRequest { id })
            .await
            .map_err(|s| lease_error(id, s))?;
        Ok(())
    }

    async fn lease_keep_alive(&self, id: i64) -> Result<i64, CoordError> {
        self.ensure_open()?;
        let mut responses = self
            .lease
            .clone()
            .lease_keep_alive(tokio_stream::iter(vec![pb::LeaseKeepAliveRequest { id }]))
            .await
            .map_err(|s| lease_error(id, s))?
            .into_inner();

        match responses.message().await.map_err(|s| lease_error(id, s))? {
            Some(response) if response.ttl > 0 => Ok(response.ttl),
            _ => Err(CoordError::LeaseNotFound(id)),
        }
    }

    async fn lease_time_to_live(&self, id: i64) -> Result<LeaseDetails, CoordError> {
        self.ensure_open()?;
        let response = self
            .lease
            .clone()
            .lease_time_to_live(pb::LeaseTimeToLiveRequest { id, keys: true })
            .await
            .map_err(|s| lease_error(id, s))?
            .into_inner();

        // etcd answers an unknown lease with TTL -1 instead of an error.
        if response.ttl < 0 {
            return Err(CoordError::LeaseNotFound(id));
        }
        Ok(LeaseDetails {
            id,
            ttl: response.ttl,
            granted_ttl: response.granted_ttl,
            keys: response
                .keys
                .iter()
                .map(|k| String::from_utf8_lossy(k).into_owned())
                .collect(),
        })
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("etcd backend closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Compare;

    #[test]
    fn prefix_range_uses_range_end() {
        let req = range_request(&KeyRange::Prefix("job/".into()), RangeOptions::default());
        assert_eq!(req.key, b"job/".to_vec());
        assert_eq!(req.range_end, b"job0".to_vec());
        assert_eq!(req.limit, 0);

        let req = range_request(&KeyRange::Key("job/status".into()), RangeOptions::default());
        assert!(req.range_end.is_empty());
    }

    #[test]
    fn sort_options_map_to_wire_enums() {
        let req = range_request(
            &KeyRange::Prefix("q/".into()),
            RangeOptions {
                limit: 1,
                sort: Some(SortTarget::CreateRevision),
            },
        );
        assert_eq!(req.sort_target, pb::range_request::SortTarget::Create as i32);
        assert_eq!(req.sort_order, pb::range_request::SortOrder::Ascend as i32);
        assert_eq!(req.limit, 1);
    }

    #[test]
    fn compare_maps_target_union() {
        let c = compare_to_pb(Compare::new(
            "k",
            CompareOp::Equal,
            CompareTarget::CreateRevision(0),
        ));
        assert_eq!(c.target, pb::compare::CompareTarget::Create as i32);
        assert_eq!(c.result, pb::compare::CompareResult::Equal as i32);
        assert_eq!(c.target_union, Some(pb::compare::TargetUnion::CreateRevision(0)));
    }

    #[test]
    fn auth_token_is_attached() {
        let mut with = AuthToken(Some("abc".parse().unwrap()));
        let request = with.call(Request::new(())).unwrap();
        assert_eq!(request.metadata().get("token").unwrap().to_str().unwrap(), "abc");

        let mut without = AuthToken::default();
        let request = without.call(Request::new(())).unwrap();
        assert!(request.metadata().get("token").is_none());
    }
}
