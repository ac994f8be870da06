//! Id-addressed op dispatch for a message-driven front end.
//!
//! Every dispatched request produces exactly one `Completion` on the
//! completion channel: its result, its error, or `Cancelled`. A cancel that
//! loses the race against completion is a no-op.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};

use crate::error::{NetError, NetResult};
use crate::ops::types::{connect_target, Completion, OpRequest, OpValue, Outcome};
use crate::ops::NetOps;

/// A request plus its id and optional per-op timeout.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpEnvelope {
    pub id: u64,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(flatten)]
    pub request: OpRequest,
}

/// One inbound line.
#[derive(Debug, Clone)]
pub enum Inbound {
    Op(OpEnvelope),
    Cancel(u64),
}

/// Parse one inbound JSON message. On failure, returns the id if one could
/// be read so the error can still be addressed.
pub fn parse_inbound(line: &str) -> Result<Inbound, (Option<u64>, NetError)> {
    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| (None, NetError::invalid_argument(format!("malformed request: {e}"))))?;
    if let Some(cancel) = value.get("cancel") {
        return cancel
            .as_u64()
            .map(Inbound::Cancel)
            .ok_or_else(|| (None, NetError::invalid_argument("cancel expects an op id")));
    }
    let id = value.get("id").and_then(|id| id.as_u64());
    serde_json::from_value(value)
        .map(Inbound::Op)
        .map_err(|e| (id, NetError::invalid_argument(format!("invalid request: {e}"))))
}

/// Cancel channel of one dispatched op, tagged with the dispatch it belongs
/// to so a reused id never touches an earlier op's entry.
struct InFlight {
    dispatch: u64,
    cancel: oneshot::Sender<()>,
}

/// Routes requests to `NetOps` and reports completions by id.
pub struct Dispatcher {
    ops: NetOps,
    inflight: Arc<DashMap<u64, InFlight>>,
    dispatches: AtomicU64,
    completions: mpsc::UnboundedSender<Completion>,
}

impl Dispatcher {
    pub fn new(ops: NetOps) -> (Self, mpsc::UnboundedReceiver<Completion>) {
        let (completions, rx) = mpsc::unbounded_channel();
        (
            Self {
                ops,
                inflight: Arc::new(DashMap::new()),
                dispatches: AtomicU64::new(0),
                completions,
            },
            rx,
        )
    }

    pub fn ops(&self) -> &NetOps {
        &self.ops
    }

    /// Number of ops still waiting for completion.
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    /// Submit a request. The op is issued before this returns, so requests
    /// against one resource keep their submission order.
    pub fn dispatch(&self, envelope: OpEnvelope) {
        let OpEnvelope {
            id,
            timeout_ms,
            request,
        } = envelope;
        let op = request.name();

        let (cancel, cancel_rx) = oneshot::channel();
        let dispatch = self.dispatches.fetch_add(1, Ordering::Relaxed);
        match self.inflight.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                self.complete(
                    id,
                    Err(NetError::invalid_argument(format!("op id {id} is already in flight"))),
                );
                return;
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(InFlight { dispatch, cancel });
            }
        }

        let ops = match timeout_ms {
            Some(ms) => self.ops.with_timeout(Duration::from_millis(ms)),
            None => self.ops.clone(),
        };
        tracing::debug!(id, op, "Dispatching op");
        let pending = start(&ops, request);

        let inflight = Arc::clone(&self.inflight);
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                result = pending => result,
                _ = cancel_rx => Err(NetError::cancelled(op)),
            };
            inflight.remove_if(&id, |_, entry| entry.dispatch == dispatch);
            let _ = completions.send(Completion {
                id: Some(id),
                outcome: Outcome::from(result),
            });
        });
    }

    /// Cancel an in-flight op. Returns false if it already completed or
    /// was never dispatched.
    pub fn cancel(&self, id: u64) -> bool {
        match self.inflight.remove(&id) {
            Some((_, entry)) => {
                tracing::debug!(id, "Cancelling op");
                entry.cancel.send(()).is_ok()
            }
            None => false,
        }
    }

    /// Report a request that never became an op.
    pub fn reject(&self, id: Option<u64>, err: NetError) {
        let _ = self.completions.send(Completion {
            id,
            outcome: Outcome::from(Err(err)),
        });
    }

    fn complete(&self, id: u64, result: NetResult<OpValue>) {
        let _ = self.completions.send(Completion {
            id: Some(id),
            outcome: Outcome::from(result),
        });
    }
}

/// Issue `request` on `ops` and adapt the result to an `OpValue`.
fn start(ops: &NetOps, request: OpRequest) -> BoxFuture<'static, NetResult<OpValue>> {
    match request {
        OpRequest::Resolve { host, port, family } => ops
            .resolve(&host, port, family)
            .map(|r| r.map(OpValue::Candidates))
            .boxed(),
        OpRequest::Listen {
            kind,
            local_addr,
            backlog,
        } => ops
            .listen(kind, &local_addr, backlog)
            .map(|r| r.map(|handle| OpValue::Handle { handle }))
            .boxed(),
        OpRequest::Accept { handle } => ops
            .accept(handle)
            .map(|r| r.map(|(handle, remote_addr)| OpValue::Accepted { handle, remote_addr }))
            .boxed(),
        OpRequest::Connect {
            candidates,
            host,
            port,
            family,
            path,
        } => match connect_target(candidates, host, port, family, path) {
            Ok(target) => ops
                .connect(target)
                .map(|r| r.map(|handle| OpValue::Handle { handle }))
                .boxed(),
            Err(e) => future::ready(Err(e)).boxed(),
        },
        OpRequest::Read { handle, max_len } => ops
            .read(handle, max_len)
            .map(|r| r.map(OpValue::Read))
            .boxed(),
        OpRequest::Write { handle, data } => ops
            .write(handle, data.into_bytes())
            .map(|r| r.map(|written| OpValue::Written { written }))
            .boxed(),
        OpRequest::Shutdown { handle, half } => ops
            .shutdown(handle, half)
            .map(|r| r.map(|()| OpValue::Done))
            .boxed(),
        OpRequest::SetOption {
            handle,
            option,
            value,
        } => ops
            .set_option_value(handle, &option, &value)
            .map(|r| r.map(|()| OpValue::Done))
            .boxed(),
        OpRequest::SendTo { handle, data, addr } => ops
            .send_to(handle, data.into_bytes(), addr)
            .map(|r| r.map(|written| OpValue::Written { written }))
            .boxed(),
        OpRequest::ReceiveFrom { handle, max_len } => ops
            .receive_from(handle, max_len)
            .map(|r| r.map(|(data, from)| OpValue::Received { data, from }))
            .boxed(),
        OpRequest::TlsUpgrade {
            handle,
            role,
            config,
        } => ops
            .tls_upgrade(handle, role, config)
            .map(|r| r.map(|handle| OpValue::Handle { handle }))
            .boxed(),
        OpRequest::TlsInfo { handle } => {
            future::ready(ops.tls_info(handle).map(OpValue::TlsInfo)).boxed()
        }
        OpRequest::LocalAddr { handle } => {
            future::ready(ops.local_addr(handle).map(|addr| OpValue::Address { addr })).boxed()
        }
        OpRequest::PeerAddr { handle } => {
            future::ready(ops.peer_addr(handle).map(|addr| OpValue::Address { addr })).boxed()
        }
        OpRequest::Close { handle } => {
            future::ready(ops.close(handle).map(|()| OpValue::Done)).boxed()
        }
        OpRequest::CloseAll => {
            let closed = ops.close_all();
            future::ready(Ok(OpValue::Closed { closed })).boxed()
        }
    }
}
