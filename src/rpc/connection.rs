//! Outbound side of a JSON-RPC peer: sends messages and matches responses
//! to the requests that are waiting for them.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tower_lsp::jsonrpc::{self, Id, Request, Response};
use tower_lsp::lsp_types::notification::{Cancel, Notification};
use tower_lsp::lsp_types::request::Request as LspRequest;
use tracing::{debug, warn};

use crate::error::ServiceError;
use crate::protocol::Message;

type ResponseSender = oneshot::Sender<Result<Value, jsonrpc::Error>>;

/// Handle for talking to one peer. Cloning shares the pending table.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    name: String,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Mutex<HashMap<Id, ResponseSender>>,
    next_id: AtomicI64,
}

/// A request that was sent and whose response has not arrived yet.
pub struct PendingResponse {
    id: Id,
    rx: oneshot::Receiver<Result<Value, jsonrpc::Error>>,
}

impl PendingResponse {
    pub fn id(&self) -> &Id {
        &self.id
    }

    pub async fn wait(self) -> Result<Value, ServiceError> {
        match self.rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(ServiceError::Response(error)),
            Err(_) => Err(ServiceError::Disconnected),
        }
    }

    /// Waits for the response; if `cancel` fires first, asks the peer to
    /// cancel and keeps waiting for whatever it answers.
    pub async fn wait_or_cancel(
        self,
        connection: &Connection,
        cancel: &CancellationToken,
    ) -> Result<Value, ServiceError> {
        let id = self.id.clone();
        let response = self.wait();
        tokio::pin!(response);

        tokio::select! {
            result = &mut response => result,
            _ = cancel.cancelled() => {
                connection.cancel_request(&id);
                response.await
            }
        }
    }
}

impl Connection {
    /// Creates a connection and the receiver its outgoing messages land in.
    pub fn new(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (outgoing, rx) = mpsc::unbounded_channel();
        let connection = Self {
            inner: Arc::new(ConnectionInner {
                name: name.into(),
                outgoing,
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicI64::new(1),
            }),
        };
        (connection, rx)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn notify(&self, method: impl Into<Cow<'static, str>>, params: Option<Value>) {
        let mut builder = Request::build(method);
        if let Some(params) = params {
            builder = builder.params(params);
        }
        self.send(Message::Notification(builder.finish()));
    }

    pub fn notify_typed<N: Notification>(&self, params: N::Params) {
        match encode_params(&params) {
            Ok(params) => self.notify(N::METHOD, params),
            Err(e) => warn!("Failed to encode {} for {}: {}", N::METHOD, self.name(), e),
        }
    }

    pub fn request(
        &self,
        method: impl Into<Cow<'static, str>>,
        params: Option<Value>,
    ) -> PendingResponse {
        let id = Id::Number(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending().insert(id.clone(), tx);

        let mut builder = Request::build(method).id(id.clone());
        if let Some(params) = params {
            builder = builder.params(params);
        }
        if !self.send(Message::Request(builder.finish())) {
            self.pending().remove(&id);
        }

        PendingResponse { id, rx }
    }

    /// Sends a typed request and decodes its result. Cancelling `cancel`
    /// forwards a `$/cancelRequest` to the peer.
    pub async fn call<R>(
        &self,
        params: R::Params,
        cancel: Option<&CancellationToken>,
    ) -> Result<R::Result, ServiceError>
    where
        R: LspRequest,
    {
        let pending = self.request(R::METHOD, encode_params(&params)?);
        let value = match cancel {
            Some(cancel) => pending.wait_or_cancel(self, cancel).await?,
            None => pending.wait().await?,
        };
        Ok(serde_json::from_value(value)?)
    }

    pub fn cancel_request(&self, id: &Id) {
        debug!("Cancelling request {} on {}", id, self.name());
        self.notify(Cancel::METHOD, Some(json!({ "id": id })));
    }

    pub fn respond(&self, response: Response) {
        self.send(Message::Response(response));
    }

    /// Completes the request `response` answers. Returns false for
    /// responses nobody is waiting for.
    pub fn handle_response(&self, response: Response) -> bool {
        let (id, result) = response.into_parts();
        match self.pending().remove(&id) {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => {
                warn!("Unexpected response {} from {}", id, self.name());
                false
            }
        }
    }

    /// Fails every pending request, e.g. after the peer went away.
    pub fn close(&self) {
        let dropped = self.pending().drain().count();
        if dropped > 0 {
            debug!("Dropped {} pending requests on {}", dropped, self.name());
        }
    }

    fn send(&self, message: Message) -> bool {
        if self.inner.outgoing.send(message).is_err() {
            debug!("Connection {} is closed", self.name());
            return false;
        }
        true
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<Id, ResponseSender>> {
        self.inner.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Unit params are omitted rather than sent as `null`.
fn encode_params<P: serde::Serialize>(params: &P) -> Result<Option<Value>, serde_json::Error> {
    let value = serde_json::to_value(params)?;
    Ok((!value.is_null()).then_some(value))
}
