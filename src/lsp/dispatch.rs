//! Method-name routing table for inbound requests and notifications.

use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower_lsp::jsonrpc::{self, Id, Request, Response};
use tower_lsp::lsp_types::notification::Notification;
use tower_lsp::lsp_types::request::Request as LspRequest;
use tower_lsp::lsp_types::{
    CodeActionParams, ColorPresentationParams, CompletionParams, DocumentColorParams,
    DocumentHighlightParams, DocumentSymbolParams, FoldingRangeParams, GotoDefinitionParams,
    HoverParams, Url,
};
use tracing::{debug, warn};

use crate::cancellation::CancellationKey;
use crate::error::{request_cancelled, server_not_initialized, unknown_method};
use crate::lsp::state::{Event, ServerState};
use crate::protocol::Origin;
use crate::protocol::extensions::{ReferencesParams, SymbolInfoParams};
use crate::protocol::Message;
use crate::rpc::{Connection, Envelope};
use crate::service::LanguageService;

/// What a request handler hands back: an answer now, or a future resolved
/// off the queue whose answer is posted back to it.
pub enum Reply<T> {
    Now(Result<T, jsonrpc::Error>),
    Later(BoxFuture<'static, Result<T, jsonrpc::Error>>),
}

impl<T> Reply<T> {
    pub fn ok(value: T) -> Self {
        Reply::Now(Ok(value))
    }

    pub fn err(error: jsonrpc::Error) -> Self {
        Reply::Now(Err(error))
    }

    pub fn later<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, jsonrpc::Error>> + Send + 'static,
    {
        Reply::Later(future.boxed())
    }
}

/// Everything a request handler knows about the request besides its params.
#[derive(Clone)]
pub struct RequestContext {
    pub origin: Origin,
    pub id: Id,
    /// Fires when the sender cancels the request.
    pub cancel: CancellationToken,
    /// Connection the reply goes out on.
    pub peer: Connection,
}

/// Params of requests that target one document.
pub trait DocumentRequest {
    fn uri(&self) -> &Url;
}

macro_rules! document_request {
    ($($params:ty => |$p:ident| $uri:expr;)*) => {
        $(
            impl DocumentRequest for $params {
                fn uri(&self) -> &Url {
                    let $p = self;
                    &$uri
                }
            }
        )*
    };
}

document_request! {
    CompletionParams => |p| p.text_document_position.text_document.uri;
    HoverParams => |p| p.text_document_position_params.text_document.uri;
    SymbolInfoParams => |p| p.text_document.uri;
    DocumentHighlightParams => |p| p.text_document_position_params.text_document.uri;
    FoldingRangeParams => |p| p.text_document.uri;
    DocumentSymbolParams => |p| p.text_document.uri;
    DocumentColorParams => |p| p.text_document.uri;
    ColorPresentationParams => |p| p.text_document.uri;
    CodeActionParams => |p| p.text_document.uri;
    GotoDefinitionParams => |p| p.text_document_position_params.text_document.uri;
    ReferencesParams => |p| p.text_document_position.text_document.uri;
}

/// Type-erased request handler: decode params, run, encode the result.
trait RequestHandler: Send + Sync {
    fn handle(&self, state: &mut ServerState, cx: RequestContext, params: Option<Value>) -> Reply<Value>;
}

struct TypedRequest<R, F> {
    handler: F,
    _request: PhantomData<fn() -> R>,
}

impl<R, F> RequestHandler for TypedRequest<R, F>
where
    R: LspRequest,
    R::Params: DeserializeOwned,
    R::Result: Serialize + Send + 'static,
    F: Fn(&mut ServerState, RequestContext, R::Params) -> Reply<R::Result> + Send + Sync,
{
    fn handle(&self, state: &mut ServerState, cx: RequestContext, params: Option<Value>) -> Reply<Value> {
        let params = match decode_params::<R::Params>(R::METHOD, params) {
            Ok(params) => params,
            Err(e) => return Reply::err(e),
        };
        match (self.handler)(state, cx, params) {
            Reply::Now(result) => Reply::Now(result.and_then(encode_result)),
            Reply::Later(future) => Reply::later(async move { encode_result(future.await?) }),
        }
    }
}

type NotificationHandler =
    Box<dyn for<'a> Fn(&'a mut ServerState, Origin, Option<Value>) -> BoxFuture<'a, ()> + Send + Sync>;

fn notification_handler<F>(handler: F) -> NotificationHandler
where
    F: for<'a> Fn(&'a mut ServerState, Origin, Option<Value>) -> BoxFuture<'a, ()>
        + Send
        + Sync
        + 'static,
{
    Box::new(handler)
}

#[derive(Default)]
pub struct Dispatcher {
    requests: HashMap<&'static str, Box<dyn RequestHandler>>,
    notifications: HashMap<&'static str, NotificationHandler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `R`, with no preconditions.
    ///
    /// # Panics
    ///
    /// When `R::METHOD` already has a handler.
    pub fn register_request<R, F>(&mut self, handler: F)
    where
        R: LspRequest + 'static,
        R::Params: DeserializeOwned,
        R::Result: Serialize + Send + 'static,
        F: Fn(&mut ServerState, RequestContext, R::Params) -> Reply<R::Result>
            + Send
            + Sync
            + 'static,
    {
        let handler = TypedRequest::<R, F> {
            handler,
            _request: PhantomData,
        };
        if self.requests.insert(R::METHOD, Box::new(handler)).is_some() {
            panic!("request handler for {} registered twice", R::METHOD);
        }
    }

    /// Registers a handler that only runs once a workspace exists; earlier
    /// requests fail with "server not initialized".
    pub fn register_workspace_request<R, F>(&mut self, handler: F)
    where
        R: LspRequest + 'static,
        R::Params: DeserializeOwned,
        R::Result: Serialize + Send + 'static,
        F: Fn(&mut ServerState, RequestContext, R::Params) -> Reply<R::Result>
            + Send
            + Sync
            + 'static,
    {
        self.register_request::<R, _>(move |state: &mut ServerState, cx, params| {
            if state.workspace.is_none() {
                return Reply::err(server_not_initialized());
            }
            handler(state, cx, params)
        });
    }

    /// Registers a handler for a request on one document. It receives the
    /// document's service; documents without one get `fallback`.
    pub fn register_document_request<R, F>(&mut self, handler: F, fallback: R::Result)
    where
        R: LspRequest + 'static,
        R::Params: DocumentRequest + DeserializeOwned,
        R::Result: Clone + Serialize + Send + Sync + 'static,
        F: Fn(&mut ServerState, RequestContext, R::Params, Arc<dyn LanguageService>) -> Reply<R::Result>
            + Send
            + Sync
            + 'static,
    {
        self.register_workspace_request::<R, _>(move |state: &mut ServerState, cx, params| {
            let service = state
                .workspace
                .as_ref()
                .and_then(|workspace| workspace.document_service(params.uri()));
            match service {
                Some(service) => handler(state, cx, params, service),
                None => {
                    debug!("No service for {}, replying with fallback", params.uri());
                    Reply::ok(fallback.clone())
                }
            }
        });
    }

    /// Registers an async notification handler.
    ///
    /// # Panics
    ///
    /// When `N::METHOD` already has a handler.
    pub fn register_notification<N, F>(&mut self, handler: F)
    where
        N: Notification + 'static,
        N::Params: DeserializeOwned,
        F: for<'a> Fn(&'a mut ServerState, Origin, N::Params) -> BoxFuture<'a, ()>
            + Send
            + Sync
            + 'static,
    {
        let erased = notification_handler(move |state, origin, params| {
            match decode_params::<N::Params>(N::METHOD, params) {
                Ok(params) => handler(state, origin, params),
                Err(e) => {
                    warn!("Dropping {}: {}", N::METHOD, e.message);
                    futures::future::ready(()).boxed()
                }
            }
        });
        if self.notifications.insert(N::METHOD, erased).is_some() {
            panic!("notification handler for {} registered twice", N::METHOD);
        }
    }

    pub fn handles(&self, method: &str) -> bool {
        self.requests.contains_key(method) || self.notifications.contains_key(method)
    }

    pub async fn dispatch(&self, state: &mut ServerState, envelope: Envelope) {
        let Envelope {
            origin,
            message,
            peer,
        } = envelope;
        match message {
            Message::Request(request) => self.dispatch_request(state, origin, request, peer),
            Message::Notification(notification) => {
                self.dispatch_notification(state, origin, notification).await
            }
            Message::Response(response) => {
                peer.handle_response(response);
            }
        }
    }

    fn dispatch_request(
        &self,
        state: &mut ServerState,
        origin: Origin,
        request: Request,
        peer: Connection,
    ) {
        let (method, id, params) = request.into_parts();
        let Some(id) = id else {
            warn!("Request {} without id from {:?}", method, origin);
            return;
        };

        let key = CancellationKey::new(origin, id.clone());
        let cx = RequestContext {
            origin,
            id: id.clone(),
            cancel: state.cancellation.register(key.clone()),
            peer: peer.clone(),
        };
        let cancel = cx.cancel.clone();

        let reply = match self.requests.get(method.as_ref()) {
            Some(handler) => {
                debug!("Handling {} ({}) from {:?}", method, id, origin);
                handler.handle(state, cx, params)
            }
            None if origin.is_client() => Reply::err(unknown_method(&method)),
            None => forward_request(state, cx, method, params),
        };

        match reply {
            Reply::Now(result) => {
                state.cancellation.remove(&key);
                peer.respond(Response::from_parts(id, result));
            }
            Reply::Later(future) => {
                let events = state.events.clone();
                tokio::spawn(async move {
                    let result = match future.await {
                        Err(_) if cancel.is_cancelled() => Err(request_cancelled()),
                        result => result,
                    };
                    let response = Response::from_parts(id, result);
                    let _ = events.send(Event::Complete {
                        key,
                        peer,
                        response,
                    });
                });
            }
        }
    }

    async fn dispatch_notification(&self, state: &mut ServerState, origin: Origin, notification: Request) {
        let (method, _, params) = notification.into_parts();
        match self.notifications.get(method.as_ref()) {
            Some(handler) => {
                debug!("Handling {} from {:?}", method, origin);
                handler(state, origin, params).await
            }
            None if origin.is_client() => debug!("Dropping unhandled notification {}", method),
            None => {
                debug!("Forwarding {} from {:?} to the client", method, origin);
                state.client.notify(method, params);
            }
        }
    }
}

/// Relays a backend's request to the client. Cancelling the backend's
/// request cancels the relayed one.
fn forward_request(
    state: &mut ServerState,
    cx: RequestContext,
    method: Cow<'static, str>,
    params: Option<Value>,
) -> Reply<Value> {
    debug!("Forwarding {} ({}) from {:?} to the client", method, cx.id, cx.origin);
    let pending = state.client.request(method, params);
    let client = state.client.clone();
    Reply::later(async move {
        Ok(pending.wait_or_cancel(&client, &cx.cancel).await?)
    })
}

fn decode_params<P: DeserializeOwned>(method: &str, params: Option<Value>) -> Result<P, jsonrpc::Error> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| jsonrpc::Error::invalid_params(format!("Invalid params for {method}: {e}")))
}

fn encode_result<T: Serialize>(result: T) -> Result<Value, jsonrpc::Error> {
    serde_json::to_value(result).map_err(|e| jsonrpc::Error {
        code: jsonrpc::ErrorCode::InternalError,
        message: Cow::Owned(e.to_string()),
        data: None,
    })
}
