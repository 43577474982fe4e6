//! Shared helpers for the end-to-end tests: in-process backends, a launcher
//! handing them out, and a fake client driving the server's event loop.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_lsp::jsonrpc::{self, Id, Request, Response};
use tower_lsp::lsp_types::*;

use toolchain_lsp::config::Options;
use toolchain_lsp::error::ServiceError;
use toolchain_lsp::index::{
    IndexSymbol, IndexSymbolKind, MemoryIndex, NameMatch, SymbolIndex, SymbolLocation, SymbolOccurrence,
    SymbolRelation, SymbolRole,
};
use toolchain_lsp::lsp::server::{Server, ServerHandle};
use toolchain_lsp::protocol::extensions::{SymbolDetails, SymbolInfoParams};
use toolchain_lsp::protocol::{Message, Origin, ServiceId};
use toolchain_lsp::rpc::{Connection, Envelope, InboundSink};
use toolchain_lsp::service::{LanguageService, RequestResult, ServiceLauncher};
use toolchain_lsp::toolchain::{Language, Toolchain};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Backend answering from canned data and recording what it was sent.
pub struct MockService {
    pub id: ServiceId,
    pub language: Language,
    symbols: Vec<SymbolDetails>,
    completion: Option<CompletionOptions>,
    pub opened: Mutex<Vec<Url>>,
    pub closed: Mutex<Vec<Url>>,
    pub changes: AtomicUsize,
    pub build_settings_updates: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub executed: Mutex<Vec<ExecuteCommandParams>>,
}

#[async_trait]
impl LanguageService for MockService {
    fn id(&self) -> ServiceId {
        self.id
    }

    async fn initialize(&self, _params: InitializeParams) -> Result<InitializeResult, ServiceError> {
        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::INCREMENTAL,
                )),
                completion_provider: self.completion.clone(),
                ..Default::default()
            },
            server_info: None,
        })
    }

    fn initialized(&self) {}

    fn open_document(&self, params: DidOpenTextDocumentParams) {
        self.opened.lock().unwrap().push(params.text_document.uri);
    }

    fn close_document(&self, params: DidCloseTextDocumentParams) {
        self.closed.lock().unwrap().push(params.text_document.uri);
    }

    fn change_document(&self, _params: DidChangeTextDocumentParams) {
        self.changes.fetch_add(1, Ordering::SeqCst);
    }

    fn will_save_document(&self, _params: WillSaveTextDocumentParams) {}

    fn did_save_document(&self, _params: DidSaveTextDocumentParams) {}

    fn document_updated_build_settings(&self, _uri: &Url, _language: &Language) {
        self.build_settings_updates.fetch_add(1, Ordering::SeqCst);
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }

    /// Never answers on its own; only cancellation ends it.
    async fn completion(
        &self,
        _params: CompletionParams,
        cancel: CancellationToken,
    ) -> RequestResult<Option<CompletionResponse>> {
        cancel.cancelled().await;
        Err(jsonrpc::Error::internal_error())
    }

    async fn hover(&self, _params: HoverParams, _cancel: CancellationToken) -> RequestResult<Option<Hover>> {
        Ok(Some(Hover {
            contents: HoverContents::Markup(MarkupContent {
                kind: MarkupKind::Markdown,
                value: format!("hover from {}", self.id),
            }),
            range: None,
        }))
    }

    async fn symbol_info(
        &self,
        _params: SymbolInfoParams,
        _cancel: CancellationToken,
    ) -> RequestResult<Option<Vec<SymbolDetails>>> {
        Ok(Some(self.symbols.clone()))
    }

    async fn code_action(
        &self,
        _params: CodeActionParams,
        _cancel: CancellationToken,
    ) -> RequestResult<Option<CodeActionResponse>> {
        Ok(Some(vec![CodeActionOrCommand::Command(Command::new(
            "Fix it".to_string(),
            "swift.fixIt".to_string(),
            Some(vec![json!("arg")]),
        ))]))
    }

    async fn execute_command(
        &self,
        params: ExecuteCommandParams,
        _cancel: CancellationToken,
    ) -> RequestResult<Option<Value>> {
        self.executed.lock().unwrap().push(params);
        Ok(Some(json!("done")))
    }
}

/// Launches [`MockService`]s and keeps them for inspection.
#[derive(Default)]
pub struct MockLauncher {
    symbols: Vec<SymbolDetails>,
    completion: Option<CompletionOptions>,
    pub services: Mutex<Vec<Arc<MockService>>>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_symbols(mut self, symbols: Vec<SymbolDetails>) -> Self {
        self.symbols = symbols;
        self
    }

    pub fn with_completion(mut self) -> Self {
        self.completion = Some(CompletionOptions {
            trigger_characters: Some(vec![".".to_string()]),
            ..Default::default()
        });
        self
    }

    pub fn service(&self, index: usize) -> Arc<MockService> {
        self.services.lock().unwrap()[index].clone()
    }

    pub fn launched(&self) -> usize {
        self.services.lock().unwrap().len()
    }
}

impl ServiceLauncher for MockLauncher {
    fn launch(
        &self,
        _toolchain: &Toolchain,
        language: &Language,
        id: ServiceId,
        _inbound: InboundSink,
    ) -> Result<Arc<dyn LanguageService>, ServiceError> {
        let service = Arc::new(MockService {
            id,
            language: language.clone(),
            symbols: self.symbols.clone(),
            completion: self.completion.clone(),
            opened: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
            changes: AtomicUsize::new(0),
            build_settings_updates: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
        });
        self.services.lock().unwrap().push(service.clone());
        Ok(service)
    }
}

/// Drives a server running on its own task, playing the client.
pub struct TestClient {
    pub handle: ServerHandle,
    /// The server's connection to us.
    pub connection: Connection,
    outgoing: mpsc::UnboundedReceiver<Message>,
    pub server: JoinHandle<bool>,
}

pub fn swift_toolchain() -> Toolchain {
    Toolchain::new("swift")
        .with_sourcekit("/swift/usr/bin/sourcekit-lsp")
        .with_clangd("/swift/usr/bin/clangd")
}

pub fn start_server(launcher: Arc<MockLauncher>, index: Option<Arc<dyn SymbolIndex>>) -> TestClient {
    let (connection, outgoing) = Connection::new("client");
    let options = Options {
        toolchains: vec![swift_toolchain()],
        ..Default::default()
    };
    let mut builder = Server::build(connection.clone(), &options).launcher(launcher);
    if let Some(index) = index {
        builder = builder.index(index);
    }
    let (server, handle) = builder.finish();
    TestClient {
        handle,
        connection,
        outgoing,
        server: tokio::spawn(server.run()),
    }
}

impl TestClient {
    pub fn send_request(&self, request: Request) {
        self.handle.send(Envelope::new(
            Origin::Client,
            Message::Request(request),
            self.connection.clone(),
        ));
    }

    pub fn send_notification(&self, notification: Request) {
        self.handle.send(Envelope::new(
            Origin::Client,
            Message::Notification(notification),
            self.connection.clone(),
        ));
    }

    /// Sends `request` and waits for its response, skipping anything else.
    pub async fn request(&mut self, request: Request) -> Response {
        let id = request.id().cloned().expect("request without id");
        self.send_request(request);
        loop {
            if let Message::Response(response) = self.next_message().await
                && response.id() == &id
            {
                return response;
            }
        }
    }

    pub async fn next_message(&mut self) -> Message {
        tokio::time::timeout(TIMEOUT, self.outgoing.recv())
            .await
            .expect("timed out waiting for the server")
            .expect("server connection closed")
    }

    /// Waits for a request from the server to the client.
    pub async fn wait_for_request(&mut self, method: &str) -> Request {
        loop {
            if let Message::Request(request) = self.next_message().await
                && request.method() == method
            {
                return request;
            }
        }
    }

    pub async fn wait_for_notification(&mut self, method: &str) -> Request {
        loop {
            if let Message::Notification(notification) = self.next_message().await
                && notification.method() == method
            {
                return notification;
            }
        }
    }

    /// Nothing more arrives within a short grace period.
    pub async fn assert_quiet(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(100), self.outgoing.recv()).await;
        assert!(next.is_err(), "unexpected message: {:?}", next);
    }

    /// Answers a request the server sent to the client.
    pub fn reply(&self, request: &Request, result: Result<Value, jsonrpc::Error>) {
        let id = request.id().cloned().expect("request without id");
        self.connection
            .handle_response(Response::from_parts(id, result));
    }

    /// Returns once every message sent so far has been handled. The event
    /// loop runs in order, and unknown client methods are answered at once.
    pub async fn sync(&mut self) {
        self.request(create_request(9_999, "test/sync", Value::Null))
            .await;
    }

    pub async fn initialize(&mut self, capabilities: ClientCapabilities) -> Response {
        let response = self
            .request(create_initialize_request(1, capabilities))
            .await;
        self.send_notification(create_initialized_notification());
        response
    }

    pub async fn open(&mut self, uri: &str, language_id: &str) {
        self.send_notification(create_did_open_notification(uri, language_id));
        self.sync().await;
    }
}

/// A backend's side of a connection, for messages the server forwards to it.
pub struct TestService {
    pub id: ServiceId,
    pub connection: Connection,
    outgoing: mpsc::UnboundedReceiver<Message>,
}

impl TestService {
    pub fn new(id: ServiceId) -> Self {
        let (connection, outgoing) = Connection::new(format!("{id}"));
        Self {
            id,
            connection,
            outgoing,
        }
    }

    pub fn send_request(&self, client: &TestClient, request: Request) {
        client.handle.send(Envelope::new(
            Origin::Service(self.id),
            Message::Request(request),
            self.connection.clone(),
        ));
    }

    pub fn send_notification(&self, client: &TestClient, notification: Request) {
        client.handle.send(Envelope::new(
            Origin::Service(self.id),
            Message::Notification(notification),
            self.connection.clone(),
        ));
    }

    pub async fn next_message(&mut self) -> Message {
        tokio::time::timeout(TIMEOUT, self.outgoing.recv())
            .await
            .expect("timed out waiting for the server")
            .expect("server connection closed")
    }
}

pub fn create_request(id: i64, method: &'static str, params: Value) -> Request {
    Request::build(method)
        .id(Id::Number(id))
        .params(params)
        .finish()
}

pub fn create_notification(method: &'static str, params: Value) -> Request {
    Request::build(method).params(params).finish()
}

pub fn create_initialize_request(id: i64, capabilities: ClientCapabilities) -> Request {
    create_request(
        id,
        "initialize",
        json!({
            "processId": null,
            "rootUri": "file:///workspace",
            "capabilities": capabilities,
        }),
    )
}

pub fn create_initialized_notification() -> Request {
    create_notification("initialized", json!({}))
}

pub fn create_did_open_notification(uri: &str, language_id: &str) -> Request {
    create_notification(
        "textDocument/didOpen",
        json!({
            "textDocument": {
                "uri": uri,
                "languageId": language_id,
                "version": 1,
                "text": "",
            }
        }),
    )
}

pub fn position_params(uri: &str, line: u32, character: u32) -> Value {
    json!({
        "textDocument": { "uri": uri },
        "position": { "line": line, "character": character },
    })
}

pub fn dynamic_completion_capabilities() -> ClientCapabilities {
    ClientCapabilities {
        text_document: Some(TextDocumentClientCapabilities {
            completion: Some(CompletionClientCapabilities {
                dynamic_registration: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn work_done_progress_capabilities() -> ClientCapabilities {
    ClientCapabilities {
        window: Some(WindowClientCapabilities {
            work_done_progress: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn occurrence(usr: &str, name: &str, roles: SymbolRole, path: &str, line: u32, column: u32) -> SymbolOccurrence {
    SymbolOccurrence {
        symbol: IndexSymbol {
            usr: usr.to_string(),
            name: name.to_string(),
            kind: IndexSymbolKind::Function,
        },
        location: SymbolLocation {
            path: path.to_string(),
            is_system: false,
            line,
            utf8_column: column,
        },
        roles,
        relations: Vec::new(),
    }
}

pub fn child_of(mut occurrence: SymbolOccurrence, container: &str) -> SymbolOccurrence {
    occurrence.relations.push(SymbolRelation {
        roles: SymbolRole::CHILD_OF,
        symbol: IndexSymbol {
            usr: format!("c:{container}"),
            name: container.to_string(),
            kind: IndexSymbolKind::Class,
        },
    });
    occurrence
}

pub fn index(occurrences: Vec<SymbolOccurrence>) -> Arc<dyn SymbolIndex> {
    Arc::new(MemoryIndex::new(occurrences))
}

/// Index whose unit polls block until released. Counts the polls started.
#[derive(Default)]
pub struct GatedIndex {
    pub polls: AtomicUsize,
    released: Mutex<bool>,
    gate: Condvar,
}

impl GatedIndex {
    pub fn release(&self) {
        *self.released.lock().unwrap() = true;
        self.gate.notify_all();
    }

    pub async fn wait_for_polls(&self, count: usize) {
        tokio::time::timeout(TIMEOUT, async {
            while self.polls.load(Ordering::SeqCst) < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for unit polls");
    }
}

impl SymbolIndex for GatedIndex {
    fn canonical_occurrences_matching(&self, _: &str, _: NameMatch) -> Vec<SymbolOccurrence> {
        Vec::new()
    }

    fn occurrences_of_usr(&self, _: &str, _: SymbolRole) -> Vec<SymbolOccurrence> {
        Vec::new()
    }

    fn occurrences_related_to_usr(&self, _: &str, _: SymbolRole) -> Vec<SymbolOccurrence> {
        Vec::new()
    }

    fn poll_for_unit_changes_and_wait(&self) {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let mut released = self.released.lock().unwrap();
        while !*released {
            released = self.gate.wait(released).unwrap();
        }
    }
}

pub fn symbol_details(usr: Option<&str>, local: &str) -> SymbolDetails {
    SymbolDetails {
        name: Some("foo".to_string()),
        usr: usr.map(str::to_string),
        best_local_declaration: Some(Location::new(
            Url::parse(local).unwrap(),
            Range::new(Position::new(0, 0), Position::new(0, 3)),
        )),
        ..Default::default()
    }
}

pub fn locations(response: &Response) -> Vec<Location> {
    serde_json::from_value(response.result().cloned().unwrap_or(Value::Null)).unwrap()
}
