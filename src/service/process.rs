use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::BufReader;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::notification::{
    DidChangeTextDocument, DidCloseTextDocument, DidOpenTextDocument, DidSaveTextDocument, Exit,
    Initialized, WillSaveTextDocument,
};
use tower_lsp::lsp_types::request::{
    CodeActionRequest, ColorPresentationRequest, Completion, DocumentColor,
    DocumentHighlightRequest, DocumentSymbolRequest, ExecuteCommand, FoldingRangeRequest,
    HoverRequest, Initialize, Request, Shutdown,
};
use tower_lsp::lsp_types::{
    CodeActionParams, CodeActionResponse, ColorInformation, ColorPresentation,
    ColorPresentationParams, CompletionParams, CompletionResponse, DidChangeTextDocumentParams,
    DidCloseTextDocumentParams, DidOpenTextDocumentParams, DidSaveTextDocumentParams,
    DocumentColorParams, DocumentHighlight, DocumentHighlightParams, DocumentSymbolParams,
    DocumentSymbolResponse, ExecuteCommandParams, FoldingRange, FoldingRangeParams, Hover,
    HoverParams, InitializeParams, InitializeResult, InitializedParams, Url,
    WillSaveTextDocumentParams,
};
use tracing::{debug, info, warn};

use crate::error::ServiceError;
use crate::protocol::extensions::{SymbolDetails, SymbolInfo, SymbolInfoParams};
use crate::protocol::{Origin, ServiceId};
use crate::rpc::{self, Connection, InboundSink};
use crate::service::{LanguageService, RequestResult, ServiceLauncher};
use crate::toolchain::{Language, ServiceKind, Toolchain};

/// Launches the toolchain's service binary for the language as a child
/// process speaking JSON-RPC over stdio.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    clangd_args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(clangd_args: Vec<String>) -> Self {
        Self { clangd_args }
    }

    fn args(&self, kind: ServiceKind) -> &[String] {
        match kind {
            ServiceKind::SourceKit => &[],
            ServiceKind::Clangd => &self.clangd_args,
        }
    }
}

impl ServiceLauncher for ProcessLauncher {
    fn launch(
        &self,
        toolchain: &Toolchain,
        language: &Language,
        id: ServiceId,
        inbound: InboundSink,
    ) -> Result<Arc<dyn LanguageService>, ServiceError> {
        let no_service = || ServiceError::NoService {
            toolchain: toolchain.identifier.clone(),
            language: language.to_string(),
        };
        let kind = language.service_kind().ok_or_else(no_service)?;
        let binary = toolchain.service_binary(kind).ok_or_else(no_service)?;

        let service = ProcessService::spawn(id, binary.to_path_buf(), self.args(kind), inbound)?;
        Ok(Arc::new(service))
    }
}

/// A backend running as a child process. The process is killed when the
/// service is dropped.
pub struct ProcessService {
    id: ServiceId,
    connection: Connection,
    _child: Mutex<Child>,
}

impl ProcessService {
    pub fn spawn(
        id: ServiceId,
        binary: PathBuf,
        args: &[String],
        inbound: InboundSink,
    ) -> Result<Self, ServiceError> {
        info!("Starting {:?} {:?} as {}", binary, args, id);
        let mut child = Command::new(&binary)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ServiceError::Launch {
                binary: binary.display().to_string(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ServiceError::Handshake("failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ServiceError::Handshake("failed to capture stdout".to_string()))?;

        let (connection, outgoing) = Connection::new(format!("{} ({})", id, binary.display()));
        rpc::spawn_writer(stdin, outgoing);
        rpc::spawn_reader(
            BufReader::new(stdout),
            connection.clone(),
            Origin::Service(id),
            inbound,
            move || warn!("Backend {} exited", id),
        );

        Ok(Self {
            id,
            connection,
            _child: Mutex::new(child),
        })
    }

    async fn call<R: Request>(
        &self,
        params: R::Params,
        cancel: CancellationToken,
    ) -> RequestResult<R::Result> {
        Ok(self.connection.call::<R>(params, Some(&cancel)).await?)
    }
}

#[async_trait]
impl LanguageService for ProcessService {
    fn id(&self) -> ServiceId {
        self.id
    }

    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult, ServiceError> {
        self.connection.call::<Initialize>(params, None).await
    }

    fn initialized(&self) {
        self.connection
            .notify_typed::<Initialized>(InitializedParams {});
    }

    fn open_document(&self, params: DidOpenTextDocumentParams) {
        self.connection.notify_typed::<DidOpenTextDocument>(params);
    }

    fn close_document(&self, params: DidCloseTextDocumentParams) {
        self.connection.notify_typed::<DidCloseTextDocument>(params);
    }

    fn change_document(&self, params: DidChangeTextDocumentParams) {
        self.connection.notify_typed::<DidChangeTextDocument>(params);
    }

    fn will_save_document(&self, params: WillSaveTextDocumentParams) {
        self.connection.notify_typed::<WillSaveTextDocument>(params);
    }

    fn did_save_document(&self, params: DidSaveTextDocumentParams) {
        self.connection.notify_typed::<DidSaveTextDocument>(params);
    }

    fn document_updated_build_settings(&self, uri: &Url, language: &Language) {
        // Process backends read build settings themselves.
        debug!("Build settings changed for {} ({}) on {}", uri, language, self.id);
    }

    async fn shutdown(&self) {
        if let Err(e) = self.connection.call::<Shutdown>((), None).await {
            warn!("Backend {} failed to shut down: {}", self.id, e);
        }
        self.connection.notify_typed::<Exit>(());
    }

    async fn completion(
        &self,
        params: CompletionParams,
        cancel: CancellationToken,
    ) -> RequestResult<Option<CompletionResponse>> {
        self.call::<Completion>(params, cancel).await
    }

    async fn hover(
        &self,
        params: HoverParams,
        cancel: CancellationToken,
    ) -> RequestResult<Option<Hover>> {
        self.call::<HoverRequest>(params, cancel).await
    }

    async fn symbol_info(
        &self,
        params: SymbolInfoParams,
        cancel: CancellationToken,
    ) -> RequestResult<Option<Vec<SymbolDetails>>> {
        self.call::<SymbolInfo>(params, cancel).await
    }

    async fn document_highlight(
        &self,
        params: DocumentHighlightParams,
        cancel: CancellationToken,
    ) -> RequestResult<Option<Vec<DocumentHighlight>>> {
        self.call::<DocumentHighlightRequest>(params, cancel).await
    }

    async fn folding_range(
        &self,
        params: FoldingRangeParams,
        cancel: CancellationToken,
    ) -> RequestResult<Option<Vec<FoldingRange>>> {
        self.call::<FoldingRangeRequest>(params, cancel).await
    }

    async fn document_symbol(
        &self,
        params: DocumentSymbolParams,
        cancel: CancellationToken,
    ) -> RequestResult<Option<DocumentSymbolResponse>> {
        self.call::<DocumentSymbolRequest>(params, cancel).await
    }

    async fn document_color(
        &self,
        params: DocumentColorParams,
        cancel: CancellationToken,
    ) -> RequestResult<Vec<ColorInformation>> {
        self.call::<DocumentColor>(params, cancel).await
    }

    async fn color_presentation(
        &self,
        params: ColorPresentationParams,
        cancel: CancellationToken,
    ) -> RequestResult<Vec<ColorPresentation>> {
        self.call::<ColorPresentationRequest>(params, cancel).await
    }

    async fn code_action(
        &self,
        params: CodeActionParams,
        cancel: CancellationToken,
    ) -> RequestResult<Option<CodeActionResponse>> {
        self.call::<CodeActionRequest>(params, cancel).await
    }

    async fn execute_command(
        &self,
        params: ExecuteCommandParams,
        cancel: CancellationToken,
    ) -> RequestResult<Option<Value>> {
        self.call::<ExecuteCommand>(params, cancel).await
    }
}
