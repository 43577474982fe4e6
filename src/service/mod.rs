//! Backend language services
//! - mod.rs: Service and launcher contracts
//! - process.rs: Services running as child processes

pub mod process;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower_lsp::jsonrpc;
use tower_lsp::lsp_types::{
    CodeActionParams, CodeActionResponse, ColorInformation, ColorPresentation,
    ColorPresentationParams, CompletionParams, CompletionResponse, DidChangeTextDocumentParams,
    DidCloseTextDocumentParams, DidOpenTextDocumentParams, DidSaveTextDocumentParams,
    DocumentColorParams, DocumentHighlight, DocumentHighlightParams, DocumentSymbolParams,
    DocumentSymbolResponse, ExecuteCommandParams, FoldingRange, FoldingRangeParams, Hover,
    HoverParams, InitializeParams, InitializeResult, Url, WillSaveTextDocumentParams,
};

pub use process::ProcessLauncher;

use crate::error::ServiceError;
use crate::protocol::ServiceId;
use crate::protocol::extensions::{SymbolDetails, SymbolInfoParams};
use crate::rpc::InboundSink;
use crate::toolchain::{Language, Toolchain};

pub type RequestResult<T> = Result<T, jsonrpc::Error>;

/// One started backend serving a toolchain and language pair.
///
/// Document notifications are queued in call order. Requests take a token
/// whose cancellation is relayed to the backend; they report the backend's
/// own errors verbatim. Request methods default to `method_not_found` so a
/// backend only implements what it serves.
#[async_trait]
pub trait LanguageService: Send + Sync {
    fn id(&self) -> ServiceId;

    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult, ServiceError>;

    fn initialized(&self);

    fn open_document(&self, params: DidOpenTextDocumentParams);

    fn close_document(&self, params: DidCloseTextDocumentParams);

    fn change_document(&self, params: DidChangeTextDocumentParams);

    fn will_save_document(&self, params: WillSaveTextDocumentParams);

    fn did_save_document(&self, params: DidSaveTextDocumentParams);

    /// The build settings of an open document changed.
    fn document_updated_build_settings(&self, uri: &Url, language: &Language);

    async fn shutdown(&self);

    async fn completion(
        &self,
        _params: CompletionParams,
        _cancel: CancellationToken,
    ) -> RequestResult<Option<CompletionResponse>> {
        Err(jsonrpc::Error::method_not_found())
    }

    async fn hover(
        &self,
        _params: HoverParams,
        _cancel: CancellationToken,
    ) -> RequestResult<Option<Hover>> {
        Err(jsonrpc::Error::method_not_found())
    }

    async fn symbol_info(
        &self,
        _params: SymbolInfoParams,
        _cancel: CancellationToken,
    ) -> RequestResult<Option<Vec<SymbolDetails>>> {
        Err(jsonrpc::Error::method_not_found())
    }

    async fn document_highlight(
        &self,
        _params: DocumentHighlightParams,
        _cancel: CancellationToken,
    ) -> RequestResult<Option<Vec<DocumentHighlight>>> {
        Err(jsonrpc::Error::method_not_found())
    }

    async fn folding_range(
        &self,
        _params: FoldingRangeParams,
        _cancel: CancellationToken,
    ) -> RequestResult<Option<Vec<FoldingRange>>> {
        Err(jsonrpc::Error::method_not_found())
    }

    async fn document_symbol(
        &self,
        _params: DocumentSymbolParams,
        _cancel: CancellationToken,
    ) -> RequestResult<Option<DocumentSymbolResponse>> {
        Err(jsonrpc::Error::method_not_found())
    }

    async fn document_color(
        &self,
        _params: DocumentColorParams,
        _cancel: CancellationToken,
    ) -> RequestResult<Vec<ColorInformation>> {
        Err(jsonrpc::Error::method_not_found())
    }

    async fn color_presentation(
        &self,
        _params: ColorPresentationParams,
        _cancel: CancellationToken,
    ) -> RequestResult<Vec<ColorPresentation>> {
        Err(jsonrpc::Error::method_not_found())
    }

    async fn code_action(
        &self,
        _params: CodeActionParams,
        _cancel: CancellationToken,
    ) -> RequestResult<Option<CodeActionResponse>> {
        Err(jsonrpc::Error::method_not_found())
    }

    async fn execute_command(
        &self,
        _params: ExecuteCommandParams,
        _cancel: CancellationToken,
    ) -> RequestResult<Option<Value>> {
        Err(jsonrpc::Error::method_not_found())
    }
}

/// Starts backends. Launching only spawns the service; the caller performs
/// the handshake. Requests and notifications the backend sends go to
/// `inbound` tagged with `id`.
pub trait ServiceLauncher: Send + Sync {
    fn launch(
        &self,
        toolchain: &Toolchain,
        language: &Language,
        id: ServiceId,
        inbound: InboundSink,
    ) -> Result<Arc<dyn LanguageService>, ServiceError>;
}
