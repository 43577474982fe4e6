//! Request and notification handlers, and the table that routes to them.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use serde_json::{Value, json};
use tower_lsp::jsonrpc::{self, Id};
use tower_lsp::lsp_types::notification::{
    Cancel, DidChangeTextDocument, DidCloseTextDocument, DidOpenTextDocument, DidSaveTextDocument,
    Exit, Initialized, Progress, WillSaveTextDocument, WorkDoneProgressCancel,
};
use tower_lsp::lsp_types::request::{
    CodeActionRequest, ColorPresentationRequest, Completion, DocumentColor,
    DocumentHighlightRequest, DocumentSymbolRequest, ExecuteCommand, FoldingRangeRequest,
    GotoDefinition, GotoImplementation, HoverRequest, Initialize, Request, Shutdown,
    WorkDoneProgressCreate, WorkspaceSymbolRequest,
};
use tower_lsp::lsp_types::{
    CancelParams, CodeActionOrCommand, CodeActionProviderCapability, CodeActionResponse,
    ColorProviderCapability, Command, CompletionList, CompletionOptions, CompletionResponse, DidChangeTextDocumentParams,
    DidCloseTextDocumentParams, DidOpenTextDocumentParams, DidSaveTextDocumentParams,
    ExecuteCommandOptions, FoldingRangeProviderCapability, GotoDefinitionResponse,
    HoverProviderCapability, ImplementationProviderCapability, InitializeParams,
    InitializeResult, InitializedParams, NumberOrString, OneOf, ProgressParams,
    ProgressParamsValue, SaveOptions, ServerCapabilities, ServerInfo, TextDocumentIdentifier,
    TextDocumentSyncCapability, TextDocumentSyncKind, TextDocumentSyncOptions,
    TextDocumentSyncSaveOptions, Url, WillSaveTextDocumentParams, WorkDoneProgressCancelParams,
    WorkDoneProgressCreateParams, WorkspaceSymbolResponse,
};
use tracing::{debug, info, warn};

use crate::cancellation::CancellationKey;
use crate::capability::CapabilityRegistry;
use crate::config::APP_NAME;
use crate::error::unknown_method;
use crate::index::SymbolIndex;
use crate::lsp::dispatch::{Dispatcher, Reply, RequestContext};
use crate::lsp::resolution;
use crate::lsp::state::{ForeignProgress, ServerState, continue_with};
use crate::progress::{ProgressReporter, ProgressTracker};
use crate::protocol::extensions::{FindReferences, PollIndex, SymbolInfo};
use crate::protocol::{Origin, ServiceId};
use crate::service::LanguageService;
use crate::toolchain::Language;
use crate::workspace::Workspace;

/// Key of the trailing command argument naming the document a code action
/// came from.
pub const COMMAND_METADATA_KEY: &str = "toolchainlsp_textDocument";

/// Builds the routing table for every method the server answers itself.
pub fn dispatcher() -> Dispatcher {
    let mut dispatcher = Dispatcher::new();

    // Lifecycle
    dispatcher.register_request::<Initialize, _>(initialize);
    dispatcher.register_request::<Shutdown, _>(shutdown);
    dispatcher.register_notification::<Initialized, _>(initialized);
    dispatcher.register_notification::<Exit, _>(exit);
    dispatcher.register_notification::<Cancel, _>(cancel_request);

    // Text synchronization
    dispatcher.register_notification::<DidOpenTextDocument, _>(did_open);
    dispatcher.register_notification::<DidCloseTextDocument, _>(did_close);
    dispatcher.register_notification::<DidChangeTextDocument, _>(did_change);
    dispatcher.register_notification::<WillSaveTextDocument, _>(will_save);
    dispatcher.register_notification::<DidSaveTextDocument, _>(did_save);

    // Progress
    dispatcher.register_request::<WorkDoneProgressCreate, _>(create_progress);
    dispatcher.register_notification::<Progress, _>(progress);
    dispatcher.register_notification::<WorkDoneProgressCancel, _>(cancel_progress);

    register_forwarding_requests(&mut dispatcher);
    register_index_requests(&mut dispatcher);
    register_command_requests(&mut dispatcher);

    dispatcher
}

fn register_forwarding_requests(dispatcher: &mut Dispatcher) {
    dispatcher.register_document_request::<Completion, _>(
        |_, cx, params, service| Reply::later(async move { service.completion(params, cx.cancel).await }),
        Some(CompletionResponse::List(CompletionList {
            is_incomplete: false,
            items: Vec::new(),
        })),
    );
    dispatcher.register_document_request::<HoverRequest, _>(
        |_, cx, params, service| Reply::later(async move { service.hover(params, cx.cancel).await }),
        None,
    );
    dispatcher.register_document_request::<SymbolInfo, _>(
        |_, cx, params, service| {
            Reply::later(async move { service.symbol_info(params, cx.cancel).await })
        },
        Some(Vec::new()),
    );
    dispatcher.register_document_request::<DocumentHighlightRequest, _>(
        |_, cx, params, service| {
            Reply::later(async move { service.document_highlight(params, cx.cancel).await })
        },
        None,
    );
    dispatcher.register_document_request::<FoldingRangeRequest, _>(
        |_, cx, params, service| {
            Reply::later(async move { service.folding_range(params, cx.cancel).await })
        },
        None,
    );
    dispatcher.register_document_request::<DocumentSymbolRequest, _>(
        |_, cx, params, service| {
            Reply::later(async move { service.document_symbol(params, cx.cancel).await })
        },
        None,
    );
    dispatcher.register_document_request::<DocumentColor, _>(
        |_, cx, params, service| {
            Reply::later(async move { service.document_color(params, cx.cancel).await })
        },
        Vec::new(),
    );
    dispatcher.register_document_request::<ColorPresentationRequest, _>(
        |_, cx, params, service| {
            Reply::later(async move { service.color_presentation(params, cx.cancel).await })
        },
        Vec::new(),
    );
}

fn register_index_requests(dispatcher: &mut Dispatcher) {
    dispatcher.register_workspace_request::<WorkspaceSymbolRequest, _>(|state, _cx, params| {
        let Some(index) = workspace_index(state) else {
            return Reply::ok(None);
        };
        Reply::later(async move {
            let symbols = tokio::task::spawn_blocking(move || {
                resolution::workspace_symbols(index.as_ref(), &params.query)
            })
            .await
            .map_err(|_| jsonrpc::Error::internal_error())?;
            Ok(Some(WorkspaceSymbolResponse::Flat(symbols)))
        })
    });

    dispatcher.register_document_request::<GotoDefinition, _>(
        |state, cx, params, service| {
            let index = workspace_index(state);
            Reply::later(async move {
                let locations = resolution::resolve_symbol_locations(
                    service,
                    params.text_document_position_params.into(),
                    cx.cancel,
                    index,
                    resolution::definition_locations,
                )
                .await?;
                Ok(Some(GotoDefinitionResponse::Array(locations)))
            })
        },
        Some(GotoDefinitionResponse::Array(Vec::new())),
    );

    dispatcher.register_document_request::<GotoImplementation, _>(
        |state, cx, params, service| {
            let index = workspace_index(state);
            Reply::later(async move {
                let locations = resolution::resolve_symbol_locations(
                    service,
                    params.text_document_position_params.into(),
                    cx.cancel,
                    index,
                    resolution::implementation_locations,
                )
                .await?;
                Ok(Some(GotoDefinitionResponse::Array(locations)))
            })
        },
        Some(GotoDefinitionResponse::Array(Vec::new())),
    );

    dispatcher.register_document_request::<FindReferences, _>(
        |state, cx, params, service| {
            let index = workspace_index(state);
            let include_declaration = params.include_declaration();
            Reply::later(async move {
                let locations = resolution::resolve_symbol_locations(
                    service,
                    params.text_document_position.into(),
                    cx.cancel,
                    index,
                    move |index, symbol| {
                        resolution::reference_locations(index, symbol, include_declaration)
                    },
                )
                .await?;
                Ok(Some(locations))
            })
        },
        Some(Vec::new()),
    );

    dispatcher.register_workspace_request::<PollIndex, _>(poll_index);
}

fn register_command_requests(dispatcher: &mut Dispatcher) {
    dispatcher.register_document_request::<CodeActionRequest, _>(
        |_, cx, params, service| {
            let document = params.text_document.clone();
            Reply::later(async move {
                let actions = service.code_action(params, cx.cancel).await?;
                Ok(actions.map(|actions| attach_command_metadata(actions, &document)))
            })
        },
        None,
    );

    dispatcher.register_workspace_request::<ExecuteCommand, _>(|state, cx, mut params| {
        let Some(document) = take_command_metadata(&mut params.arguments) else {
            debug!("Command {} carries no document, ignoring", params.command);
            return Reply::ok(None);
        };
        let Some(service) = document_service(state, &document.uri) else {
            debug!("No service for {}, ignoring command {}", document.uri, params.command);
            return Reply::ok(None);
        };
        Reply::later(async move { service.execute_command(params, cx.cancel).await })
    });
}

pub fn server_capabilities(dynamic_completion: bool) -> ServerCapabilities {
    // Clients that register completion dynamically get it per language once
    // a service announces it.
    let completion_provider = (!dynamic_completion).then(|| CompletionOptions {
        resolve_provider: Some(false),
        trigger_characters: Some(vec![".".to_string()]),
        ..Default::default()
    });

    ServerCapabilities {
        text_document_sync: Some(TextDocumentSyncCapability::Options(
            TextDocumentSyncOptions {
                open_close: Some(true),
                change: Some(TextDocumentSyncKind::INCREMENTAL),
                will_save: Some(true),
                will_save_wait_until: Some(false),
                save: Some(TextDocumentSyncSaveOptions::SaveOptions(SaveOptions {
                    include_text: Some(false),
                })),
            },
        )),
        completion_provider,
        hover_provider: Some(HoverProviderCapability::Simple(true)),
        definition_provider: Some(OneOf::Left(true)),
        implementation_provider: Some(ImplementationProviderCapability::Simple(true)),
        references_provider: Some(OneOf::Left(true)),
        document_highlight_provider: Some(OneOf::Left(true)),
        folding_range_provider: Some(FoldingRangeProviderCapability::Simple(true)),
        document_symbol_provider: Some(OneOf::Left(true)),
        color_provider: Some(ColorProviderCapability::Simple(true)),
        code_action_provider: Some(CodeActionProviderCapability::Simple(true)),
        workspace_symbol_provider: Some(OneOf::Left(true)),
        execute_command_provider: Some(ExecuteCommandOptions::default()),
        ..Default::default()
    }
}

fn initialize(
    state: &mut ServerState,
    _cx: RequestContext,
    params: InitializeParams,
) -> Reply<InitializeResult> {
    if state.workspace.is_some() {
        warn!("Received initialize twice, replacing the workspace");
    }

    let root_uri = root_uri(&params);
    let listen_to_unit_events = params
        .initialization_options
        .as_ref()
        .and_then(|options| options.get("listenToUnitEvents"))
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let capabilities = CapabilityRegistry::new(params.capabilities);
    let dynamic_completion = capabilities.client_has_dynamic_completion_registration();

    info!(
        "Initializing workspace at {}",
        root_uri.as_ref().map_or("<none>", Url::as_str)
    );
    let mut workspace = Workspace::new(
        root_uri,
        capabilities,
        state.build_settings.clone(),
        state.index.clone(),
    );
    workspace.listen_to_unit_events = listen_to_unit_events;
    state.workspace = Some(workspace);

    Reply::ok(InitializeResult {
        capabilities: server_capabilities(dynamic_completion),
        server_info: Some(ServerInfo {
            name: APP_NAME.to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }),
    })
}

#[allow(deprecated)]
fn root_uri(params: &InitializeParams) -> Option<Url> {
    params.root_uri.clone().or_else(|| {
        params
            .root_path
            .as_deref()
            .and_then(|path| Url::from_directory_path(path).ok())
    })
}

fn initialized(
    _state: &mut ServerState,
    _origin: Origin,
    _params: InitializedParams,
) -> BoxFuture<'_, ()> {
    info!("Client initialized");
    future::ready(()).boxed()
}

fn shutdown(state: &mut ServerState, _cx: RequestContext, _params: ()) -> Reply<()> {
    info!("Shutdown requested");
    state.shutdown_requested = true;
    let services: Vec<Arc<dyn LanguageService>> = state.multiplexer.services().cloned().collect();
    Reply::later(async move {
        for service in services {
            service.shutdown().await;
        }
        Ok(())
    })
}

fn exit(state: &mut ServerState, _origin: Origin, _params: ()) -> BoxFuture<'_, ()> {
    info!("Exit requested");
    state.exit_requested = true;
    future::ready(()).boxed()
}

fn cancel_request(state: &mut ServerState, origin: Origin, params: CancelParams) -> BoxFuture<'_, ()> {
    let id = match params.id {
        NumberOrString::Number(n) => Id::Number(n.into()),
        NumberOrString::String(s) => Id::String(s),
    };
    state.cancellation.cancel(&CancellationKey::new(origin, id));
    future::ready(()).boxed()
}

fn did_open(
    state: &mut ServerState,
    _origin: Origin,
    params: DidOpenTextDocumentParams,
) -> BoxFuture<'_, ()> {
    async move {
        let Some(workspace) = state.workspace.as_mut() else {
            warn!("Ignoring didOpen before initialize");
            return;
        };
        let uri = params.text_document.uri.clone();
        let language = Language::from_id(&params.text_document.language_id);
        workspace.open(uri.clone(), language.clone(), params.text_document.version);
        workspace
            .build_settings
            .register_for_change_notifications(&uri, &language);

        match state.resolve_service(&uri, &language).await {
            Some(service) => service.open_document(params),
            None => debug!("No service for {} ({})", uri, language),
        }
    }
    .boxed()
}

fn did_close(
    state: &mut ServerState,
    _origin: Origin,
    params: DidCloseTextDocumentParams,
) -> BoxFuture<'_, ()> {
    if let Some(workspace) = state.workspace.as_mut() {
        let uri = &params.text_document.uri;
        workspace.close(uri);
        workspace.build_settings.unregister_for_change_notifications(uri);
        if let Some(service) = workspace.document_service(uri) {
            service.close_document(params);
        }
    }
    future::ready(()).boxed()
}

fn did_change(
    state: &mut ServerState,
    _origin: Origin,
    params: DidChangeTextDocumentParams,
) -> BoxFuture<'_, ()> {
    if let Some(workspace) = state.workspace.as_mut() {
        let uri = &params.text_document.uri;
        workspace.set_version(uri, params.text_document.version);
        if let Some(service) = workspace.document_service(uri) {
            service.change_document(params);
        }
    }
    future::ready(()).boxed()
}

fn will_save(
    state: &mut ServerState,
    _origin: Origin,
    params: WillSaveTextDocumentParams,
) -> BoxFuture<'_, ()> {
    if let Some(service) = document_service(state, &params.text_document.uri) {
        service.will_save_document(params);
    }
    future::ready(()).boxed()
}

fn did_save(
    state: &mut ServerState,
    _origin: Origin,
    params: DidSaveTextDocumentParams,
) -> BoxFuture<'_, ()> {
    if let Some(service) = document_service(state, &params.text_document.uri) {
        service.did_save_document(params);
    }

    // A save produces new units; pick them up when the client asked us to
    // follow unit events.
    let listening = state
        .workspace
        .as_ref()
        .is_some_and(|workspace| workspace.listen_to_unit_events);
    if let Some(index) = workspace_index(state).filter(|_| listening) {
        state.poll_units(index);
    }
    future::ready(()).boxed()
}

/// Re-resolves each changed open document and tells its service.
pub async fn build_settings_changed(state: &mut ServerState, uris: Vec<Url>) {
    for uri in uris {
        let Some(language) = state
            .workspace
            .as_ref()
            .and_then(|workspace| workspace.document(&uri))
            .map(|document| document.language.clone())
        else {
            continue;
        };
        if let Some(service) = state.resolve_service(&uri, &language).await {
            service.document_updated_build_settings(&uri, &language);
        }
    }
}

fn poll_index(state: &mut ServerState, _cx: RequestContext, _params: Option<()>) -> Reply<()> {
    let Some(index) = workspace_index(state) else {
        return Reply::ok(());
    };

    let supports_progress = state
        .workspace
        .as_ref()
        .is_some_and(|workspace| workspace.capabilities.client_supports_work_done_progress());
    let progress = supports_progress.then(|| {
        let token = state.next_progress_token("pollIndex");
        let cancel = tokio_util::sync::CancellationToken::new();
        state.own_progress.insert(token.clone(), cancel.clone());
        (token, cancel)
    });
    let client = state.client.clone();
    let events = state.events.clone();

    Reply::later(async move {
        let reporter = match &progress {
            Some((token, cancel)) => {
                ProgressReporter::create(&client, token.clone(), cancel.clone()).await
            }
            None => None,
        };
        if let Some(reporter) = &reporter {
            reporter.begin("Indexing", true);
        }

        let result = tokio::task::spawn_blocking(move || index.poll_for_unit_changes_and_wait())
            .await
            .map_err(|_| jsonrpc::Error::internal_error());

        if let Some(reporter) = &reporter {
            reporter.end(None);
        }
        if let Some((token, _)) = progress {
            continue_with(&events, move |state| {
                state.own_progress.remove(&token);
            });
        }
        result
    })
}

fn create_progress(
    state: &mut ServerState,
    cx: RequestContext,
    params: WorkDoneProgressCreateParams,
) -> Reply<()> {
    let Origin::Service(id) = cx.origin else {
        return Reply::err(unknown_method(WorkDoneProgressCreate::METHOD));
    };
    let client = state.client.clone();
    let events = state.events.clone();

    Reply::later(async move {
        client
            .call::<WorkDoneProgressCreate>(params.clone(), Some(&cx.cancel))
            .await?;
        let peer = cx.peer;
        continue_with(&events, move |state| {
            state
                .foreign_progress
                .entry(id)
                .or_insert_with(|| ForeignProgress {
                    peer,
                    tracker: ProgressTracker::new(),
                })
                .tracker
                .create(params.token);
        });
        Ok(())
    })
}

fn progress(state: &mut ServerState, origin: Origin, params: ProgressParams) -> BoxFuture<'_, ()> {
    match origin {
        Origin::Service(id) => forward_progress(state, id, params),
        Origin::Client => debug!("Ignoring progress {:?} from the client", params.token),
    }
    future::ready(()).boxed()
}

/// Passes a backend's progress on to the client, but only under tokens the
/// client accepted and in lifecycle order.
fn forward_progress(state: &mut ServerState, id: ServiceId, params: ProgressParams) {
    let Some(foreign) = state.foreign_progress.get_mut(&id) else {
        warn!("Progress from {} under unknown token {:?}", id, params.token);
        return;
    };
    let ProgressParamsValue::WorkDone(progress) = &params.value;
    if let Err(e) = foreign.tracker.record(&params.token, progress) {
        warn!("Dropping progress from {}: {}", id, e);
        return;
    }
    state.client.notify_typed::<Progress>(params);
}

fn cancel_progress(
    state: &mut ServerState,
    origin: Origin,
    params: WorkDoneProgressCancelParams,
) -> BoxFuture<'_, ()> {
    if origin.is_client() {
        route_progress_cancel(state, params);
    } else {
        debug!("Ignoring progress cancel from {:?}", origin);
    }
    future::ready(()).boxed()
}

fn route_progress_cancel(state: &mut ServerState, params: WorkDoneProgressCancelParams) {
    for (id, foreign) in state.foreign_progress.iter_mut() {
        if foreign.tracker.remove(&params.token) {
            debug!("Relaying progress cancel {:?} to {}", params.token, id);
            foreign
                .peer
                .notify_typed::<WorkDoneProgressCancel>(params);
            return;
        }
    }

    match state.own_progress.remove(&params.token) {
        Some(cancel) => cancel.cancel(),
        None => debug!("Progress cancel for unknown token {:?}", params.token),
    }
}

fn workspace_index(state: &ServerState) -> Option<Arc<dyn SymbolIndex>> {
    state.workspace.as_ref()?.index.clone()
}

fn document_service(state: &ServerState, uri: &Url) -> Option<Arc<dyn LanguageService>> {
    state.workspace.as_ref()?.document_service(uri)
}

fn command_metadata(document: &TextDocumentIdentifier) -> Value {
    json!({ COMMAND_METADATA_KEY: document })
}

fn push_command_metadata(command: &mut Command, document: &TextDocumentIdentifier) {
    command
        .arguments
        .get_or_insert_with(Vec::new)
        .push(command_metadata(document));
}

/// Appends the originating document to every command in `actions`.
pub fn attach_command_metadata(
    actions: CodeActionResponse,
    document: &TextDocumentIdentifier,
) -> CodeActionResponse {
    actions
        .into_iter()
        .map(|action| match action {
            CodeActionOrCommand::Command(mut command) => {
                push_command_metadata(&mut command, document);
                CodeActionOrCommand::Command(command)
            }
            CodeActionOrCommand::CodeAction(mut action) => {
                if let Some(command) = action.command.as_mut() {
                    push_command_metadata(command, document);
                }
                CodeActionOrCommand::CodeAction(action)
            }
        })
        .collect()
}

/// Removes the trailing document argument added by
/// [`attach_command_metadata`] and returns the document.
pub fn take_command_metadata(arguments: &mut Vec<Value>) -> Option<TextDocumentIdentifier> {
    let document = arguments.last()?.get(COMMAND_METADATA_KEY)?;
    let document = serde_json::from_value(document.clone()).ok()?;
    arguments.pop();
    Some(document)
}
