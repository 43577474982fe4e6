//! Lifecycle E2E tests: initialize, shutdown, exit and error replies

mod helper;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use serde_json::{Value, json};
use tower_lsp::lsp_types::*;

use helper::{
    MockLauncher, create_notification, create_request, dynamic_completion_capabilities,
    position_params, start_server,
};

#[tokio::test(flavor = "multi_thread")]
async fn requests_before_initialize_fail_with_server_not_initialized() {
    let mut client = start_server(Arc::new(MockLauncher::new()), None);

    let response = client
        .request(create_request(1, "workspace/symbol", json!({"query": "foo"})))
        .await;
    assert_eq!(response.error().unwrap().code.code(), -32002);

    let response = client
        .request(create_request(
            2,
            "textDocument/hover",
            position_params("file:///a.swift", 0, 0),
        ))
        .await;
    assert_eq!(response.error().unwrap().code.code(), -32002);
}

#[tokio::test(flavor = "multi_thread")]
async fn initialize_advertises_capabilities() {
    let mut client = start_server(Arc::new(MockLauncher::new()), None);

    let response = client.initialize(ClientCapabilities::default()).await;

    let result: InitializeResult =
        serde_json::from_value(response.result().unwrap().clone()).unwrap();
    assert_eq!(result.server_info.unwrap().name, "toolchain-lsp");
    let capabilities = result.capabilities;
    assert_eq!(
        capabilities.text_document_sync,
        Some(TextDocumentSyncCapability::Options(TextDocumentSyncOptions {
            open_close: Some(true),
            change: Some(TextDocumentSyncKind::INCREMENTAL),
            will_save: Some(true),
            will_save_wait_until: Some(false),
            save: Some(TextDocumentSyncSaveOptions::SaveOptions(SaveOptions {
                include_text: Some(false),
            })),
        }))
    );
    assert_eq!(
        capabilities.completion_provider.unwrap().trigger_characters,
        Some(vec![".".to_string()])
    );
    assert_eq!(capabilities.definition_provider, Some(OneOf::Left(true)));
    assert_eq!(capabilities.references_provider, Some(OneOf::Left(true)));
    assert_eq!(capabilities.workspace_symbol_provider, Some(OneOf::Left(true)));
    assert!(capabilities.execute_command_provider.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn dynamic_completion_clients_get_no_static_completion() {
    let mut client = start_server(Arc::new(MockLauncher::new()), None);

    let response = client.initialize(dynamic_completion_capabilities()).await;

    let result: InitializeResult =
        serde_json::from_value(response.result().unwrap().clone()).unwrap();
    assert!(result.capabilities.completion_provider.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_client_request_is_method_not_found() {
    let mut client = start_server(Arc::new(MockLauncher::new()), None);
    client.initialize(ClientCapabilities::default()).await;

    let response = client
        .request(create_request(5, "textDocument/madeUp", json!({})))
        .await;

    let error = response.error().unwrap();
    assert_eq!(error.code.code(), -32601);
    assert!(error.message.contains("textDocument/madeUp"));
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_then_exit_stops_cleanly() {
    let launcher = Arc::new(MockLauncher::new());
    let mut client = start_server(launcher.clone(), None);
    client.initialize(ClientCapabilities::default()).await;
    client.open("file:///a.swift", "swift").await;

    let response = client.request(create_request(2, "shutdown", Value::Null)).await;
    assert_eq!(response.result(), Some(&Value::Null));
    assert_eq!(launcher.service(0).shutdowns.load(Ordering::SeqCst), 1);

    client.send_notification(create_notification("exit", Value::Null));
    assert!(client.server.await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn exit_without_shutdown_reports_failure() {
    let client = start_server(Arc::new(MockLauncher::new()), None);

    client.send_notification(create_notification("exit", Value::Null));

    assert!(!client.server.await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn closed_client_stream_stops_the_server() {
    let client = start_server(Arc::new(MockLauncher::new()), None);

    client.handle.client_closed();

    assert!(!client.server.await.unwrap());
}
