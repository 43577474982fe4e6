//! Work-done progress E2E tests: backend progress relayed to the client and
//! client cancellation routed back

mod helper;

use std::sync::Arc;

use serde_json::{Value, json};
use tower_lsp::jsonrpc::Id;
use tower_lsp::lsp_types::*;

use toolchain_lsp::protocol::{Message, ServiceId};

use helper::{
    MockLauncher, TestClient, TestService, create_notification, create_request, start_server,
};

fn progress(token: &str, value: Value) -> tower_lsp::jsonrpc::Request {
    create_notification("$/progress", json!({"token": token, "value": value}))
}

/// Has `service` create `token` and lets the client accept it.
async fn create_token(client: &mut TestClient, service: &mut TestService, token: &str) {
    service.send_request(
        client,
        create_request(1, "window/workDoneProgress/create", json!({"token": token})),
    );
    let relayed = client
        .wait_for_request("window/workDoneProgress/create")
        .await;
    assert_eq!(relayed.params().unwrap()["token"], token);
    client.reply(&relayed, Ok(Value::Null));

    let Message::Response(response) = service.next_message().await else {
        panic!("expected the create response");
    };
    assert_eq!(response.id(), &Id::Number(1));
    assert!(response.error().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn backend_progress_is_relayed_in_order() {
    let mut client = start_server(Arc::new(MockLauncher::new()), None);
    client.initialize(ClientCapabilities::default()).await;
    let mut service = TestService::new(ServiceId(1));
    create_token(&mut client, &mut service, "index").await;

    service.send_notification(
        &client,
        progress("index", json!({"kind": "begin", "title": "Indexing", "percentage": 10})),
    );
    let begin = client.wait_for_notification("$/progress").await;
    assert_eq!(begin.params().unwrap()["value"]["kind"], "begin");

    service.send_notification(
        &client,
        progress("index", json!({"kind": "report", "percentage": 60})),
    );
    let report = client.wait_for_notification("$/progress").await;
    assert_eq!(report.params().unwrap()["value"]["percentage"], 60);

    service.send_notification(&client, progress("index", json!({"kind": "end"})));
    let end = client.wait_for_notification("$/progress").await;
    assert_eq!(end.params().unwrap()["value"]["kind"], "end");
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_backend_progress_is_dropped() {
    let mut client = start_server(Arc::new(MockLauncher::new()), None);
    client.initialize(ClientCapabilities::default()).await;
    let mut service = TestService::new(ServiceId(1));
    create_token(&mut client, &mut service, "index").await;

    // Never created
    service.send_notification(&client, progress("other", json!({"kind": "begin", "title": "x"})));
    // Report before begin
    service.send_notification(&client, progress("index", json!({"kind": "report"})));
    // Not a work-done value
    service.send_notification(&client, progress("index", json!([{"uri": "file:///a.swift"}])));
    client.assert_quiet().await;

    service.send_notification(
        &client,
        progress("index", json!({"kind": "begin", "title": "Indexing", "percentage": 50})),
    );
    client.wait_for_notification("$/progress").await;

    // Percentage going backwards
    service.send_notification(
        &client,
        progress("index", json!({"kind": "report", "percentage": 20})),
    );
    client.assert_quiet().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_create_leaves_the_token_unknown() {
    let mut client = start_server(Arc::new(MockLauncher::new()), None);
    client.initialize(ClientCapabilities::default()).await;
    let mut service = TestService::new(ServiceId(1));

    service.send_request(
        &client,
        create_request(1, "window/workDoneProgress/create", json!({"token": "index"})),
    );
    let relayed = client
        .wait_for_request("window/workDoneProgress/create")
        .await;
    client.reply(&relayed, Err(tower_lsp::jsonrpc::Error::internal_error()));
    let Message::Response(response) = service.next_message().await else {
        panic!("expected the create response");
    };
    assert!(response.error().is_some());

    service.send_notification(&client, progress("index", json!({"kind": "begin", "title": "x"})));
    client.assert_quiet().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn client_cancel_is_routed_to_the_owning_backend() {
    let mut client = start_server(Arc::new(MockLauncher::new()), None);
    client.initialize(ClientCapabilities::default()).await;
    let mut owner = TestService::new(ServiceId(1));
    create_token(&mut client, &mut owner, "index").await;

    client.send_notification(create_notification(
        "window/workDoneProgress/cancel",
        json!({"token": "index"}),
    ));

    let Message::Notification(cancel) = owner.next_message().await else {
        panic!("expected the cancel notification");
    };
    assert_eq!(cancel.method(), "window/workDoneProgress/cancel");
    assert_eq!(cancel.params().unwrap()["token"], "index");

    // The token is gone; later progress under it is dropped.
    owner.send_notification(&client, progress("index", json!({"kind": "begin", "title": "x"})));
    client.assert_quiet().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn client_cannot_create_progress_on_the_server() {
    let mut client = start_server(Arc::new(MockLauncher::new()), None);
    client.initialize(ClientCapabilities::default()).await;

    let response = client
        .request(create_request(
            2,
            "window/workDoneProgress/create",
            json!({"token": "x"}),
        ))
        .await;

    assert_eq!(response.error().unwrap().code.code(), -32601);
}
