//! JSON-RPC message envelopes exchanged with the client and the backends.

use serde_json::Value;
use tower_lsp::jsonrpc::{Request, Response};

/// Identity of a started backend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(pub u64);

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "service#{}", self.0)
    }
}

/// Which side of the server a message arrived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// The editor that started the server.
    Client,
    /// A backend language service talking back to the server.
    Service(ServiceId),
}

impl Origin {
    pub fn is_client(self) -> bool {
        matches!(self, Origin::Client)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A request carrying an id.
    Request(Request),
    /// A request without an id.
    Notification(Request),
    Response(Response),
}

impl Message {
    /// Classifies a raw JSON-RPC payload by the presence of `method` and `id`.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        if value.get("method").is_none() {
            return serde_json::from_value(value).map(Message::Response);
        }
        let request: Request = serde_json::from_value(value)?;
        if request.id().is_some() {
            Ok(Message::Request(request))
        } else {
            Ok(Message::Notification(request))
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Message::Request(request) | Message::Notification(request) => {
                serde_json::to_string(request)
            }
            Message::Response(response) => serde_json::to_string(response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tower_lsp::jsonrpc::Id;

    #[test]
    fn parse_distinguishes_requests_notifications_and_responses() {
        let request = Message::parse(
            r#"{"jsonrpc":"2.0","id":1,"method":"textDocument/hover","params":{}}"#,
        )
        .unwrap();
        assert!(matches!(request, Message::Request(ref r) if r.method() == "textDocument/hover"));

        let notification =
            Message::parse(r#"{"jsonrpc":"2.0","method":"initialized","params":{}}"#).unwrap();
        assert!(matches!(notification, Message::Notification(_)));

        let response = Message::parse(r#"{"jsonrpc":"2.0","id":"a","result":null}"#).unwrap();
        match response {
            Message::Response(response) => {
                let (id, result) = response.into_parts();
                assert_eq!(id, Id::String("a".to_string()));
                assert_eq!(result.unwrap(), Value::Null);
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn to_json_round_trips_a_request() {
        let request = Request::build("workspace/symbol")
            .id(Id::Number(3))
            .params(json!({"query": "foo"}))
            .finish();
        let text = Message::Request(request.clone()).to_json().unwrap();

        assert_eq!(Message::parse(&text).unwrap(), Message::Request(request));
    }
}
