use std::borrow::Cow;

use thiserror::Error;
use tower_lsp::jsonrpc::{self, ErrorCode};
use tower_lsp::lsp_types::ProgressToken;

/// LSP error code for requests received before `initialize`.
pub const SERVER_NOT_INITIALIZED: i64 = -32002;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Failed to launch {binary}: {source}")]
    Launch {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Toolchain {toolchain} has no service for {language}")]
    NoService { toolchain: String, language: String },

    #[error("Backend handshake failed: {0}")]
    Handshake(String),

    #[error("Backend connection closed")]
    Disconnected,

    #[error("Backend replied with error {}: {}", .0.code, .0.message)]
    Response(jsonrpc::Error),

    #[error("Failed to decode backend reply: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<ServiceError> for jsonrpc::Error {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::Response(error) => error,
            other => jsonrpc::Error {
                code: ErrorCode::InternalError,
                message: Cow::Owned(other.to_string()),
                data: None,
            },
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProgressError {
    #[error("Progress token {0:?} was never created")]
    UnknownToken(ProgressToken),

    #[error("Progress token {0:?} already began")]
    AlreadyBegun(ProgressToken),

    #[error("Progress token {0:?} reported before begin")]
    NotBegun(ProgressToken),

    #[error("Progress percentage for {token:?} went from {previous} to {current}")]
    PercentageDecreased {
        token: ProgressToken,
        previous: u32,
        current: u32,
    },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing Content-Length header")]
    MissingContentLength,

    #[error("Invalid Content-Length header: {0}")]
    InvalidContentLength(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Failed to read index snapshot: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse index snapshot: {0}")]
    Parse(#[from] serde_json::Error),
}

pub fn server_not_initialized() -> jsonrpc::Error {
    jsonrpc::Error {
        code: ErrorCode::ServerError(SERVER_NOT_INITIALIZED),
        message: Cow::Borrowed("Server not initialized"),
        data: None,
    }
}

pub fn request_cancelled() -> jsonrpc::Error {
    jsonrpc::Error::new(ErrorCode::RequestCancelled)
}

pub fn unknown_method(method: &str) -> jsonrpc::Error {
    jsonrpc::Error {
        code: ErrorCode::MethodNotFound,
        message: Cow::Owned(format!("Unknown method: {method}")),
        data: None,
    }
}
