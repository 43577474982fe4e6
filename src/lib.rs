pub mod cancellation;
pub mod capability;
pub mod config;
pub mod error;
pub mod index;
pub mod log;
pub mod lsp;
pub mod multiplexer;
pub mod progress;
pub mod protocol;
pub mod rpc;
pub mod service;
pub mod toolchain;
pub mod workspace;
