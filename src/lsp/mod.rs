// LSP protocol layer
// - server.rs: Event loop and stdio entry point
// - state.rs: State owned by the event loop
// - dispatch.rs: Method routing
// - handlers.rs: Request/notification handlers
// - resolution.rs: Index-backed location queries

pub mod dispatch;
pub mod handlers;
pub mod resolution;
pub mod server;
pub mod state;
