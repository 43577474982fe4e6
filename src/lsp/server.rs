use std::sync::Arc;

use tokio::io::BufReader;
use tokio::sync::mpsc;
use tower_lsp::lsp_types::Url;
use tracing::{debug, info, warn};

use crate::config::Options;
use crate::index::SymbolIndex;
use crate::index::memory::MemoryIndex;
use crate::log::init;
use crate::lsp::dispatch::Dispatcher;
use crate::lsp::handlers;
use crate::lsp::state::{Event, ServerState};
use crate::multiplexer::Multiplexer;
use crate::protocol::Origin;
use crate::rpc::{self, Connection, Envelope, InboundSink};
use crate::service::{ProcessLauncher, ServiceLauncher};
use crate::toolchain::ToolchainRegistry;
use crate::workspace::{BuildSettingsProvider, NoBuildSettings};

/// The server's event loop. Every state change happens here, one event at a
/// time.
pub struct Server {
    dispatcher: Dispatcher,
    state: ServerState,
    events: mpsc::UnboundedReceiver<Event>,
}

pub struct ServerBuilder {
    client: Connection,
    registry: ToolchainRegistry,
    launcher: Arc<dyn ServiceLauncher>,
    index: Option<Arc<dyn SymbolIndex>>,
    build_settings: Arc<dyn BuildSettingsProvider>,
}

/// Posts events to a running [`Server`].
#[derive(Clone)]
pub struct ServerHandle {
    events: mpsc::UnboundedSender<Event>,
}

impl Server {
    /// Starts building a server answering `client`.
    pub fn build(client: Connection, options: &Options) -> ServerBuilder {
        ServerBuilder {
            client,
            registry: options.toolchain_registry(),
            launcher: Arc::new(ProcessLauncher::new(options.clangd_args.clone())),
            index: None,
            build_settings: Arc::new(NoBuildSettings),
        }
    }

    /// Runs until the client sends `exit` or closes its stream. Returns
    /// whether `shutdown` came first.
    pub async fn run(mut self) -> bool {
        while let Some(event) = self.events.recv().await {
            match event {
                Event::Inbound(envelope) => {
                    self.dispatcher.dispatch(&mut self.state, envelope).await;
                }
                Event::Complete {
                    key,
                    peer,
                    response,
                } => {
                    self.state.cancellation.remove(&key);
                    peer.respond(response);
                }
                Event::Continue(continuation) => continuation(&mut self.state),
                Event::BuildSettingsChanged(uris) => {
                    handlers::build_settings_changed(&mut self.state, uris).await;
                }
                Event::ClientClosed => {
                    info!("Client closed the connection");
                    break;
                }
            }

            if self.state.exit_requested {
                break;
            }
        }
        self.state.shutdown_requested
    }
}

impl ServerBuilder {
    pub fn index(mut self, index: Arc<dyn SymbolIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn build_settings(mut self, build_settings: Arc<dyn BuildSettingsProvider>) -> Self {
        self.build_settings = build_settings;
        self
    }

    pub fn launcher(mut self, launcher: Arc<dyn ServiceLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn finish(self) -> (Server, ServerHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = ServerHandle { events: events_tx };
        let multiplexer = Multiplexer::new(self.registry, self.launcher, handle.inbound_sink());
        let state = ServerState::new(
            self.client,
            handle.events.clone(),
            multiplexer,
            self.index,
            self.build_settings,
        );
        let server = Server {
            dispatcher: handlers::dispatcher(),
            state,
            events: events_rx,
        };
        (server, handle)
    }
}

impl ServerHandle {
    pub fn send(&self, envelope: Envelope) {
        self.post(Event::Inbound(envelope));
    }

    /// Sink for reader tasks feeding this server.
    pub fn inbound_sink(&self) -> InboundSink {
        let events = self.events.clone();
        Arc::new(move |envelope| {
            if events.send(Event::Inbound(envelope)).is_err() {
                debug!("Server stopped, dropping inbound message");
            }
        })
    }

    pub fn build_settings_changed(&self, uris: Vec<Url>) {
        self.post(Event::BuildSettingsChanged(uris));
    }

    pub fn client_closed(&self) {
        self.post(Event::ClientClosed);
    }

    fn post(&self, event: Event) {
        if self.events.send(event).is_err() {
            debug!("Server stopped, dropping event");
        }
    }
}

/// Serves LSP over stdio. Returns the process exit code: 0 when the client
/// shut the server down before exiting, 1 otherwise.
pub async fn run_server(options: Options, log_level: Option<&str>) -> anyhow::Result<i32> {
    let log_path = init(log_level)?;

    info!(
        "Starting toolchain-lsp {} (log: {:?})",
        env!("CARGO_PKG_VERSION"),
        log_path
    );

    let (client, outgoing) = Connection::new("client");
    let mut builder = Server::build(client.clone(), &options);
    if let Some(path) = &options.index_snapshot {
        match MemoryIndex::load(path) {
            Ok(index) => builder = builder.index(Arc::new(index)),
            Err(e) => warn!("Failed to load index snapshot {:?}: {}", path, e),
        }
    }
    let (server, handle) = builder.finish();

    rpc::spawn_writer(tokio::io::stdout(), outgoing);
    let closed = handle.clone();
    rpc::spawn_reader(
        BufReader::new(tokio::io::stdin()),
        client,
        Origin::Client,
        handle.inbound_sink(),
        move || closed.client_closed(),
    );

    let shutdown_requested = server.run().await;

    info!("toolchain-lsp server stopped");
    Ok(if shutdown_requested { 0 } else { 1 })
}
