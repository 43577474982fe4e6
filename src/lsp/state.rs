//! State owned by the server's event loop, and the events that drive it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_lsp::jsonrpc::Response;
use tower_lsp::lsp_types::request::RegisterCapability;
use tower_lsp::lsp_types::{ProgressToken, Registration, RegistrationParams, Url};
use tracing::{debug, warn};

use crate::cancellation::{CancellationKey, CancellationRegistry};
use crate::index::SymbolIndex;
use crate::multiplexer::Multiplexer;
use crate::progress::ProgressTracker;
use crate::protocol::ServiceId;
use crate::rpc::{Connection, Envelope};
use crate::service::LanguageService;
use crate::toolchain::Language;
use crate::workspace::{BuildSettingsProvider, Workspace};

/// Deferred mutation of the server state, run on the event loop.
pub type Continuation = Box<dyn FnOnce(&mut ServerState) + Send>;

pub enum Event {
    /// A request or notification from the client or a backend.
    Inbound(Envelope),
    /// A deferred reply is ready.
    Complete {
        key: CancellationKey,
        peer: Connection,
        response: Response,
    },
    Continue(Continuation),
    /// Build settings of these files changed.
    BuildSettingsChanged(Vec<Url>),
    /// The client's input stream ended.
    ClientClosed,
}

/// Save-triggered index polling. Saves arriving while a poll runs fold into
/// one follow-up poll.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum UnitPoll {
    #[default]
    Idle,
    Running,
    Rerun,
}

/// Progress a backend reports through the server to the client.
pub struct ForeignProgress {
    pub peer: Connection,
    pub tracker: ProgressTracker,
}

pub struct ServerState {
    pub client: Connection,
    pub events: mpsc::UnboundedSender<Event>,
    pub cancellation: CancellationRegistry,
    pub multiplexer: Multiplexer,
    pub workspace: Option<Workspace>,
    /// Index handed to the workspace on initialize.
    pub index: Option<Arc<dyn SymbolIndex>>,
    pub build_settings: Arc<dyn BuildSettingsProvider>,
    pub foreign_progress: HashMap<ServiceId, ForeignProgress>,
    /// Tokens of progress the server reports itself.
    pub own_progress: HashMap<ProgressToken, CancellationToken>,
    pub unit_poll: UnitPoll,
    pub shutdown_requested: bool,
    pub exit_requested: bool,
    next_progress_id: u64,
}

impl ServerState {
    pub fn new(
        client: Connection,
        events: mpsc::UnboundedSender<Event>,
        multiplexer: Multiplexer,
        index: Option<Arc<dyn SymbolIndex>>,
        build_settings: Arc<dyn BuildSettingsProvider>,
    ) -> Self {
        Self {
            client,
            events,
            cancellation: CancellationRegistry::new(),
            multiplexer,
            workspace: None,
            index,
            build_settings,
            foreign_progress: HashMap::new(),
            own_progress: HashMap::new(),
            unit_poll: UnitPoll::Idle,
            shutdown_requested: false,
            exit_requested: false,
            next_progress_id: 0,
        }
    }

    /// Queues `f` to run on the event loop after the current event.
    pub fn continue_with(&self, f: impl FnOnce(&mut ServerState) + Send + 'static) {
        continue_with(&self.events, f);
    }

    /// The service for `uri`, starting one when needed. Completion options of
    /// newly started services are registered with the client.
    pub async fn resolve_service(
        &mut self,
        uri: &Url,
        language: &Language,
    ) -> Option<Arc<dyn LanguageService>> {
        let workspace = self.workspace.as_mut()?;
        let service = self.multiplexer.resolve(uri, language, workspace).await;
        self.register_started_services();
        service
    }

    fn register_started_services(&mut self) {
        let started = self.multiplexer.take_started();
        let Some(workspace) = self.workspace.as_mut() else {
            return;
        };
        for service in started {
            let Some(options) = service.capabilities.completion_provider else {
                continue;
            };
            workspace.capabilities.register_completion_if_needed(
                options,
                std::slice::from_ref(&service.language),
                |registration| register_on_client(&self.client, &self.events, registration),
            );
        }
    }

    /// Polls `index` for unit changes off the event loop, unless a poll is
    /// already running, in which case one more runs after it.
    pub fn poll_units(&mut self, index: Arc<dyn SymbolIndex>) {
        if self.unit_poll != UnitPoll::Idle {
            self.unit_poll = UnitPoll::Rerun;
            return;
        }
        self.unit_poll = UnitPoll::Running;

        let events = self.events.clone();
        tokio::spawn(async move {
            let polled = index.clone();
            if let Err(e) =
                tokio::task::spawn_blocking(move || polled.poll_for_unit_changes_and_wait()).await
            {
                warn!("Unit poll failed: {}", e);
            }
            continue_with(&events, move |state| {
                let rerun = state.unit_poll == UnitPoll::Rerun;
                state.unit_poll = UnitPoll::Idle;
                if rerun {
                    state.poll_units(index);
                }
            });
        });
    }

    pub fn next_progress_token(&mut self, purpose: &str) -> ProgressToken {
        self.next_progress_id += 1;
        ProgressToken::String(format!("toolchain-lsp/{}/{}", purpose, self.next_progress_id))
    }
}

pub fn continue_with(
    events: &mpsc::UnboundedSender<Event>,
    f: impl FnOnce(&mut ServerState) + Send + 'static,
) {
    if events.send(Event::Continue(Box::new(f))).is_err() {
        debug!("Event loop stopped, dropping continuation");
    }
}

/// Sends `client/registerCapability`. A rejected registration is dropped
/// from the registry so a later service can register again.
fn register_on_client(
    client: &Connection,
    events: &mpsc::UnboundedSender<Event>,
    registration: Registration,
) {
    let client = client.clone();
    let events = events.clone();
    tokio::spawn(async move {
        let params = RegistrationParams {
            registrations: vec![registration.clone()],
        };
        if let Err(e) = client.call::<RegisterCapability>(params, None).await {
            warn!("Client rejected registration {}: {}", registration.id, e);
            continue_with(&events, move |state| {
                if let Some(workspace) = state.workspace.as_mut() {
                    workspace.capabilities.remove(&registration);
                }
            });
        }
    });
}
