//! Maps documents to started backends, starting one per toolchain and
//! language on first need.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tower_lsp::lsp_types::{
    ClientCapabilities, InitializeParams, ServerCapabilities, TextDocumentSyncCapability,
    TextDocumentSyncKind, Url,
};
use tracing::{debug, error, info};

use crate::error::ServiceError;
use crate::protocol::ServiceId;
use crate::rpc::InboundSink;
use crate::service::{LanguageService, ServiceLauncher};
use crate::toolchain::{Language, Toolchain, ToolchainRegistry};
use crate::workspace::Workspace;

/// Lazily filled keyed cache. A failed construction leaves no entry, so a
/// later call retries.
#[derive(Debug)]
pub struct ServiceCache<K, V> {
    entries: HashMap<K, V>,
}

impl<K, V> Default for ServiceCache<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K, V> ServiceCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).cloned()
    }

    pub async fn get_or_create<F, Fut, E>(&mut self, key: K, factory: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.entries.get(&key) {
            return Ok(value.clone());
        }
        let value = factory().await?;
        self.entries.insert(key, value.clone());
        Ok(value)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Identifies one backend connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LanguageServiceKey {
    pub toolchain: String,
    pub language: Language,
}

impl LanguageServiceKey {
    pub fn new(toolchain: &Toolchain, language: &Language) -> Self {
        Self {
            toolchain: toolchain.identifier.clone(),
            language: language.clone(),
        }
    }
}

impl fmt::Display for LanguageServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.toolchain, self.language)
    }
}

/// A backend that finished its handshake since the last
/// [`Multiplexer::take_started`].
#[derive(Debug, Clone)]
pub struct StartedService {
    pub id: ServiceId,
    pub language: Language,
    pub capabilities: ServerCapabilities,
}

pub struct Multiplexer {
    registry: ToolchainRegistry,
    launcher: Arc<dyn ServiceLauncher>,
    inbound: InboundSink,
    services: ServiceCache<LanguageServiceKey, Arc<dyn LanguageService>>,
    next_id: u64,
    started: Vec<StartedService>,
}

impl Multiplexer {
    pub fn new(
        registry: ToolchainRegistry,
        launcher: Arc<dyn ServiceLauncher>,
        inbound: InboundSink,
    ) -> Self {
        Self {
            registry,
            launcher,
            inbound,
            services: ServiceCache::default(),
            next_id: 0,
            started: Vec::new(),
        }
    }

    /// The service for `uri`, starting one if needed. Returns `None` when no
    /// toolchain supports the language or the backend fails to start.
    ///
    /// # Panics
    ///
    /// When a newly started backend doesn't use incremental text sync.
    pub async fn resolve(
        &mut self,
        uri: &Url,
        language: &Language,
        workspace: &mut Workspace,
    ) -> Option<Arc<dyn LanguageService>> {
        if let Some(service) = workspace.document_service(uri) {
            return Some(service);
        }

        let Some(toolchain) = workspace
            .build_settings
            .toolchain(uri, language)
            .or_else(|| self.registry.toolchain_for(language).cloned())
        else {
            debug!("No toolchain supports {} for {}", language, uri);
            return None;
        };

        let key = LanguageServiceKey::new(&toolchain, language);
        let client_capabilities = workspace.capabilities.client_capabilities().clone();
        let root_uri = workspace.root_uri.clone();

        let Self {
            launcher,
            inbound,
            services,
            next_id,
            started,
            ..
        } = self;
        let selected = &toolchain;
        let result = services
            .get_or_create(key.clone(), move || async move {
                *next_id += 1;
                let id = ServiceId(*next_id);
                let service = launcher.launch(selected, language, id, inbound.clone())?;
                let capabilities =
                    handshake(service.as_ref(), client_capabilities, root_uri).await?;
                started.push(StartedService {
                    id,
                    language: language.clone(),
                    capabilities,
                });
                info!("Started {} for {}", id, key);
                Ok::<_, ServiceError>(service)
            })
            .await;

        let service = match result {
            Ok(service) => service,
            Err(e) => {
                error!("Failed to start service for {} ({}): {}", uri, language, e);
                return None;
            }
        };

        info!(
            "Using toolchain {} ({}) for {}",
            toolchain.display_name, toolchain.identifier, uri
        );
        workspace.set_document_service(uri.clone(), service.clone());
        Some(service)
    }

    /// Backends started since the last call.
    pub fn take_started(&mut self) -> Vec<StartedService> {
        std::mem::take(&mut self.started)
    }

    pub fn services(&self) -> impl Iterator<Item = &Arc<dyn LanguageService>> {
        self.services.values()
    }
}

async fn handshake(
    service: &dyn LanguageService,
    client_capabilities: ClientCapabilities,
    root_uri: Option<Url>,
) -> Result<ServerCapabilities, ServiceError> {
    #[allow(deprecated)]
    let params = InitializeParams {
        process_id: Some(std::process::id()),
        root_uri,
        capabilities: client_capabilities,
        ..Default::default()
    };
    let result = service.initialize(params).await?;

    // Edits are forwarded as deltas; a backend that wants full text can't be
    // served.
    if !uses_incremental_sync(&result.capabilities) {
        panic!(
            "{} does not support incremental text synchronization",
            service.id()
        );
    }

    service.initialized();
    Ok(result.capabilities)
}

fn uses_incremental_sync(capabilities: &ServerCapabilities) -> bool {
    let kind = match &capabilities.text_document_sync {
        Some(TextDocumentSyncCapability::Kind(kind)) => Some(*kind),
        Some(TextDocumentSyncCapability::Options(options)) => options.change,
        None => None,
    };
    kind == Some(TextDocumentSyncKind::INCREMENTAL)
}
