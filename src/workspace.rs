//! Per-root workspace state: open documents, their services, build settings
//! and the index.

use std::collections::HashMap;
use std::sync::Arc;

use tower_lsp::lsp_types::Url;
use tracing::debug;

use crate::capability::CapabilityRegistry;
use crate::index::SymbolIndex;
use crate::service::LanguageService;
use crate::toolchain::{Language, Toolchain};

/// Supplies per-file build settings. Only the toolchain choice and the
/// change subscription matter to the server.
#[cfg_attr(test, mockall::automock)]
pub trait BuildSettingsProvider: Send + Sync {
    /// Toolchain the build system wants for `uri`, if it has an opinion.
    fn toolchain(&self, uri: &Url, language: &Language) -> Option<Toolchain>;

    fn register_for_change_notifications(&self, uri: &Url, language: &Language);

    fn unregister_for_change_notifications(&self, uri: &Url);
}

/// Provider for workspaces without a build system.
#[derive(Debug, Default)]
pub struct NoBuildSettings;

impl BuildSettingsProvider for NoBuildSettings {
    fn toolchain(&self, _uri: &Url, _language: &Language) -> Option<Toolchain> {
        None
    }

    fn register_for_change_notifications(&self, _uri: &Url, _language: &Language) {}

    fn unregister_for_change_notifications(&self, _uri: &Url) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenDocument {
    pub language: Language,
    pub version: i32,
}

pub struct Workspace {
    pub root_uri: Option<Url>,
    pub capabilities: CapabilityRegistry,
    pub build_settings: Arc<dyn BuildSettingsProvider>,
    pub index: Option<Arc<dyn SymbolIndex>>,
    /// When false the index is only polled on explicit request.
    pub listen_to_unit_events: bool,
    documents: HashMap<Url, OpenDocument>,
    document_service: HashMap<Url, Arc<dyn LanguageService>>,
}

impl Workspace {
    pub fn new(
        root_uri: Option<Url>,
        capabilities: CapabilityRegistry,
        build_settings: Arc<dyn BuildSettingsProvider>,
        index: Option<Arc<dyn SymbolIndex>>,
    ) -> Self {
        Self {
            root_uri,
            capabilities,
            build_settings,
            index,
            listen_to_unit_events: true,
            documents: HashMap::new(),
            document_service: HashMap::new(),
        }
    }

    pub fn open(&mut self, uri: Url, language: Language, version: i32) {
        debug!("Opened {} ({}) at version {}", uri, language, version);
        self.documents.insert(uri, OpenDocument { language, version });
    }

    pub fn close(&mut self, uri: &Url) -> Option<OpenDocument> {
        self.documents.remove(uri)
    }

    pub fn set_version(&mut self, uri: &Url, version: i32) {
        if let Some(document) = self.documents.get_mut(uri) {
            document.version = version;
        }
    }

    pub fn document(&self, uri: &Url) -> Option<&OpenDocument> {
        self.documents.get(uri)
    }

    /// The service already serving `uri`, without starting one.
    pub fn document_service(&self, uri: &Url) -> Option<Arc<dyn LanguageService>> {
        self.document_service.get(uri).cloned()
    }

    pub fn set_document_service(&mut self, uri: Url, service: Arc<dyn LanguageService>) {
        self.document_service.insert(uri, service);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_lsp::lsp_types::ClientCapabilities;

    fn workspace() -> Workspace {
        Workspace::new(
            None,
            CapabilityRegistry::new(ClientCapabilities::default()),
            Arc::new(NoBuildSettings),
            None,
        )
    }

    #[test]
    fn documents_track_open_version_and_close() {
        let mut workspace = workspace();
        let uri = Url::parse("file:///a.swift").unwrap();

        workspace.open(uri.clone(), Language::Swift, 1);
        workspace.set_version(&uri, 4);
        assert_eq!(workspace.document(&uri).unwrap().version, 4);

        let closed = workspace.close(&uri).unwrap();
        assert_eq!(closed.language, Language::Swift);
        assert!(workspace.document(&uri).is_none());
    }

    #[test]
    fn set_version_ignores_unknown_documents() {
        let mut workspace = workspace();
        let uri = Url::parse("file:///a.swift").unwrap();

        workspace.set_version(&uri, 2);
        assert!(workspace.document(&uri).is_none());
    }
}
