//! Dynamic capability registrations issued to the client.
//!
//! Only completion is tracked today. Each further capability kind gets its
//! own map and its own arm in [`CapabilityRegistry::remove`].

use std::collections::HashSet;

use indexmap::IndexMap;
use tower_lsp::lsp_types::request::{Completion, Request};
use tower_lsp::lsp_types::{
    ClientCapabilities, CompletionOptions, CompletionRegistrationOptions, DocumentFilter,
    DocumentSelector, Registration, TextDocumentRegistrationOptions,
};
use tracing::debug;

use crate::toolchain::Language;

pub struct CapabilityRegistry {
    client_capabilities: ClientCapabilities,
    /// Completion registrations keyed by registration id.
    completion: IndexMap<String, CompletionRegistrationOptions>,
    next_id: u64,
}

impl CapabilityRegistry {
    pub fn new(client_capabilities: ClientCapabilities) -> Self {
        Self {
            client_capabilities,
            completion: IndexMap::new(),
            next_id: 0,
        }
    }

    pub fn client_capabilities(&self) -> &ClientCapabilities {
        &self.client_capabilities
    }

    pub fn client_has_dynamic_completion_registration(&self) -> bool {
        self.client_capabilities
            .text_document
            .as_ref()
            .and_then(|td| td.completion.as_ref())
            .and_then(|c| c.dynamic_registration)
            == Some(true)
    }

    pub fn client_supports_work_done_progress(&self) -> bool {
        self.client_capabilities
            .window
            .as_ref()
            .and_then(|w| w.work_done_progress)
            == Some(true)
    }

    /// Registers completion for `languages` unless the client can't take
    /// dynamic registrations or one of the languages is already covered.
    /// `register_on_client` performs the client-facing call.
    pub fn register_completion_if_needed(
        &mut self,
        options: CompletionOptions,
        languages: &[Language],
        register_on_client: impl FnOnce(Registration),
    ) {
        if !self.client_has_dynamic_completion_registration()
            || self.has_completion_registrations(languages)
        {
            return;
        }

        let registration_options = CompletionRegistrationOptions {
            text_document_registration_options: TextDocumentRegistrationOptions {
                document_selector: Some(document_selector(languages)),
            },
            completion_options: options,
        };
        let registration = Registration {
            id: self.next_registration_id(Completion::METHOD),
            method: Completion::METHOD.to_string(),
            register_options: serde_json::to_value(&registration_options).ok(),
        };

        debug!(
            "Registering completion for {:?} as {}",
            languages.iter().map(Language::id).collect::<Vec<_>>(),
            registration.id
        );
        self.completion
            .insert(registration.id.clone(), registration_options);

        register_on_client(registration);
    }

    /// Drops a stored registration, e.g. when the client rejected it.
    pub fn remove(&mut self, registration: &Registration) {
        if registration.method == Completion::METHOD {
            self.completion.shift_remove(&registration.id);
        }
    }

    pub fn completion_registrations(&self) -> impl Iterator<Item = &CompletionRegistrationOptions> {
        self.completion.values()
    }

    fn has_completion_registrations(&self, languages: &[Language]) -> bool {
        has_any_registrations(
            languages,
            self.completion_registrations()
                .map(|options| &options.text_document_registration_options),
        )
    }

    fn next_registration_id(&mut self, method: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", method, self.next_id)
    }
}

fn document_selector(languages: &[Language]) -> DocumentSelector {
    languages
        .iter()
        .map(|language| DocumentFilter {
            language: Some(language.id().to_string()),
            scheme: None,
            pattern: None,
        })
        .collect()
}

/// True when any registration's selector names one of `languages`.
fn has_any_registrations<'a>(
    languages: &[Language],
    registrations: impl IntoIterator<Item = &'a TextDocumentRegistrationOptions>,
) -> bool {
    let language_ids: HashSet<&str> = languages.iter().map(Language::id).collect();

    registrations
        .into_iter()
        .filter_map(|options| options.document_selector.as_ref())
        .flatten()
        .filter_map(|filter| filter.language.as_deref())
        .any(|language| language_ids.contains(language))
}
