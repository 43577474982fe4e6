//! Requests answered by joining a backend's symbol info with index
//! occurrences: workspace symbols, definition, implementation, references.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tower_lsp::jsonrpc;
use tower_lsp::lsp_types::{Location, Position, Range, SymbolInformation, Url};
use tracing::{debug, error};

use crate::index::{NameMatch, SymbolIndex, SymbolOccurrence, SymbolRole};
use crate::protocol::extensions::{SymbolDetails, SymbolInfoParams};
use crate::service::LanguageService;

/// Symbols whose name contains `query`, ignoring case. System locations and
/// accessors are left out.
pub fn workspace_symbols(index: &dyn SymbolIndex, query: &str) -> Vec<SymbolInformation> {
    let matching = NameMatch {
        anchor_start: false,
        anchor_end: false,
        subsequence: false,
        ignore_case: true,
    };

    index
        .canonical_occurrences_matching(query, matching)
        .into_iter()
        .filter(|occurrence| {
            !occurrence.location.is_system && !occurrence.roles.contains(SymbolRole::ACCESSOR_OF)
        })
        .filter_map(|occurrence| {
            let location = location(&occurrence)?;
            #[allow(deprecated)]
            let symbol = SymbolInformation {
                name: occurrence.symbol.name.clone(),
                kind: occurrence.symbol.kind.to_lsp(),
                tags: None,
                deprecated: None,
                location,
                container_name: occurrence.container_name().map(str::to_string),
            };
            Some(symbol)
        })
        .collect()
}

/// Protocol location of an occurrence. The index's UTF-8 column stands in
/// for the UTF-16 character offset, which misplaces positions after
/// multi-byte characters. Occurrences without a usable path yield `None`.
pub fn location(occurrence: &SymbolOccurrence) -> Option<Location> {
    let path = &occurrence.location.path;
    if path.is_empty() {
        return None;
    }
    let uri = Url::from_file_path(path).ok()?;
    let position = Position::new(
        occurrence.location.line.saturating_sub(1),
        occurrence.location.utf8_column.saturating_sub(1),
    );
    Some(Location::new(uri, Range::new(position, position)))
}

fn locations(occurrences: &[SymbolOccurrence]) -> Vec<Location> {
    occurrences.iter().filter_map(location).collect()
}

fn local_declaration(symbol: &SymbolDetails) -> Vec<Location> {
    symbol.best_local_declaration.iter().cloned().collect()
}

/// The symbol's USR together with an index to look it up in, if both exist.
fn indexed<'a>(
    index: Option<&'a dyn SymbolIndex>,
    symbol: &'a SymbolDetails,
) -> Option<(&'a dyn SymbolIndex, &'a str)> {
    Some((index?, symbol.usr.as_deref()?))
}

/// Definitions, then declarations, then the backend's local declaration.
pub fn definition_locations(index: Option<&dyn SymbolIndex>, symbol: &SymbolDetails) -> Vec<Location> {
    let Some((index, usr)) = indexed(index, symbol) else {
        return local_declaration(symbol);
    };

    let mut occurrences = index.occurrences_of_usr(usr, SymbolRole::DEFINITION);
    if occurrences.is_empty() {
        occurrences = index.occurrences_of_usr(usr, SymbolRole::DECLARATION);
    }

    let found = locations(&occurrences);
    if found.is_empty() {
        debug!("No indexed definition for {}, using local declaration", usr);
        return local_declaration(symbol);
    }
    found
}

/// Symbols this one is a base of, else symbols overriding it. Without a USR
/// or an index there is nothing to report.
pub fn implementation_locations(
    index: Option<&dyn SymbolIndex>,
    symbol: &SymbolDetails,
) -> Vec<Location> {
    let Some((index, usr)) = indexed(index, symbol) else {
        return Vec::new();
    };

    let mut occurrences = index.occurrences_of_usr(usr, SymbolRole::BASE_OF);
    if occurrences.is_empty() {
        occurrences = index.occurrences_related_to_usr(usr, SymbolRole::OVERRIDE_OF);
    }
    locations(&occurrences)
}

pub fn reference_locations(
    index: Option<&dyn SymbolIndex>,
    symbol: &SymbolDetails,
    include_declaration: bool,
) -> Vec<Location> {
    let Some((index, usr)) = indexed(index, symbol) else {
        return Vec::new();
    };

    let mut roles = SymbolRole::REFERENCE;
    if include_declaration {
        roles |= SymbolRole::DECLARATION | SymbolRole::DEFINITION;
    }
    locations(&index.occurrences_of_usr(usr, roles))
}

/// Asks `service` what symbol is at the position, then runs `resolve` on the
/// first one off the async runtime. No symbols yields an empty list.
pub async fn resolve_symbol_locations<F>(
    service: Arc<dyn LanguageService>,
    params: SymbolInfoParams,
    cancel: CancellationToken,
    index: Option<Arc<dyn SymbolIndex>>,
    resolve: F,
) -> Result<Vec<Location>, jsonrpc::Error>
where
    F: FnOnce(Option<&dyn SymbolIndex>, &SymbolDetails) -> Vec<Location> + Send + 'static,
{
    let symbols = service.symbol_info(params, cancel).await?.unwrap_or_default();
    let Some(symbol) = symbols.into_iter().next() else {
        return Ok(Vec::new());
    };

    tokio::task::spawn_blocking(move || resolve(index.as_deref(), &symbol))
        .await
        .map_err(|e| {
            error!("Index query failed: {}", e);
            jsonrpc::Error::internal_error()
        })
}
