//! Requests outside the base protocol, plus a references request whose
//! `includeDeclaration` may be omitted.

use serde::{Deserialize, Serialize};
use tower_lsp::lsp_types::request::Request;
use tower_lsp::lsp_types::{
    Location, Position, SymbolKind, TextDocumentIdentifier, TextDocumentPositionParams,
};

/// `textDocument/symbolInfo`: what symbol is under the cursor.
pub enum SymbolInfo {}

impl Request for SymbolInfo {
    type Params = SymbolInfoParams;
    type Result = Option<Vec<SymbolDetails>>;
    const METHOD: &'static str = "textDocument/symbolInfo";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfoParams {
    pub text_document: TextDocumentIdentifier,
    pub position: Position,
}

impl From<TextDocumentPositionParams> for SymbolInfoParams {
    fn from(params: TextDocumentPositionParams) -> Self {
        Self {
            text_document: params.text_document,
            position: params.position,
        }
    }
}

/// A backend's local knowledge about one symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// Globally unique symbol reference, when the backend knows one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_local_declaration: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SymbolKind>,
}

/// `workspace/_pollIndex`: wait until the index has absorbed pending unit
/// changes.
pub enum PollIndex {}

impl Request for PollIndex {
    type Params = Option<()>;
    type Result = ();
    const METHOD: &'static str = "workspace/_pollIndex";
}

/// `textDocument/references`
pub enum FindReferences {}

impl Request for FindReferences {
    type Params = ReferencesParams;
    type Result = Option<Vec<Location>>;
    const METHOD: &'static str = "textDocument/references";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferencesParams {
    #[serde(flatten)]
    pub text_document_position: TextDocumentPositionParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ReferencesContext>,
}

impl ReferencesParams {
    /// Declarations are included unless the client explicitly opts out.
    pub fn include_declaration(&self) -> bool {
        self.context
            .as_ref()
            .and_then(|c| c.include_declaration)
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferencesContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_declaration: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn include_declaration_defaults_to_true() {
        let params: ReferencesParams = serde_json::from_value(json!({
            "textDocument": {"uri": "file:///a.swift"},
            "position": {"line": 1, "character": 2}
        }))
        .unwrap();
        assert!(params.include_declaration());

        let params: ReferencesParams = serde_json::from_value(json!({
            "textDocument": {"uri": "file:///a.swift"},
            "position": {"line": 1, "character": 2},
            "context": {}
        }))
        .unwrap();
        assert!(params.include_declaration());
    }

    #[test]
    fn include_declaration_honours_explicit_false() {
        let params: ReferencesParams = serde_json::from_value(json!({
            "textDocument": {"uri": "file:///a.swift"},
            "position": {"line": 1, "character": 2},
            "context": {"includeDeclaration": false}
        }))
        .unwrap();
        assert!(!params.include_declaration());
    }
}
