//! Toolchains and the languages they can serve.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Document language, as identified by the client's `languageId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Language {
    Swift,
    C,
    Cpp,
    ObjectiveC,
    ObjectiveCpp,
    Other(String),
}

impl Language {
    pub fn from_id(id: &str) -> Self {
        match id {
            "swift" => Language::Swift,
            "c" => Language::C,
            "cpp" => Language::Cpp,
            "objective-c" => Language::ObjectiveC,
            "objective-cpp" => Language::ObjectiveCpp,
            other => Language::Other(other.to_string()),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Language::Swift => "swift",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::ObjectiveC => "objective-c",
            Language::ObjectiveCpp => "objective-cpp",
            Language::Other(id) => id,
        }
    }

    /// The compiler service able to analyse this language, if any.
    pub fn service_kind(&self) -> Option<ServiceKind> {
        match self {
            Language::Swift => Some(ServiceKind::SourceKit),
            Language::C | Language::Cpp | Language::ObjectiveC | Language::ObjectiveCpp => {
                Some(ServiceKind::Clangd)
            }
            Language::Other(_) => None,
        }
    }
}

impl From<String> for Language {
    fn from(id: String) -> Self {
        Language::from_id(&id)
    }
}

impl From<Language> for String {
    fn from(language: Language) -> Self {
        language.id().to_string()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Kinds of compiler-service binaries a toolchain may ship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    /// Serves the managed high-level language.
    SourceKit,
    /// Serves the C family.
    Clangd,
}

impl ServiceKind {
    pub fn binary_name(self) -> &'static str {
        match self {
            ServiceKind::SourceKit => "sourcekit-lsp",
            ServiceKind::Clangd => "clangd",
        }
    }
}

/// An installation bundle exposing zero or more compiler-service binaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub identifier: String,
    pub display_name: String,
    pub sourcekit: Option<PathBuf>,
    pub clangd: Option<PathBuf>,
}

impl Toolchain {
    pub fn new(identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        Self {
            display_name: identifier.clone(),
            identifier,
            sourcekit: None,
            clangd: None,
        }
    }

    pub fn with_sourcekit(mut self, path: impl Into<PathBuf>) -> Self {
        self.sourcekit = Some(path.into());
        self
    }

    pub fn with_clangd(mut self, path: impl Into<PathBuf>) -> Self {
        self.clangd = Some(path.into());
        self
    }

    /// Builds a toolchain from an installation root, picking up whichever
    /// service binaries exist under `usr/bin`.
    pub fn from_root(identifier: &str, root: PathBuf) -> Self {
        let bin = root.join("usr").join("bin");
        let find = |kind: ServiceKind| existing(&bin.join(kind.binary_name()));
        Self {
            identifier: identifier.to_string(),
            display_name: identifier.to_string(),
            sourcekit: find(ServiceKind::SourceKit),
            clangd: find(ServiceKind::Clangd),
        }
    }

    pub fn service_binary(&self, kind: ServiceKind) -> Option<&Path> {
        match kind {
            ServiceKind::SourceKit => self.sourcekit.as_deref(),
            ServiceKind::Clangd => self.clangd.as_deref(),
        }
    }

    /// True when the toolchain ships the compiler service for `language`.
    pub fn supports(&self, language: &Language) -> bool {
        language
            .service_kind()
            .is_some_and(|kind| self.service_binary(kind).is_some())
    }
}

fn existing(path: &Path) -> Option<PathBuf> {
    path.is_file().then(|| path.to_path_buf())
}

/// All toolchains known to the server, with one optional default.
#[derive(Debug, Clone, Default)]
pub struct ToolchainRegistry {
    toolchains: Vec<Toolchain>,
    default: Option<usize>,
}

impl ToolchainRegistry {
    /// The default is the toolchain named by `default_id`, or the first one.
    pub fn new(toolchains: Vec<Toolchain>, default_id: Option<&str>) -> Self {
        let default = match default_id {
            Some(id) => toolchains.iter().position(|t| t.identifier == id),
            None if toolchains.is_empty() => None,
            None => Some(0),
        };
        Self {
            toolchains,
            default,
        }
    }

    pub fn default_toolchain(&self) -> Option<&Toolchain> {
        self.default.map(|i| &self.toolchains[i])
    }

    /// The default toolchain if it supports `language`, else the first that does.
    pub fn toolchain_for(&self, language: &Language) -> Option<&Toolchain> {
        if let Some(toolchain) = self.default_toolchain().filter(|t| t.supports(language)) {
            return Some(toolchain);
        }
        self.toolchains.iter().find(|t| t.supports(language))
    }
}
