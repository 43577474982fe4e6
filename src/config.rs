use std::path::PathBuf;

use crate::toolchain::{Toolchain, ToolchainRegistry};

/// Name used for the data directory and the log file.
pub const APP_NAME: &str = "toolchain-lsp";

/// Returns the path to the data directory for toolchain-lsp.
/// Uses $XDG_DATA_HOME/toolchain-lsp if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/toolchain-lsp,
/// or ./toolchain-lsp if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the path to the log file.
pub fn log_path() -> PathBuf {
    data_dir().join(format!("{APP_NAME}.log"))
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join(APP_NAME)
}

/// Server options assembled from the command line.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Toolchains the server may start backends from.
    pub toolchains: Vec<Toolchain>,
    /// Identifier of the toolchain preferred when build settings don't pick one.
    pub default_toolchain: Option<String>,
    /// JSON dump of index occurrences to serve symbol queries from.
    pub index_snapshot: Option<PathBuf>,
    /// Extra arguments passed to every clangd backend.
    pub clangd_args: Vec<String>,
}

impl Options {
    pub fn toolchain_registry(&self) -> ToolchainRegistry {
        ToolchainRegistry::new(self.toolchains.clone(), self.default_toolchain.as_deref())
    }
}

/// Parses a `--toolchain ID=PATH` argument.
pub fn parse_toolchain_arg(arg: &str) -> Result<Toolchain, String> {
    let (identifier, root) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected ID=PATH, got `{arg}`"))?;
    if identifier.is_empty() {
        return Err("toolchain identifier must not be empty".to_string());
    }
    Ok(Toolchain::from_root(identifier, PathBuf::from(root)))
}
