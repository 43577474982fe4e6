use std::path::PathBuf;

use clap::Parser;
use tracing::error;

use toolchain_lsp::config::{Options, parse_toolchain_arg};
use toolchain_lsp::lsp::server::run_server;
use toolchain_lsp::toolchain::Toolchain;

/// Language server that routes each document to a backend from the right
/// toolchain.
#[derive(Debug, Parser)]
#[command(name = "toolchain-lsp", version, about)]
struct Args {
    /// Toolchain to serve from, as ID=PATH. Repeatable; the first one is the
    /// default unless --default-toolchain says otherwise.
    #[arg(long = "toolchain", value_name = "ID=PATH", value_parser = parse_toolchain_arg)]
    toolchains: Vec<Toolchain>,

    /// Identifier of the preferred toolchain.
    #[arg(long)]
    default_toolchain: Option<String>,

    /// JSON snapshot of index occurrences.
    #[arg(long, value_name = "PATH")]
    index_snapshot: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, value_name = "DIRECTIVE")]
    log_level: Option<String>,

    /// Extra argument passed to clangd. Repeatable.
    #[arg(long = "clangd-arg", value_name = "ARG", allow_hyphen_values = true)]
    clangd_args: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // A panic anywhere means a broken invariant; the editor restarts us.
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        error!("Fatal: {}", info);
        default_hook(info);
        std::process::exit(101);
    }));

    let options = Options {
        toolchains: args.toolchains,
        default_toolchain: args.default_toolchain,
        index_snapshot: args.index_snapshot,
        clangd_args: args.clangd_args,
    };

    let code = run_server(options, args.log_level.as_deref()).await?;
    std::process::exit(code);
}
