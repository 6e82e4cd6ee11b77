//! `bridgemcp-server` CLI entry point (spec §1: the CLI itself is out of
//! scope for the subsystem, but a minimal bootable binary is the only way
//! to actually run it, so this follows `turbomcp-proxy`'s thin
//! clap-driven `main` rather than inventing a bespoke launcher).

use clap::Parser;

/// The MCP OAuth gateway: dual-role authorization server plus resumable
/// transport, bootstrapped from a TOML config file and `BRIDGEMCP_*` env
/// overrides.
#[derive(Parser, Debug)]
#[command(name = "bridgemcp-server", version, about)]
struct Cli {
    /// Path to a TOML config file (without extension), e.g. `config/prod`.
    #[arg(short, long)]
    config: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    use tracing::Level;
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = bridgemcp_server::ServerConfig::load(cli.config.as_deref())?;
    let server = bridgemcp_server::bootstrap(config).await?;
    bridgemcp_server::serve(server).await
}
