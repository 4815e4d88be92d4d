//! OIDC Authenticating Proxy
//!
//! OpenID Connect login in front of any HTTP upstream.

use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use tracing::{error, info};

use oidc_authproxy::{
    cli::{Cli, Command},
    config::Config,
    gate::Gateway,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(Command::Completions { shell }) = cli.command {
        clap_complete::generate(
            shell,
            &mut Cli::command(),
            "oidc-authproxy",
            &mut std::io::stdout(),
        );
        return ExitCode::SUCCESS;
    }

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::CheckConfig) => check_config(&cli),
        Some(Command::Serve | Command::Completions { .. }) | None => run_server(cli).await,
    }
}

fn load_config(cli: &Cli) -> Option<Config> {
    match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            Some(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            None
        }
    }
}

/// Validate configuration and print a summary
fn check_config(cli: &Cli) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };
    println!("✅ Configuration is valid");
    println!("   Listen:   {}:{}", config.server.host, config.server.port);
    println!("   Issuers:  {}", config.oidc.issuers.join(", "));
    println!("   Upstream: {}", config.upstream.url);
    println!(
        "   Login:    {} (callback {})",
        config.gate.login_path, config.gate.callback_path
    );
    ExitCode::SUCCESS
}

async fn run_server(cli: Cli) -> ExitCode {
    let Some(config) = load_config(&cli) else {
        return ExitCode::FAILURE;
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        upstream = %config.upstream.url,
        "Starting OIDC authenticating proxy"
    );

    let gateway = match Gateway::new(config).await {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to start proxy: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = gateway.run().await {
        error!("Proxy error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
