mod cli;
mod config;
mod error;

use clap::{CommandFactory, Parser};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use homelink_core::Agent;

use crate::cli::{Cli, Command, ConfigCommand, GlobalOpts, LogFormat};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose, cli.global.log_format);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        error!(exit_code = code, error = %err, "homelink exiting");
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, format: LogFormat) {
    let filter = match verbosity {
        0 => "info",
        1 => "homelink=debug,homelink_core=debug,homelink_api=debug,info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command.unwrap_or(Command::Run) {
        Command::Completions(args) => {
            let mut cmd = Cli::command();
            clap_complete::generate(args.shell, &mut cmd, "homelink", &mut std::io::stdout());
            Ok(())
        }

        Command::Config(args) => match args.command {
            ConfigCommand::Path => {
                println!("{}", config::config_path(&cli.global).display());
                Ok(())
            }
            ConfigCommand::Show => {
                let cfg = config::load(&cli.global)?;
                print!("{}", cfg.to_redacted_toml().map_err(CliError::from)?);
                Ok(())
            }
        },

        Command::Check => check(&cli.global).await,

        Command::Run => run_agent(&cli.global).await,
    }
}

async fn check(global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load(global)?;
    let agent_config = config::resolve(global, &cfg)?;
    println!("config: ok ({})", config::config_path(global).display());
    println!("server: {}", agent_config.server_url);

    let agent = Agent::from_config(&agent_config)?;
    let status = agent.check_local().await?;
    println!("local:  {} ({status})", agent_config.local_url);
    Ok(())
}

async fn run_agent(global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load(global)?;
    let agent_config = config::resolve(global, &cfg)?;
    let agent = Agent::from_config(&agent_config)?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    info!(
        server = %agent_config.server_url,
        local = %agent_config.local_url,
        version = env!("CARGO_PKG_VERSION"),
        "starting homelink agent"
    );
    agent.run(shutdown).await?;
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
