//! Orchestra CLI entry point.

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use orchestra::config::Config;
use orchestra::daemon::{self, DaemonPaths, IpcCommand};

#[derive(Parser)]
#[command(name = "orchestra", version)]
#[command(about = "A three-tier agentic task orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to a TOML config file (optional; env vars always apply)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Start the process (default when no subcommand is given)
    Start {
        /// Run in the foreground instead of daemonizing
        #[arg(short, long)]
        foreground: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Restart the daemon (stop + start)
    Restart {
        #[arg(short, long)]
        foreground: bool,
    },
    /// Show status of the running daemon
    Status,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Start { foreground: false });

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path).context("failed to load config")?,
        None => Config::load().context("failed to load config")?,
    };
    let paths = DaemonPaths::new(&config.instance_dir);

    match command {
        Command::Status => cmd_status(&paths),
        Command::Stop => cmd_stop(&paths),
        Command::Restart { foreground } => {
            cmd_stop(&paths)?;
            cmd_start(config, &paths, foreground, cli.debug)
        }
        Command::Start { foreground } => cmd_start(config, &paths, foreground, cli.debug),
    }
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

fn cmd_status(paths: &DaemonPaths) -> anyhow::Result<()> {
    match daemon::is_running(paths) {
        Some(pid) => {
            let rt = runtime()?;
            match rt.block_on(daemon::send_command(paths, IpcCommand::Status)) {
                Ok(daemon::IpcResponse::Status { pid, uptime_seconds }) => {
                    println!("running (pid {pid}, uptime {uptime_seconds}s)");
                }
                _ => println!("running (pid {pid})"),
            }
        }
        None => println!("not running"),
    }
    Ok(())
}

fn cmd_stop(paths: &DaemonPaths) -> anyhow::Result<()> {
    let Some(pid) = daemon::is_running(paths) else {
        println!("not running");
        return Ok(());
    };
    let rt = runtime()?;
    rt.block_on(daemon::send_command(paths, IpcCommand::Shutdown))
        .context("failed to send shutdown command")?;
    if daemon::wait_for_exit(pid) {
        daemon::cleanup(paths);
        println!("stopped");
    } else {
        anyhow::bail!("daemon did not exit within the timeout");
    }
    Ok(())
}

fn cmd_start(
    config: Config,
    paths: &DaemonPaths,
    foreground: bool,
    debug: bool,
) -> anyhow::Result<()> {
    if let Some(pid) = daemon::is_running(paths) {
        anyhow::bail!("orchestra is already running (pid {pid})");
    }

    if !foreground {
        daemon::daemonize(paths)?;
        let _provider = daemon::init_background_tracing(paths, debug, &config.telemetry);
    } else {
        let _provider = daemon::init_foreground_tracing(debug, &config.telemetry);
    }

    let rt = runtime()?;
    rt.block_on(async move {
        let (_shutdown_rx, _ipc_handle) = daemon::start_ipc_server(paths).await?;
        orchestra::gateway::run_gateway(config).await
    })?;

    daemon::cleanup(paths);
    Ok(())
}
