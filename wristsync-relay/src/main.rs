// WristSync relay: serves exercises from the phone role, fetches them from the watch role.

mod config;
mod identifier;
mod store;
mod transport;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wristsync_core::relay::pump_inbound;
use wristsync_core::{
    Activatable, DeviceIdentificationUseCase, ExerciseEntity, ExerciseRequestHandler,
    ExercisesState, InboundDispatcher, Locale, RecentExercisesViewModel, ResultState,
    SearchExercisesViewModel, SessionSync, SessionSyncRepository,
};

use crate::config::Config;
use crate::identifier::FileDeviceIdentifier;
use crate::transport::{Role, TcpRelay};

#[derive(Parser)]
#[command(name = "wristsync-relay", version, about = "Phone/watch exercise sync relay")]
struct Cli {
    /// Config file; defaults to ~/.config/wristsync/config.toml then /etc/wristsync/config.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Phone role: serve exercise requests until interrupted.
    Serve,
    /// Watch role: fetch recently used exercises once.
    Fetch {
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Watch role: search exercises by name once.
    Search {
        query: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Print this installation's device identity.
    Identity,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref());
    init_logging(&cfg);

    let identity_use_case =
        DeviceIdentificationUseCase::new(Arc::new(FileDeviceIdentifier::new(&cfg.identity_file)));
    let identity = identity_use_case.get_or_create_device_identity();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match cli.command {
            Command::Serve => serve(&cfg, identity.identifier).await,
            Command::Fetch { limit } => fetch(&cfg, identity.identifier, limit).await,
            Command::Search { query, limit } => {
                search(&cfg, identity.identifier, query, limit).await
            }
            Command::Identity => {
                println!("{} (created {})", identity.identifier, identity.created_at.to_rfc3339());
                Ok(())
            }
        }
    })
}

fn init_logging(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn serve(cfg: &Config, identifier: String) -> anyhow::Result<()> {
    let repo = Arc::new(store::load_exercises(&cfg.data_file)?);
    let handler = Arc::new(ExerciseRequestHandler::new(repo, Locale::current()));
    let bind: SocketAddr = ([0, 0, 0, 0], cfg.port).into();
    let (relay, inbound) = TcpRelay::new(Role::Phone { bind }, identifier);
    relay.activate();
    tokio::spawn(pump_inbound(
        inbound,
        InboundDispatcher::new().with_handler(handler),
        relay.clone(),
    ));
    shutdown_signal().await?;
    tracing::info!("shutting down");
    Ok(())
}

/// Watch side plumbing: relay, session repository and inbound pump.
fn connect_watch(cfg: &Config, identifier: String) -> Arc<SessionSync> {
    let role = Role::Watch {
        peer: cfg.peer_addr.clone(),
        reconnect_interval: cfg.reconnect_interval(),
    };
    let (relay, inbound) = TcpRelay::new(role, identifier);
    let session = Arc::new(SessionSync::new(relay.clone()));
    tokio::spawn(pump_inbound(
        inbound,
        InboundDispatcher::new().with_session(session.clone()),
        relay.clone(),
    ));
    relay.activate();
    session
}

/// Give the first connect attempt a chance before checking reachability.
async fn settle(cfg: &Config, session: &SessionSync) {
    let deadline = tokio::time::Instant::now() + cfg.reconnect_interval();
    while !session.is_reachable() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
}

async fn fetch(cfg: &Config, identifier: String, limit: u32) -> anyhow::Result<()> {
    let session = connect_watch(cfg, identifier);
    settle(cfg, &session).await;
    let mut vm = RecentExercisesViewModel::new(session, limit);
    vm.fetch();
    let state = vm.wait_for_reply(cfg.reply_timeout()).await.clone();
    report(&state)
}

async fn search(
    cfg: &Config,
    identifier: String,
    query: Option<String>,
    limit: u32,
) -> anyhow::Result<()> {
    let session = connect_watch(cfg, identifier);
    settle(cfg, &session).await;
    let mut vm = SearchExercisesViewModel::new(session, limit);
    vm.search(query);
    let state = vm.wait_for_reply(cfg.reply_timeout()).await.clone();
    report(&state)
}

fn report(state: &ExercisesState) -> anyhow::Result<()> {
    match state {
        ResultState::Success(exercises) => {
            for e in exercises {
                println!("{}", describe(e));
            }
            Ok(())
        }
        ResultState::Failure(e) => {
            eprintln!("{}", e.user_message());
            Err(anyhow::Error::new(e.clone()).context("request failed"))
        }
        ResultState::Idle | ResultState::Loading => Err(anyhow::anyhow!("no result")),
    }
}

fn describe(e: &ExerciseEntity) -> String {
    let mut line = format!("{}\t{}", e.id, e.name);
    if e.is_official == Some(true) {
        line.push_str("\t[official]");
    }
    if let Some(count) = e.use_count {
        line.push_str(&format!("\tused {count}x"));
    }
    if let Some(at) = e.last_used_at {
        line.push_str(&format!("\tlast {}", at.format("%Y-%m-%d")));
    }
    line
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_lists_known_fields_only() {
        let plain = ExerciseEntity::new("plank", "Plank");
        assert_eq!(describe(&plain), "plank\tPlank");
        let rich = ExerciseEntity::new("sq", "Squat")
            .with_official(true)
            .with_use_count(4);
        assert_eq!(describe(&rich), "sq\tSquat\t[official]\tused 4x");
    }

    #[test]
    fn failure_report_is_an_error() {
        let state: ExercisesState =
            ResultState::Failure(wristsync_core::NetworkError::NoConnection.into());
        assert!(report(&state).is_err());
        assert!(report(&ResultState::Success(vec![])).is_ok());
    }
}
