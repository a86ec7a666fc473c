use anyhow::Context;
use beads_graph::{GraphMerger, GraphMirror};
use beads_stream::HttpTransport;
use beads_sync::{HttpBackend, NoticeLevel, SnapshotSource, SyncConfig, SyncEngine, SyncSignal};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("beads-monitor")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Live view of a beads task graph")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("base-url")
                .long("base-url")
                .global(true)
                .help("Backend base URL, overrides the config file"),
        )
        .arg(
            Arg::new("poll-secs")
                .long("poll-secs")
                .global(true)
                .value_parser(value_parser!(u64).range(1..))
                .help("Safety-net snapshot interval in seconds"),
        )
        .arg(
            Arg::new("no-bus")
                .long("no-bus")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Do not open the agent bus channel"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(Command::new("watch").about("Follow the graph until interrupted (default)"))
        .subcommand(
            Command::new("snapshot")
                .about("Fetch one snapshot and print a summary")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Config file (or defaults) with command-line overrides applied
fn load_config(matches: &ArgMatches) -> anyhow::Result<SyncConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => SyncConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SyncConfig::default(),
    };
    if let Some(url) = matches.get_one::<String>("base-url") {
        config = config.with_base_url(url.as_str());
    }
    if let Some(secs) = matches.get_one::<u64>("poll-secs") {
        config = config.with_poll_interval(Duration::from_secs(*secs));
    }
    if matches.get_flag("no-bus") {
        config = config.without_bus();
    }
    config.validate()?;
    Ok(config)
}

async fn watch(config: SyncConfig) -> anyhow::Result<()> {
    let backend = Arc::new(HttpBackend::new(config.clone()));
    let engine = SyncEngine::init(
        config,
        Arc::new(HttpTransport::new()),
        backend.clone(),
        backend,
    )?;
    let mut signals = engine.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            signal = signals.recv() => match signal {
                Ok(signal) => log_signal(&signal),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "monitor fell behind");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    engine.teardown().await;
    Ok(())
}

fn log_signal(signal: &SyncSignal) {
    match signal {
        SyncSignal::StructuralChange { added, removed } => {
            tracing::info!(added = added.len(), removed = removed.len(), "structure changed");
        }
        SyncSignal::AttributesChanged { updated } => {
            tracing::debug!(updated = updated.len(), "attributes changed");
        }
        SyncSignal::StatusTransition { id, from, to } => {
            tracing::info!(%id, from = from.as_str(), to = to.as_str(), "status");
        }
        SyncSignal::NodePatched { id } => tracing::info!(%id, "patched"),
        SyncSignal::Connectivity { state, attempt } => {
            tracing::info!(state = ?state, attempt, "connectivity");
        }
        SyncSignal::PinsReleased { count } => tracing::debug!(count, "layout released"),
        SyncSignal::Bus(event) => {
            tracing::info!(
                channel = %event.channel,
                kind = %event.kind,
                issue = event.issue_id.as_deref().unwrap_or("-"),
                "bus"
            );
        }
        SyncSignal::Notice { level, message } => match level {
            NoticeLevel::Error => tracing::error!("{message}"),
            NoticeLevel::Warning => tracing::warn!("{message}"),
            NoticeLevel::Info => tracing::info!("{message}"),
        },
    }
}

async fn snapshot(config: SyncConfig, json: bool) -> anyhow::Result<()> {
    let mut mirror = GraphMirror::with_filter(config.filter.clone());
    let mut merger = GraphMerger::new(config.merge);
    let snapshot = HttpBackend::new(config).fetch().await?;
    merger.merge(&mut mirror, snapshot);

    let mut by_status: BTreeMap<&str, usize> = BTreeMap::new();
    for node in mirror.nodes() {
        *by_status.entry(node.attrs.status.as_str()).or_default() += 1;
    }
    let blocked = mirror.nodes().filter(|n| n.flags.blocked).count();

    if json {
        let summary = serde_json::json!({
            "nodes": mirror.node_count(),
            "links": mirror.link_count(),
            "blocked": blocked,
            "by_status": by_status,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Nodes:   {}", mirror.node_count());
        println!("Links:   {}", mirror.link_count());
        println!("Blocked: {blocked}");
        for (status, count) in &by_status {
            println!("  {status:<12} {count}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json-logs"));
    let config = load_config(&matches)?;

    match matches.subcommand() {
        Some(("snapshot", args)) => snapshot(config, args.get_flag("json")).await,
        _ => watch(config).await,
    }
}
