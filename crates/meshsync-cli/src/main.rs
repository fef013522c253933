//! Headless mesh dashboard CLI.
//!
//! Provides the `meshsync` binary: `chat` for the messaging dashboard,
//! `watch` for the network testbed visualizer, and `toggle-link` to flip a
//! link on the testbed. Settings come from `MESHSYNC_*` environment
//! variables; flags override them. Logs go to stderr (`RUST_LOG`).

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use meshsync_client::{ClientError, Dashboard, SessionEvent, SyncConfig, SyncSession};
use meshsync_core::{EntityId, Event, EventId, TempId, TimelineEntry};
use meshsync_store::CircularLayout;

/// Headless client for the mesh chat and testbed dashboards.
#[derive(Parser)]
#[command(name = "meshsync", about = "Headless client for the mesh dashboards")]
struct Cli {
    /// Backend host:port (overrides MESHSYNC_SERVER).
    #[arg(long, global = true)]
    server: Option<String>,

    /// Reconnect delay in milliseconds (overrides MESHSYNC_RECONNECT_MS).
    #[arg(long, global = true)]
    reconnect_ms: Option<u64>,

    /// Retained event-log size (overrides MESHSYNC_RETAIN).
    #[arg(long, global = true)]
    retain: Option<usize>,

    /// SQLite file for persisted edge slots (overrides MESHSYNC_SLOT_DB).
    #[arg(long, global = true)]
    slot_db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the chat timeline and optionally send one message.
    Chat {
        /// Peer to converse with.
        #[arg(long)]
        to: Option<String>,

        /// Message to send to --to.
        #[arg(long, requires = "to")]
        message: Option<String>,

        /// Keep streaming new messages.
        #[arg(long)]
        follow: bool,
    },
    /// Stream testbed traffic, topology changes, and edge slot hints.
    Watch,
    /// Toggle the directed link FROM -> TO on the testbed.
    ToggleLink {
        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let base = match SyncConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let mut config = base;
    if let Some(server) = cli.server {
        config.server = server;
    }
    if let Some(ms) = cli.reconnect_ms {
        config.reconnect_delay = Duration::from_millis(ms);
    }
    if let Some(retain) = cli.retain {
        config.retained_events = retain;
    }
    if cli.slot_db.is_some() {
        config.slot_db = cli.slot_db;
    }
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    let exit_code = match cli.command {
        Commands::Chat {
            to,
            message,
            follow,
        } => {
            config.dashboard = Dashboard::Chat;
            run_chat(config, to.map(EntityId::new), message, follow).await
        }
        Commands::Watch => {
            config.dashboard = Dashboard::Visualizer;
            run_watch(config).await
        }
        Commands::ToggleLink { from, to } => {
            config.dashboard = Dashboard::Visualizer;
            run_toggle(config, EntityId::new(from), EntityId::new(to)).await
        }
    };
    process::exit(exit_code);
}

/// Exit codes: 0 = success, 1 = usage or config error, 2 = backend
/// unreachable or rejected, 3 = local storage failure.
fn exit_code(error: &ClientError) -> i32 {
    match error {
        ClientError::Config(_)
        | ClientError::NoIdentity
        | ClientError::Unsupported { .. }
        | ClientError::Tracker(_) => 1,
        ClientError::Store(_) => 3,
        ClientError::Http(_)
        | ClientError::Status { .. }
        | ClientError::Rejected { .. }
        | ClientError::Decode { .. } => 2,
    }
}

fn fail(context: &str, error: ClientError) -> i32 {
    eprintln!("Error: {}: {}", context, error);
    exit_code(&error)
}

async fn run_chat(
    config: SyncConfig,
    to: Option<EntityId>,
    message: Option<String>,
    follow: bool,
) -> i32 {
    let mut session = match SyncSession::connect(config).await {
        Ok(s) => s,
        Err(e) => return fail("failed to load chat state", e),
    };
    if let Some(identity) = session.identity() {
        eprintln!("as {} ({})", identity.node_name, identity.node_id);
    }

    let mut code = 0;
    if let (Some(peer), Some(text)) = (to.clone(), message) {
        match session.submit(Some(peer), text) {
            Ok(temp_id) => code = await_write(&mut session, &temp_id).await,
            Err(e) => return fail("cannot send", e),
        }
    }

    let mut shown = match &to {
        Some(peer) => match session.conversation(peer) {
            Ok(entries) => {
                entries.iter().for_each(print_entry);
                entries.len()
            }
            Err(e) => return fail("cannot show conversation", e),
        },
        None => {
            let timeline = session.timeline();
            timeline.entries().iter().for_each(print_entry);
            timeline.len()
        }
    };

    if follow {
        loop {
            tokio::select! {
                event = session.next() => match event {
                    Some(SessionEvent::Merged(outcome)) => {
                        for id in &outcome.admitted {
                            if let Some(event) = find_event(&session, id) {
                                let relevant = match (&to, session.identity()) {
                                    (None, _) => true,
                                    (Some(peer), Some(me)) => {
                                        event.is_between(&me.node_id, peer)
                                    }
                                    (Some(_), None) => false,
                                };
                                if relevant {
                                    print_event(event);
                                    shown += 1;
                                }
                            }
                        }
                    }
                    Some(SessionEvent::Connected) => eprintln!("-- online"),
                    Some(SessionEvent::Disconnected) => eprintln!("-- offline, reconnecting"),
                    Some(_) => {}
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    session.close();
                    break;
                }
            }
        }
    }

    tracing::debug!(shown, "chat output finished");
    session.close();
    code
}

/// Drives the session until the write for `temp_id` resolves.
async fn await_write(session: &mut SyncSession, temp_id: &TempId) -> i32 {
    while let Some(event) = session.next().await {
        match event {
            SessionEvent::Confirmed {
                temp_id: done,
                confirmation,
            } if &done == temp_id => {
                if confirmation.is_visible() {
                    eprintln!("sent as {}", confirmation.id());
                } else {
                    eprintln!(
                        "sent as {} (older than the retained window)",
                        confirmation.id()
                    );
                }
                return 0;
            }
            SessionEvent::Failed {
                temp_id: done,
                reason,
            } if &done == temp_id => {
                eprintln!("Error: send failed: {}", reason);
                return 2;
            }
            _ => {}
        }
    }
    2
}

async fn run_watch(config: SyncConfig) -> i32 {
    let mut session = match SyncSession::connect(config).await {
        Ok(s) => s,
        Err(e) => return fail("failed to load testbed state", e),
    };
    let mut layout = CircularLayout::new();

    println!("{} nodes online", session.engine().entities().count());
    for event in session.engine().events() {
        print_event(event);
    }
    if let Err(e) = print_topology(&mut session, &mut layout) {
        return fail("slot table", e);
    }

    loop {
        tokio::select! {
            event = session.next() => match event {
                Some(SessionEvent::Merged(outcome)) => {
                    for id in &outcome.admitted {
                        if let Some(event) = find_event(&session, id) {
                            print_event(event);
                        }
                    }
                    if outcome.entities_changed || outcome.adjacency_changed {
                        if let Err(e) = print_topology(&mut session, &mut layout) {
                            return fail("slot table", e);
                        }
                    }
                }
                Some(SessionEvent::Connected) => eprintln!("-- online"),
                Some(SessionEvent::Disconnected) => eprintln!("-- offline, reconnecting"),
                Some(_) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                session.close();
                break;
            }
        }
    }
    0
}

async fn run_toggle(config: SyncConfig, from: EntityId, to: EntityId) -> i32 {
    let mut session = match SyncSession::connect(config).await {
        Ok(s) => s,
        Err(e) => return fail("failed to load testbed state", e),
    };
    let existed = session.engine().adjacency().contains(&from, &to);
    let code = match session.toggle_link(&from, &to).await {
        Ok(()) => {
            let verb = if existed { "unlinked" } else { "linked" };
            println!("{} {} -> {}", verb, from, to);
            0
        }
        Err(e) => fail("toggle failed", e),
    };
    session.close();
    code
}

fn print_topology(
    session: &mut SyncSession,
    layout: &mut CircularLayout,
) -> Result<(), ClientError> {
    let ids: Vec<EntityId> = session.engine().entities().map(|e| e.id.clone()).collect();
    layout.arrange(&ids);
    println!("topology:");
    for hint in session.edge_hints(&*layout)? {
        match hint.slots {
            Some(slots) => println!("  {} [{} -> {}]", hint.key, slots.source, slots.target),
            None => println!("  {}", hint.key),
        }
    }
    Ok(())
}

fn find_event<'a>(session: &'a SyncSession, id: &EventId) -> Option<&'a Event> {
    session.engine().events().find(|event| &event.id == id)
}

fn print_entry(entry: &TimelineEntry<'_>) {
    let from = entry.sender_name.unwrap_or(entry.sender.as_str());
    let to = entry.recipient.map(EntityId::as_str).unwrap_or("*");
    match entry.failure {
        Some(reason) => println!(
            "[{}] {} -> {}: {} ({}: {})",
            entry.created_at, from, to, entry.payload, entry.delivery, reason
        ),
        None => println!(
            "[{}] {} -> {}: {} ({})",
            entry.created_at, from, to, entry.payload, entry.delivery
        ),
    }
}

fn print_event(event: &Event) {
    let to = match (&event.recipient, event.attributes.get("receivers")) {
        (Some(recipient), _) => recipient.to_string(),
        (None, Some(receivers)) => receivers
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|r| r.as_str())
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_default(),
        (None, None) => "*".to_string(),
    };
    println!("[{}] {} -> {}: {}", event.created_at, event.sender, to, event.payload);
}
