//! # Madrasa CLI
//!
//! A small command-line client built on the msync SDK. Local commands work
//! against a file-backed cache and queue, so they behave exactly like the
//! app does while the device is offline. `sync` and `pull` talk to the
//! madrasa REST API.
//!
//! ```text
//! madrasa-cli add leaves '{"student_id": 7, "reason": "fever"}'
//! madrasa-cli status
//! madrasa-cli --server http://10.0.0.2:8080 sync
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::*;
use msync_sdk::{
    DrainOutcome, DrainReport, FailedWrite, HttpRemote, MemoryRemote, NetworkMonitor, Payload,
    PullReport, Record, RecordId, RemoteError, RemoteService, SyncConfig, SyncCoordinator,
    SyncState, SyncStatus, WriteId,
};
use msync_store::{FileStorage, Storage};

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "madrasa-cli")]
#[command(about = "Offline-first sync client for the madrasa API (msync SDK)")]
#[command(version)]
struct Cli {
    /// Base URL of the madrasa API
    #[arg(long, default_value = "http://localhost:8080")]
    server: String,
    /// Directory holding the local cache and pending-write queue
    #[arg(long, default_value = ".msync")]
    data_dir: PathBuf,
    /// TOML file with sync settings
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scripted walkthrough against an in-memory server
    Demo,
    /// Create a record locally and queue it
    Add { collection: String, json: String },
    /// Replace a record's payload locally and queue the update
    Edit {
        collection: String,
        id: String,
        json: String,
    },
    /// Delete a record locally and queue the delete
    Remove { collection: String, id: String },
    /// Show the cached records of a collection
    Show { collection: String },
    /// Show queue, failed writes and last sync time
    Status,
    /// Replay the pending-write queue against the server
    Sync,
    /// Drain, then replace the cache with the server's state
    Pull,
    /// Re-queue a failed write
    Retry { write_id: String },
    /// Drop a failed write and its local effect
    Discard { write_id: String },
}

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn state_badge(state: SyncState) -> ColoredString {
    match state {
        SyncState::Synced => "synced".bright_green(),
        SyncState::Pending => "pending".bright_yellow(),
        SyncState::Failed => "failed".bright_red(),
    }
}

fn show_records(collection: &str, records: &[Record]) {
    let border = "─".repeat(56);
    println!("  ┌{}┐", border);
    println!("  │ {:<54} │", format!("{} ({})", collection, records.len()).bright_yellow().to_string());
    println!("  ├{}┤", border);
    if records.is_empty() {
        println!("  │ {:<54} │", "(empty)".dimmed().to_string());
    }
    for record in records {
        println!(
            "  │ {:<34} {:>19} │",
            record.id().to_string(),
            state_badge(record.sync_state()).to_string()
        );
        let body = serde_json::Value::Object(record.payload().clone()).to_string();
        let body = if body.chars().count() > 50 {
            format!("{}...", body.chars().take(47).collect::<String>())
        } else {
            body
        };
        println!("  │   {:<52} │", body.dimmed().to_string());
    }
    println!("  └{}┘", border);
}

fn show_status(status: &SyncStatus) {
    let online = if status.is_online {
        "online".bright_green()
    } else {
        "offline".bright_red()
    };
    step(&format!("connectivity:  {}", online));
    step(&format!("phase:         {:?}", status.phase));
    step(&format!("queued writes: {}", status.queue_size));
    step(&format!("failed writes: {}", status.failed_count));
    let last = status
        .last_sync_time
        .map(|t| t.to_string())
        .unwrap_or_else(|| "never".into());
    step(&format!("last sync:     {}", last));
}

fn show_failed(failed: &[FailedWrite]) {
    if failed.is_empty() {
        println!("  {}", "(no failed writes)".dimmed());
        return;
    }
    for f in failed {
        let status = f
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "network".into());
        println!(
            "  {} {} {} {}/{} [{}] {}",
            "✗".bright_red(),
            f.write_id().to_string().bright_white(),
            f.write.operation,
            f.write.collection,
            f.write.record_id(),
            status.bright_red(),
            f.error.dimmed()
        );
    }
}

fn show_drain(report: &DrainReport) {
    let outcome = match report.outcome {
        DrainOutcome::Emptied => "queue emptied".bright_green(),
        DrainOutcome::WentOffline => "went offline".bright_yellow(),
        DrainOutcome::Superseded => "superseded by a pull".bright_yellow(),
        DrainOutcome::RetryBudgetExhausted => "retry budget exhausted".bright_red(),
        DrainOutcome::AlreadyInProgress => "another sync is running".bright_yellow(),
    };
    step(&format!(
        "drain: {} ({} confirmed, {} failed)",
        outcome, report.confirmed, report.failed
    ));
}

fn show_pull(report: &PullReport) {
    for (collection, count) in &report.pulled {
        step(&format!("{:<12} {} records", collection, count));
    }
    for (collection, err) in &report.errors {
        println!("  {} {:<12} {}", "!".bright_red(), collection, err);
    }
    if report.reapplied > 0 {
        step(&format!("re-applied {} local writes", report.reapplied));
    }
}

// ─── Arguments ─────────────────────────────────────────────────────────────

fn parse_payload(raw: &str) -> Result<Payload, String> {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err("payload must be a JSON object".into()),
        Err(e) => Err(format!("invalid JSON: {}", e)),
    }
}

/// `42` is a server id, `local:<ulid>` a device-local one.
fn parse_record_id(raw: &str) -> Result<RecordId, String> {
    if let Some(local) = raw.strip_prefix("local:") {
        return Ok(RecordId::Local(local.to_string()));
    }
    raw.parse::<i64>()
        .map(RecordId::Remote)
        .map_err(|_| format!("'{}' is neither a server id nor local:<id>", raw))
}

// ─── Coordinator setup ─────────────────────────────────────────────────────

type Client = SyncCoordinator<FileStorage, HttpRemote>;

fn load_config(cli: &Cli) -> Result<SyncConfig, String> {
    let mut config = match &cli.config {
        Some(path) => SyncConfig::load(path).map_err(|e| e.to_string())?,
        None => SyncConfig::default(),
    };
    // One-shot commands drain explicitly.
    config.auto_drain = false;
    config.refresh_on_read = false;
    Ok(config)
}

fn open_client(cli: &Cli, online: bool) -> Result<Client, String> {
    let config = load_config(cli)?;
    let remote = HttpRemote::new(cli.server.clone(), config.request_timeout())
        .map_err(|e| e.to_string())?;
    let storage = FileStorage::open(&cli.data_dir).map_err(|e| e.to_string())?;
    SyncCoordinator::new(storage, Arc::new(remote), NetworkMonitor::immediate(online), config)
        .map_err(|e| e.to_string())
}

async fn drain_until_settled<S: Storage, R: RemoteService>(
    sync: &SyncCoordinator<S, R>,
) -> Result<(), String> {
    loop {
        let report = sync.drain().await.map_err(|e| e.to_string())?;
        show_drain(&report);
        if report.outcome != DrainOutcome::Emptied || sync.queue_size() == 0 {
            return Ok(());
        }
    }
}

/// Push local writes first so the pull does not have to re-apply them.
async fn drain_then_pull<S: Storage, R: RemoteService>(
    sync: &SyncCoordinator<S, R>,
) -> Result<PullReport, String> {
    drain_until_settled(sync).await?;
    sync.force_sync().await.map_err(|e| e.to_string())
}

// ─── Commands ──────────────────────────────────────────────────────────────

async fn run(cli: Cli) -> Result<(), String> {
    match &cli.command {
        Commands::Demo => run_demo().await,
        Commands::Add { collection, json } => {
            let sync = open_client(&cli, false)?;
            let record = sync
                .create(collection, parse_payload(json)?)
                .map_err(|e| e.to_string())?;
            step(&format!("queued create of {}/{}", collection, record.id()));
            Ok(())
        }
        Commands::Edit {
            collection,
            id,
            json,
        } => {
            let sync = open_client(&cli, false)?;
            let id = parse_record_id(id)?;
            sync.update(collection, &id, parse_payload(json)?)
                .map_err(|e| e.to_string())?;
            step(&format!("queued update of {}/{}", collection, id));
            Ok(())
        }
        Commands::Remove { collection, id } => {
            let sync = open_client(&cli, false)?;
            let id = parse_record_id(id)?;
            sync.delete(collection, &id).map_err(|e| e.to_string())?;
            step(&format!("queued delete of {}/{}", collection, id));
            Ok(())
        }
        Commands::Show { collection } => {
            let sync = open_client(&cli, false)?;
            show_records(collection, &sync.read(collection));
            Ok(())
        }
        Commands::Status => {
            let sync = open_client(&cli, false)?;
            header("SYNC STATUS");
            show_status(&sync.status());
            section("Pending writes");
            let pending = sync.pending_writes();
            if pending.is_empty() {
                println!("  {}", "(queue empty)".dimmed());
            }
            for write in &pending {
                step(&format!(
                    "{} {}/{} (attempts: {})",
                    write.operation,
                    write.collection,
                    write.record_id(),
                    write.attempt_count
                ));
            }
            section("Failed writes");
            show_failed(&sync.failed_writes());
            Ok(())
        }
        Commands::Sync => {
            let sync = open_client(&cli, true)?;
            header(&format!("SYNC → {}", cli.server));
            drain_until_settled(&sync).await?;
            show_status(&sync.status());
            Ok(())
        }
        Commands::Pull => {
            let sync = open_client(&cli, true)?;
            header(&format!("PULL ← {}", cli.server));
            let report = drain_then_pull(&sync).await?;
            show_pull(&report);
            show_status(&sync.status());
            if report.is_complete() {
                Ok(())
            } else {
                Err(format!("{} collection(s) could not be fetched", report.errors.len()))
            }
        }
        Commands::Retry { write_id } => {
            let sync = open_client(&cli, false)?;
            sync.retry_failed(&WriteId(write_id.clone()))
                .map_err(|e| e.to_string())?;
            step(&format!("re-queued {}", write_id));
            Ok(())
        }
        Commands::Discard { write_id } => {
            let sync = open_client(&cli, false)?;
            sync.discard_failed(&WriteId(write_id.clone()))
                .map_err(|e| e.to_string())?;
            step(&format!("discarded {}", write_id));
            Ok(())
        }
    }
}

fn payload(value: serde_json::Value) -> Payload {
    value.as_object().cloned().unwrap_or_default()
}

async fn run_demo() -> Result<(), String> {
    header("DEMO: Offline Writes, Reconnect, Rejection & Retry");

    let remote = Arc::new(MemoryRemote::new());
    remote.seed("students", payload(serde_json::json!({ "name": "Ammar", "class": "hifz-2" })));
    let monitor = NetworkMonitor::immediate(false);
    let config = msync_sdk::SyncConfigBuilder::new()
        .hold_down(0)
        .backoff(50, 200)
        .max_attempts(3)
        .auto_drain(false)
        .build();
    let sync = SyncCoordinator::new(
        msync_store::MemoryStorage::new(),
        Arc::clone(&remote),
        monitor.clone(),
        config,
    )
    .map_err(|e| e.to_string())?;
    let _updates = sync.subscribe(|status| {
        println!(
            "    {} queue={} failed={} {:?}",
            "status".dimmed(),
            status.queue_size,
            status.failed_count,
            status.phase
        );
    });

    section("Phase 1: The ustadh records the day while offline");
    let attendance = sync
        .create("attendance", payload(serde_json::json!({ "student_id": 1 })))
        .map_err(|e| e.to_string())?;
    step(&format!("attendance {} (missing date)", attendance.id()));
    let leave = sync
        .create("leaves", payload(serde_json::json!({ "student_id": 1, "reason": "fever" })))
        .map_err(|e| e.to_string())?;
    step(&format!("leave {} created", leave.id()));
    sync.update(
        "leaves",
        leave.id(),
        payload(serde_json::json!({ "student_id": 1, "reason": "fever", "days": 2 })),
    )
    .map_err(|e| e.to_string())?;
    step("leave edited before it was ever sent (coalesced into the create)");
    show_records("leaves", &sync.read("leaves"));
    show_status(&sync.status());

    section("Phase 2: Connectivity returns, the server rejects one write");
    remote.fail_next(RemoteError::status(400, "validation", "date is required"));
    monitor.report(true);
    drain_until_settled(&sync).await?;
    show_failed(&sync.failed_writes());

    section("Phase 3: Retry the rejected write");
    for failed in sync.failed_writes() {
        sync.retry_failed(failed.write_id()).map_err(|e| e.to_string())?;
        step(&format!("re-queued {}", failed.write_id()));
    }
    drain_until_settled(&sync).await?;

    section("Phase 4: Pull authoritative state");
    let report = sync.force_sync().await.map_err(|e| e.to_string())?;
    show_pull(&report);
    for collection in sync.collections() {
        show_records(&collection, &sync.read(&collection));
    }
    show_status(&sync.status());

    let settled = sync.status().is_settled() && sync.failed_writes().is_empty();
    if settled {
        println!(
            "\n  {} {}",
            "✓".bright_green().bold(),
            "LOCAL CACHE MATCHES THE SERVER".bright_green().bold()
        );
        Ok(())
    } else {
        Err("demo did not settle".into())
    }
}

// ─── Entry point ───────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        eprintln!("  {} {}", "✗".bright_red().bold(), err);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msync_sdk::{RemoteMethod, SyncConfigBuilder};
    use msync_store::MemoryStorage;

    #[tokio::test]
    async fn test_pull_sends_queued_writes_first() {
        let config = SyncConfigBuilder::new()
            .hold_down(0)
            .auto_drain(false)
            .collections(["leaves"])
            .build();
        let sync = SyncCoordinator::new(
            MemoryStorage::new(),
            Arc::new(MemoryRemote::new()),
            NetworkMonitor::immediate(true),
            config,
        )
        .unwrap();
        sync.create("leaves", parse_payload(r#"{"student_id": 7}"#).unwrap())
            .unwrap();

        let report = drain_then_pull(&sync).await.unwrap();

        let methods: Vec<RemoteMethod> =
            sync.remote().calls().iter().map(|call| call.method).collect();
        assert_eq!(methods, vec![RemoteMethod::Create, RemoteMethod::List]);
        assert_eq!(report.pulled.get("leaves"), Some(&1));
        assert_eq!(report.reapplied, 0);
        assert_eq!(sync.queue_size(), 0);
        assert_eq!(sync.read("leaves")[0].sync_state(), SyncState::Synced);
    }
}
