//! agrosync - inspect and drive the AgroMarket offline queue
//!
//! Usage:
//!   agrosync status          show connectivity and queue state
//!   agrosync sync            drain the queue now
//!   agrosync pending         list drafts awaiting upload
//!   agrosync retry [ID]      retry one failed record, or all of them

use anyhow::{Context, Result, bail};
use log::error;
use std::sync::Arc;
use std::time::Duration;

use offline::{
    CredentialProvider, DrainOutcome, NoCredentials, OfflineConfig, SessionFileCredentials,
    SyncEngine,
};

const USAGE: &str = "usage: agrosync <status|sync|pending|retry [ID]>";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(e) = run(&args) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(args: &[String]) -> Result<()> {
    let command = args.first().map(String::as_str).unwrap_or("status");
    let settings = OfflineConfig::load()?;
    let credentials: Arc<dyn CredentialProvider> = match SessionFileCredentials::default_location()
    {
        Some(session) => Arc::new(session),
        None => Arc::new(NoCredentials),
    };
    let engine = SyncEngine::open(&settings, credentials)?;

    match command {
        "status" => print_status(&engine),
        "sync" => {
            match engine.sync()? {
                DrainOutcome::Offline => println!("offline; nothing synced"),
                DrainOutcome::AlreadyRunning => println!("a sync is already running"),
                DrainOutcome::Completed(report) => println!(
                    "processed {}: {} succeeded ({} missing images), {} will retry, {} failed",
                    report.processed,
                    report.succeeded,
                    report.degraded,
                    report.rescheduled,
                    report.failed
                ),
            }
            print_status(&engine)
        }
        "pending" => {
            let drafts = engine.drafts().list_pending()?;
            if drafts.is_empty() {
                println!("no drafts awaiting upload");
            }
            for draft in drafts {
                println!(
                    "{}  {:<14}  {} ({} images){}",
                    draft.local_id,
                    draft.status.as_str(),
                    draft.fields.product_name,
                    draft.attachments.len(),
                    draft
                        .error
                        .map(|e| format!("  [{}]", e))
                        .unwrap_or_default()
                );
            }
            Ok(())
        }
        "retry" => {
            match args.get(1) {
                Some(id) => {
                    let id: i64 = id
                        .parse()
                        .with_context(|| format!("Invalid record id: {}", id))?;
                    engine.processor().retry(id)?;
                    println!("record {} queued for retry", id);
                }
                None => {
                    let count = engine.processor().retry_all_failed()?;
                    println!("{} failed records queued for retry", count);
                }
            }
            engine.processor().wait_until_idle(Duration::from_secs(60));
            print_status(&engine)
        }
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    }
}

fn print_status(engine: &SyncEngine) -> Result<()> {
    let status = engine.status()?;
    println!("state:    {}", status.badge().as_str());
    println!("online:   {}", status.is_online);
    println!("pending:  {}", status.pending_count);
    match status.last_sync_at {
        Some(at) => println!("last sync: {}", at.to_rfc3339()),
        None => println!("last sync: never"),
    }
    for record in &status.failed {
        println!(
            "failed #{} {} after {} attempts: {}",
            record.id,
            record.mutation.kind(),
            record.retries,
            record.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
