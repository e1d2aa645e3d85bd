//! `spendlog` command line: parse, ingest, inspect and reconcile

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use spend_core::{IngestConfig, Orchestrator, StdoutChannel};
use spend_dedupe::DedupeStore;
use spend_extract::Extractor;
use spend_record::{Decimal, EventKey, RawEvent};
use std::io::{BufRead, Read};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Command::new("spendlog")
        .version(spend_core::VERSION)
        .about("Log chat-reported purchases to the spend ledger exactly once")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(Command::new("parse").about("Extract a spend record from text on stdin"))
        .subcommand(
            Command::new("ingest")
                .about("Process a JSONL file of channel events")
                .arg(
                    Arg::new("events")
                        .long("events")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("One RawEvent JSON object per line"),
                )
                .arg(
                    Arg::new("concurrency")
                        .long("concurrency")
                        .default_value("8")
                        .value_parser(value_parser!(usize))
                        .help("Authors processed at once"),
                ),
        )
        .subcommand(
            Command::new("dedupe")
                .about("Inspect the idempotency store")
                .subcommand_required(true)
                .subcommand(
                    Command::new("check").about("Status of one event key").arg(
                        Arg::new("key")
                            .long("key")
                            .required(true)
                            .help("Event key, e.g. msg:-100371:42"),
                    ),
                )
                .subcommand(Command::new("show").about("Every record as JSON")),
        )
        .subcommand(
            Command::new("reconcile")
                .about("Settle stale reservations and restore keys from the ledger"),
        )
        .subcommand(
            Command::new("find-rows")
                .about("Search recent ledger rows")
                .arg(Arg::new("q").long("q").default_value("").help("Text in item or raw message"))
                .arg(Arg::new("price").long("price").help("Exact price"))
                .arg(
                    Arg::new("scan")
                        .long("scan")
                        .default_value("500")
                        .value_parser(value_parser!(usize))
                        .help("Rows read from the end of the table"),
                ),
        );

    let matches = cli.get_matches();
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => IngestConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => IngestConfig::new(),
    };
    init_tracing(&config, matches.get_flag("json-logs"));

    match matches.subcommand() {
        Some(("parse", _)) => parse(&config),
        Some(("ingest", args)) => ingest(config, args).await,
        Some(("dedupe", args)) => dedupe(&config, args),
        Some(("reconcile", _)) => reconcile(config).await,
        Some(("find-rows", args)) => find_rows(&config, args).await,
        _ => Ok(()),
    }
}

fn init_tracing(config: &IngestConfig, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json || config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn parse(config: &IngestConfig) -> Result<()> {
    let mut text = String::new();
    std::io::stdin().read_to_string(&mut text).context("reading stdin")?;
    let extractor = Extractor::new(config.vocabulary.clone())?;
    let record = extractor.extract(text.trim(), None);
    let missing = record.missing_fields(config.extraction.min_confidence);
    let output = serde_json::json!({
        "record": record,
        "complete": missing.is_empty(),
        "missing": missing,
        "triggered": extractor.has_trigger(&text),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn ingest(config: IngestConfig, args: &ArgMatches) -> Result<()> {
    let path = args
        .get_one::<PathBuf>("events")
        .context("--events is required")?;
    let concurrency = args.get_one::<usize>("concurrency").copied().unwrap_or(8);

    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut events = Vec::new();
    for (idx, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: RawEvent = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: not a RawEvent", path.display(), idx + 1))?;
        events.push(event);
    }

    let pipeline = Orchestrator::from_config(config, Arc::new(StdoutChannel))?;
    let recovery = pipeline.recover().await?;
    if !recovery.unresolved.is_empty() {
        tracing::warn!(count = recovery.unresolved.len(), "stale reservations left unresolved");
    }

    let mut fatal = None;
    for result in pipeline.ingest_all(events, concurrency).await {
        match result {
            Ok(outcome) => println!("{}", serde_json::to_string(&outcome)?),
            Err(err) if err.is_fatal() => fatal = Some(err),
            Err(err) => eprintln!("error: {err}"),
        }
    }
    let expired = pipeline.expire_clarifications();
    let pending = pipeline.tracker().len();
    tracing::info!(expired, pending, "clarifications swept after the batch");
    if let Some(err) = fatal {
        bail!("stopped on fatal error: {err}");
    }
    Ok(())
}

fn open_store(config: &IngestConfig) -> Result<DedupeStore> {
    let Some(path) = &config.dedupe.state_path else {
        bail!("dedupe.state_path is not configured");
    };
    Ok(DedupeStore::open(path)?)
}

fn dedupe(config: &IngestConfig, args: &ArgMatches) -> Result<()> {
    let store = open_store(config)?;
    match args.subcommand() {
        Some(("check", sub)) => {
            let raw = sub.get_one::<String>("key").context("--key is required")?;
            let key = EventKey::parse(raw).with_context(|| format!("'{raw}' is not an event key"))?;
            match store.get(&key) {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => println!("{key}: not seen"),
            }
        }
        Some(("show", _)) => {
            println!("{}", serde_json::to_string_pretty(&store.records())?);
            let stale = store.stale_reservations();
            if !stale.is_empty() {
                eprintln!("{} reservation(s) were in flight at last shutdown", stale.len());
            }
        }
        _ => {}
    }
    Ok(())
}

async fn reconcile(config: IngestConfig) -> Result<()> {
    let pipeline = Orchestrator::from_config(config, Arc::new(StdoutChannel))?;
    let recovery = pipeline.recover().await?;
    println!("Stale reservations:");
    println!("  Committed: {}", recovery.committed.len());
    println!("  Failed: {}", recovery.failed.len());
    println!("  Unresolved: {}", recovery.unresolved.len());

    let report = pipeline.rebuild().await?;
    println!("Ledger scan:");
    println!("  Rows scanned: {}", report.scanned);
    println!("  Foreign rows: {}", report.foreign);
    println!("  Already known: {}", report.known);
    println!("  Restored: {}", report.restored.len());
    for key in &report.mismatched {
        println!("  Receipt mismatch: {key}");
    }
    Ok(())
}

async fn find_rows(config: &IngestConfig, args: &ArgMatches) -> Result<()> {
    let query = args.get_one::<String>("q").map_or("", String::as_str);
    let price = args
        .get_one::<String>("price")
        .map(|p| Decimal::from_str(p.trim()).with_context(|| format!("'{p}' is not a price")))
        .transpose()?;
    let scan = args.get_one::<usize>("scan").copied().unwrap_or(500);

    let port = config.ledger.build_port(&config.retry)?;
    let rows = port.search(query, price, scan).await?;
    for stored in &rows {
        println!(
            "{}\t{}\t{} {}\t{}\t{}",
            stored.location,
            stored.row.ts.to_rfc3339(),
            stored.row.price,
            stored.row.currency,
            stored.row.item,
            stored.receipt(),
        );
    }
    eprintln!("{} matching row(s)", rows.len());
    Ok(())
}
