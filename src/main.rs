//! brokerfuzz — scripted fuzzing sessions against message brokers

use brokerfuzz::replay::{decode_all, read_payload_file};
use brokerfuzz::{
    replay, CaseStore, Cli, Command, FuzzRatio, FuzzSettings, MutationTool, ScriptCatalog,
    Supervisor, Target,
};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Options for a fuzz run, as given on the command line.
struct RunOptions {
    target: Target,
    ratio: u8,
    delay: u64,
    validcases: PathBuf,
    fuzzer: PathBuf,
    fuzzer_args: Vec<String>,
    valid_connect: bool,
    batch_size: usize,
    scripts: Option<PathBuf>,
    seed: Option<u64>,
    sessions: Option<u64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_filter = if cli.verbose {
        "brokerfuzz=debug"
    } else {
        "brokerfuzz=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Command::Run {
            host,
            port,
            ratio,
            delay,
            validcases,
            fuzzer,
            fuzzer_args,
            valid_connect,
            batch_size,
            scripts,
            seed,
            sessions,
        } => {
            run_fuzzer(RunOptions {
                target: Target::new(host, port),
                ratio,
                delay,
                validcases,
                fuzzer,
                fuzzer_args,
                valid_connect,
                batch_size,
                scripts,
                seed,
                sessions,
            })
            .await
        }
        Command::Replay {
            host,
            port,
            payloads,
            file,
            delay,
        } => run_replay(Target::new(host, port), payloads, file, delay).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run_fuzzer(opts: RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = match &opts.scripts {
        Some(path) => ScriptCatalog::load(path)?,
        None => ScriptCatalog::mqtt(),
    };

    let dont_fuzz = if opts.valid_connect {
        catalog.opening_categories()
    } else {
        BTreeSet::new()
    };

    let ratio = FuzzRatio::new(opts.ratio).ok_or("fuzz ratio must be between 0 and 10")?;
    let settings = FuzzSettings {
        ratio,
        delay: Duration::from_millis(opts.delay),
        dont_fuzz,
    };

    let tool = MutationTool::new(opts.fuzzer).with_args(opts.fuzzer_args);
    let store = CaseStore::new(opts.validcases, Arc::new(tool)).with_batch_size(opts.batch_size);

    let seed = opts.seed.unwrap_or_else(rand::random);
    info!(
        seed,
        ratio = ratio.tenths(),
        delay_ms = opts.delay,
        scripts = catalog.len(),
        "Fuzz settings"
    );

    let mut supervisor = Supervisor::new(
        opts.target.clone(),
        catalog,
        store,
        settings,
        StdRng::seed_from_u64(seed),
    )
    .with_session_limit(opts.sessions);

    let outcome = tokio::select! {
        result = supervisor.run() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    match outcome {
        Some(result) => {
            result?;
        }
        None => info!("Interrupted"),
    }

    let summary = supervisor.summary();
    info!(
        addr = %opts.target,
        sessions = summary.sessions,
        completed = summary.completed,
        lost = summary.lost,
        cases = summary.cases_sent,
        fuzzed = summary.fuzzed_sent,
        "Stopped fuzz run"
    );
    Ok(())
}

async fn run_replay(
    target: Target,
    mut payloads: Vec<String>,
    file: Option<PathBuf>,
    delay: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(path) = file {
        payloads.extend(read_payload_file(&path)?);
    }
    let payloads = decode_all(&payloads)?;
    replay(&target, &payloads, Duration::from_millis(delay)).await?;
    Ok(())
}
