// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::{Context, eyre};
use fastrace::collector::{Config as TraceConfig, ConsoleReporter};
use fastrace::prelude::*;
use futures::future::join_all;
use log::{info, warn};
use possession::{
    CheckReport, Cid, Config, FsBlockStore, IndexCache, RandomChecker, Seed, logging,
    self_check_round,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Seeded proof-of-possession checks over a local block store.
#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Config file to use, built-in defaults apply without one.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Prints `fastrace` spans to stderr.
    #[arg(long)]
    trace: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Stores a file as an asset and prints its root.
    Ingest {
        #[arg(long)]
        file: PathBuf,
    },
    /// Runs challenge rounds and prints one JSON line per round.
    Check {
        /// Seed of the first round, following rounds use the next seeds.
        #[arg(long)]
        seed: Option<Seed>,
        /// Root of the asset to challenge, picked per round from the store if omitted.
        #[arg(long)]
        asset: Option<String>,
        #[arg(long, default_value_t = 1)]
        rounds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // enable fancy `color_eyre` error messages
    color_eyre::install()?;

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load(path).context("Can not load config")?,
        None => Config::default(),
    };

    if args.trace {
        fastrace::set_reporter(ConsoleReporter, TraceConfig::default());
    }
    logging::enable_logforth();

    let store = Arc::new(FsBlockStore::new(&config.store.path, config.store.buckets));
    match args.command {
        Command::Ingest { file } => {
            let payload = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Can not read {}", file.display()))?;
            let asset = config.asset.builder().build(&payload)?;
            store.put_asset(&asset).await?;
            info!("ingested {} ({} bytes)", file.display(), payload.len());
            println!("{}", asset.root());
        }
        Command::Check {
            seed,
            asset,
            rounds,
        } => {
            let root = asset
                .map(|hex| hex.parse::<Cid>())
                .transpose()
                .map_err(|err| eyre!("invalid asset root: {err}"))?;
            let cache = Arc::new(IndexCache::new(store, &config.cache));
            run_checks(cache, root, seed.unwrap_or_else(rand::random), rounds).await?;
        }
    }

    fastrace::flush();
    Ok(())
}

/// Runs `rounds` concurrent rounds with consecutive seeds starting at `first_seed`.
async fn run_checks(
    cache: Arc<IndexCache>,
    root: Option<Cid>,
    first_seed: Seed,
    rounds: u64,
) -> Result<()> {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("cancelling remaining rounds");
                cancel.cancel();
            }
        });
    }

    let root_span = Span::root("possession check", SpanContext::random());
    let tasks = (0..rounds).map(|i| {
        let seed = first_seed.wrapping_add(i);
        let cache = cache.clone();
        let cancel = cancel.clone();
        let span = Span::enter_with_parent(format!("round {seed}"), &root_span);
        tokio::spawn(
            async move {
                let result = match root {
                    Some(root) => {
                        match RandomChecker::for_asset(root, seed, cache, &cancel).await {
                            Ok(mut checker) => checker.report(&cancel).await,
                            Err(err) => Err(err),
                        }
                    }
                    None => self_check_round(seed, cache, &cancel).await,
                };
                (seed, result)
            }
            .in_span(span),
        )
    });

    let mut failed = 0;
    for task in join_all(tasks).await {
        let (seed, result) = task?;
        let line = match result {
            Ok(report) => report_json(&report),
            Err(err) => {
                failed += 1;
                warn!("round with seed {seed} failed: {err}");
                json!({ "seed": seed, "error": err.to_string() })
            }
        };
        println!("{line}");
    }
    if failed > 0 {
        info!("{failed} of {rounds} rounds failed");
    }
    Ok(())
}

fn report_json(report: &CheckReport) -> serde_json::Value {
    let record = &report.selection.record;
    json!({
        "seed": report.seed,
        "root": report.root.to_string(),
        "bucket": report.selection.bucket,
        "record_index": report.selection.record_index,
        "cid": record.cid.to_string(),
        "offset": record.offset,
        "size": record.size,
        "intact": report.intact,
    })
}
