use anyhow::Result;
use clap::Parser;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Builder;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use subrake::cli::{Cli, Commands, CommonArgs, EnumArgs, VerifyArgs};
use subrake::config::{self, AppConfig};
use subrake::engine::{Engine, EngineOptions};
use subrake::generator::{self, Candidate};
use subrake::output::{self, Sink};
use subrake::progress::{self, Metrics};
use subrake::rate_limit;
use subrake::resolver::{self, ResolverPool};
use subrake::sources::Aggregator;
use subrake::wildcard::{self, WildFilterMode, WildcardProfile};

fn main() -> Result<()> {
    // IO-heavy workload: slightly more threads than cores helps, but cap
    // the pool to avoid pointless context switching on large hosts.
    let num_cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    let worker_threads = std::cmp::min(num_cpus + 2, 16);

    let runtime = Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()
        .expect("Failed to create Tokio runtime");

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    let cli = Cli::parse();
    let silent = match &cli.command {
        Commands::Enum(args) => args.common.silent,
        Commands::Verify(args) => args.common.silent,
    };
    init_tracing(silent);

    match cli.command {
        Commands::Enum(args) => run_enum(args).await,
        Commands::Verify(args) => run_verify(args).await,
    }
}

fn init_tracing(silent: bool) {
    let fallback = if silent { "error" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_enum(args: EnumArgs) -> Result<()> {
    let apexes = gather_names(
        &args.common.domains,
        args.common.stdin,
        args.domain_list.as_deref(),
    )
    .await?;
    if apexes.is_empty() {
        eprintln!("no domains supplied; use -d, --domain-list or --stdin");
        std::process::exit(1);
    }

    let rate_pps = rate_limit::parse_band(&args.common.band)?;
    let timeout = Duration::from_secs(args.common.timeout.max(1));
    let pool = build_pool(&args.common, &apexes, args.ns, timeout).await?;

    let profiles = if args.common.wild_filter_mode == WildFilterMode::None {
        HashMap::new()
    } else {
        wildcard::detect_profiles(&apexes, &pool, timeout).await
    };

    let online = if args.no_online {
        HashMap::new()
    } else {
        let mut cfg = AppConfig::load(Path::new(config::CONFIG_FILE))?;
        cfg.apply_env(|key| std::env::var(key).ok());
        let aggregator = Aggregator::from_config(&cfg)?;
        info!(sources = ?aggregator.source_names(), "querying online sources");
        aggregator.collect(&apexes).await
    };

    let (candidates, producer) = generator::spawn_enumeration(generator::EnumPlan {
        apexes,
        online,
        dictionary: args.dictionary.clone(),
        online_only: args.online_only,
        predict: args.common.predict,
    })
    .await?;

    run_pipeline(
        &args.common,
        rate_pps,
        timeout,
        Arc::new(pool),
        Arc::new(profiles),
        candidates,
        producer,
    )
    .await
}

async fn run_verify(args: VerifyArgs) -> Result<()> {
    let inline = gather_names(&args.common.domains, args.common.stdin, None).await?;
    if inline.is_empty() && args.file.is_none() {
        eprintln!("no names supplied; use -d, -f or --stdin");
        std::process::exit(1);
    }

    let rate_pps = rate_limit::parse_band(&args.common.band)?;
    let timeout = Duration::from_secs(args.common.timeout.max(1));
    let pool = build_pool(&args.common, &[], false, timeout).await?;

    let (candidates, producer) = generator::spawn_verify(generator::VerifyPlan {
        inline,
        file: args.file.clone(),
    })
    .await?;

    // Verify mode computes no wildcard profiles, so local filtering is a
    // pass-through.
    run_pipeline(
        &args.common,
        rate_pps,
        timeout,
        Arc::new(pool),
        Arc::new(HashMap::new()),
        candidates,
        producer,
    )
    .await
}

async fn build_pool(
    common: &CommonArgs,
    apexes: &[String],
    ns: bool,
    timeout: Duration,
) -> Result<ResolverPool> {
    let mut pool = match &common.resolvers {
        Some(path) => ResolverPool::from_file(path)?,
        None => ResolverPool::builtin(),
    };
    if let Some(eth) = &common.eth {
        debug!(interface = %eth, "interface flag is inert on the udp socket path");
    }
    if ns {
        let special = resolver::discover_ns(&pool, apexes, timeout).await;
        pool.set_special(special);
    }
    info!(resolvers = pool.len(), "resolver pool ready");
    Ok(pool)
}

#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
    common: &CommonArgs,
    rate_pps: u64,
    timeout: Duration,
    pool: Arc<ResolverPool>,
    profiles: Arc<HashMap<String, WildcardProfile>>,
    candidates: mpsc::Receiver<Candidate>,
    producer: JoinHandle<u64>,
) -> Result<()> {
    let metrics = Metrics::new();

    let mut sinks: Vec<Box<dyn Sink + Send>> = Vec::new();
    if !common.not_print {
        sinks.push(Box::new(output::ScreenSink::new(common.silent)));
    }
    if let Some(path) = &common.output {
        sinks.push(output::file_sink(path, common.output_type)?);
    }

    let (raw_tx, raw_rx) = mpsc::channel(1024);
    let (accepted_tx, accepted_rx) = mpsc::channel(1024);
    let filter = wildcard::spawn_filter(
        common.wild_filter_mode,
        profiles,
        pool.clone(),
        timeout,
        metrics.clone(),
        raw_rx,
        accepted_tx,
    );
    let fanout = output::spawn_fanout(sinks, accepted_rx, metrics.clone());

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, finishing in-flight work");
            let _ = cancel_tx.send(true);
        }
    });

    let (reporter_stop_tx, reporter_stop_rx) = watch::channel(false);
    let reporter = if common.silent || common.not_print {
        None
    } else {
        Some(progress::spawn_reporter(metrics.clone(), reporter_stop_rx))
    };

    let engine = Arc::new(
        Engine::bind(
            EngineOptions {
                rate_pps,
                timeout,
                max_retries: common.retry,
            },
            pool,
            metrics.clone(),
        )
        .await?,
    );
    engine.run(candidates, raw_tx, cancel_rx).await?;

    let total = producer.await.unwrap_or(0);
    let _ = reporter_stop_tx.send(true);
    if let Some(task) = reporter {
        let _ = task.await;
    }
    let _ = filter.await;
    let _ = fanout.await;

    info!(
        candidates = total,
        sent = metrics.sent.load(Ordering::Relaxed),
        found = metrics.found.load(Ordering::Relaxed),
        filtered = metrics.filtered.load(Ordering::Relaxed),
        dropped = metrics.dropped.load(Ordering::Relaxed),
        "run complete"
    );
    Ok(())
}

/// Collects input names from flags, stdin and an optional list file, in
/// that order, deduplicated and lowercased.
async fn gather_names(
    inline: &[String],
    stdin: bool,
    list: Option<&Path>,
) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for name in inline {
        push_name(name, &mut out, &mut seen);
    }
    if stdin {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            push_name(&line, &mut out, &mut seen);
        }
    }
    if let Some(path) = list {
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            anyhow::anyhow!("failed to open domain list {}: {}", path.display(), e)
        })?;
        let mut lines = BufReader::new(file).lines();
        while let Some(line) = lines.next_line().await? {
            push_name(&line, &mut out, &mut seen);
        }
    }
    Ok(out)
}

fn push_name(raw: &str, out: &mut Vec<String>, seen: &mut HashSet<String>) {
    let name = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    if !name.is_empty() && !name.starts_with('#') && seen.insert(name.clone()) {
        out.push(name);
    }
}
