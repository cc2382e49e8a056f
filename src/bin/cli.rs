use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use azscan::config::Config;
use azscan::error::{Result, ScanError};
use azscan::filters::Filters;
use azscan::output::OutputFormat;
use azscan::rules::{RecommendationInfo, RecommendationType};
use azscan::scanners::build_registry;
use azscan::upstream::{ArmClient, BearerToken, HttpArmClient, MemoryArmClient};
use azscan::ScanOptions;

const CONFIG_FILE: &str = ".azscan.toml";

#[derive(Parser)]
#[command(
    name = "azscan",
    about = "Azure compliance scanner",
    version,
    author
)]
struct Cli {
    /// Verbose logging (overrides RUST_LOG)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan subscriptions and evaluate recommendations
    Scan {
        /// Subscription id to scan (repeatable); default is every visible subscription
        #[arg(long = "subscription", short = 's')]
        subscriptions: Vec<String>,

        /// Comma-separated scanner keys, e.g. kv,st,sql
        #[arg(long, value_delimiter = ',')]
        services: Vec<String>,

        /// Filter file (YAML)
        #[arg(long, short = 'e')]
        filters: Option<PathBuf>,

        /// Config file path
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Output format (console, json, sarif)
        #[arg(long, short = 'f')]
        format: Option<String>,

        /// Write output to file instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Subscriptions scanned in parallel
        #[arg(long)]
        workers: Option<usize>,

        /// Scanners run in parallel within one subscription
        #[arg(long)]
        plugin_workers: Option<usize>,

        /// Scan a recorded JSON fixture instead of the live API
        #[arg(long)]
        fixture: Option<PathBuf>,
    },

    /// List registered scanner keys
    ListScanners,

    /// List every recommendation
    ListRules {
        /// Output format (table, json)
        #[arg(long, short = 'f', default_value = "table")]
        format: String,
    },

    /// Generate a starter .azscan.toml config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

struct ScanArgs {
    subscriptions: Vec<String>,
    services: Vec<String>,
    filters: Option<PathBuf>,
    config: Option<PathBuf>,
    format: Option<String>,
    output: Option<PathBuf>,
    workers: Option<usize>,
    plugin_workers: Option<usize>,
    fixture: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let result = match cli.command {
        Commands::Scan {
            subscriptions,
            services,
            filters,
            config,
            format,
            output,
            workers,
            plugin_workers,
            fixture,
        } => cmd_scan(ScanArgs {
            subscriptions,
            services,
            filters,
            config,
            format,
            output,
            workers,
            plugin_workers,
            fixture,
        }),
        Commands::ListScanners => cmd_list_scanners(),
        Commands::ListRules { format } => cmd_list_rules(format),
        Commands::Init { force } => cmd_init(force),
    };

    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(e.exit_code());
        }
    }
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_scan(args: ScanArgs) -> Result<i32> {
    let config_path = args.config.unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
    let mut config = Config::load(&config_path)?;
    if let Some(workers) = args.workers {
        config.scan.workers = workers.max(1);
    }
    if let Some(plugin_workers) = args.plugin_workers {
        config.scan.plugin_workers = plugin_workers.max(1);
    }

    let format_str = args
        .format
        .or_else(|| config.output.format.clone())
        .unwrap_or_else(|| "console".into());
    let format = OutputFormat::from_str_lenient(&format_str).unwrap_or_else(|| {
        eprintln!("Warning: unknown format '{}', using console", format_str);
        OutputFormat::Console
    });

    let filters = Filters::load(args.filters.as_deref())?;

    let client: Arc<dyn ArmClient> = match &args.fixture {
        Some(path) => Arc::new(MemoryArmClient::from_fixture(path)?),
        None => Arc::new(HttpArmClient::new(&config.upstream, BearerToken::from_env()?)?),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| ScanError::Internal(format!("failed to start runtime: {e}")))?;

    let cancel = CancellationToken::new();
    let options = ScanOptions {
        config: config.clone(),
        filters,
        subscriptions: args.subscriptions,
        scanners: args.services,
        cancel: cancel.clone(),
    };

    let report = runtime.block_on(async move {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling scan");
                cancel.cancel();
            }
        });
        azscan::scan(client, options).await
    })?;

    let rendered = azscan::render_report(&report, format, &config)?;
    match args.output {
        Some(out) => std::fs::write(&out, &rendered)?,
        None => print!("{}", rendered),
    }

    // Exit code: 0 = completed, 3 = cancelled with partial results
    Ok(if report.summary.cancelled {
        ScanError::Cancelled.exit_code()
    } else {
        0
    })
}

fn cmd_list_scanners() -> Result<i32> {
    let registry = build_registry();
    println!("{:<8} {:<22} {:<18} RESOURCE TYPES", "KEY", "SCANNER", "PREFIXES");
    println!("{}", "-".repeat(90));
    for key in registry.keys() {
        for scanner in registry.lookup(&key) {
            println!(
                "{:<8} {:<22} {:<18} {}",
                key,
                scanner.name(),
                scanner.prefixes().join(","),
                scanner.resource_types().join(", "),
            );
        }
    }
    Ok(0)
}

fn cmd_list_rules(format_str: String) -> Result<i32> {
    let rules = build_registry().recommendations();
    if format_str == "json" {
        let rules: Vec<&RecommendationInfo> = rules.values().collect();
        println!("{}", serde_json::to_string_pretty(&rules)?);
    } else {
        print!("{}", rules_by_resource_type(&rules));
    }
    Ok(0)
}

/// One section per resource type; SLA recommendations are marked `sla`.
fn rules_by_resource_type(rules: &BTreeMap<String, RecommendationInfo>) -> String {
    let mut by_type: BTreeMap<&str, Vec<&RecommendationInfo>> = BTreeMap::new();
    for rule in rules.values() {
        by_type.entry(rule.resource_type.as_str()).or_default().push(rule);
    }

    let mut out = String::new();
    for (resource_type, entries) in &by_type {
        out.push_str(&format!("\n{resource_type}\n"));
        for rule in entries {
            let kind = match rule.recommendation_type {
                RecommendationType::Sla => "sla",
                RecommendationType::Recommendation => "",
            };
            out.push_str(&format!(
                "  {:<11} {:<6} {:<22} {:<3} {}\n",
                rule.id,
                rule.impact.to_string(),
                rule.category.to_string(),
                kind,
                rule.recommendation,
            ));
        }
    }
    out.push_str(&format!(
        "\n{} recommendation(s) across {} resource type(s)\n",
        rules.len(),
        by_type.len()
    ));
    out
}

fn cmd_init(force: bool) -> Result<i32> {
    if write_starter_config(Path::new(CONFIG_FILE), force)? {
        tracing::info!(path = CONFIG_FILE, "starter config written");
        Ok(0)
    } else {
        tracing::warn!(path = CONFIG_FILE, "config exists, pass --force to overwrite it");
        Ok(1)
    }
}

/// `false` when `path` exists and `force` is not set.
fn write_starter_config(path: &Path, force: bool) -> Result<bool> {
    let mut options = OpenOptions::new();
    options.write(true);
    if force {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }

    let mut file = match options.open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    file.write_all(Config::starter_toml().as_bytes())?;
    Ok(true)
}
