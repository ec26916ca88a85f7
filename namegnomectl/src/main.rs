//! NameGnome command line.
//!
//! Drives the pipeline directly against the local cache database, no server
//! required. Exit codes: 0 success, 2 validation, 3 partial apply, 4 locked,
//! 5 provider unavailable.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args as ClapArgs, Parser, Subcommand};
use uuid::Uuid;

use namegnome_config::Config;
use namegnome_core::cache::CacheStore;
use namegnome_core::plan::to_canonical_json;
use namegnome_core::providers::{ProviderGateway, ProviderRegistry};
use namegnome_core::{CoreError, Pipeline, PlanOptions};
use namegnome_model::{
    ApplyMode, ApplyOptions, CollisionStrategy, MediaType, PlanReview, ProviderKind, ScanRequest,
    ScanResult,
};

const EXIT_VALIDATION: u8 = 2;
const EXIT_PARTIAL: u8 = 3;
const EXIT_LOCKED: u8 = 4;
const EXIT_PROVIDER: u8 = 5;

#[derive(Parser, Debug)]
#[command(name = "namegnomectl")]
#[command(about = "Rename media libraries against canonical provider metadata")]
struct Cli {
    /// Cache database path (overrides config/env)
    #[arg(long, global = true, env = "NAMEGNOME_CACHE_PATH")]
    cache_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk a library root and print the scan snapshot summary
    Scan(ScanArgs),
    /// Plan operations
    Plan {
        #[command(subcommand)]
        action: PlanAction,
    },
    /// Execute an approved plan
    Apply(ApplyArgs),
    /// Resolve a pending disambiguation token and re-plan
    Resolve(ResolveArgs),
}

#[derive(Subcommand, Debug)]
enum PlanAction {
    /// Scan a root and generate a plan review
    Generate(GenerateArgs),
}

#[derive(ClapArgs, Debug)]
struct ScanArgs {
    #[arg(long)]
    root: PathBuf,

    #[arg(long = "media-type", value_parser = parse_media_type)]
    media_type: MediaType,

    /// Emit the result as JSON
    #[arg(long)]
    json: bool,
}

#[derive(ClapArgs, Debug)]
struct GenerateArgs {
    #[arg(long)]
    root: PathBuf,

    #[arg(long = "media-type", value_parser = parse_media_type)]
    media_type: MediaType,

    /// Emit the canonical plan JSON
    #[arg(long, conflicts_with = "verbose")]
    json: bool,

    /// Print every plan item, not just the summary
    #[arg(long)]
    verbose: bool,

    /// Serve exclusively from the cache; misses become needs_review
    #[arg(long)]
    offline: bool,

    /// Run the anthology resolver on multi-segment episode files
    #[arg(long)]
    anthology: bool,

    /// Restrict entity resolution to a single provider
    #[arg(long, value_parser = parse_provider)]
    provider: Option<ProviderKind>,

    /// Skip the LLM assist even when grouping stays ambiguous
    #[arg(long = "no-llm")]
    no_llm: bool,
}

#[derive(ClapArgs, Debug)]
struct ApplyArgs {
    #[arg(long = "plan-id")]
    plan_id: Uuid,

    #[arg(long, value_parser = parse_mode, default_value = "transactional")]
    mode: ApplyMode,

    #[arg(long, value_parser = parse_collision, default_value = "skip")]
    collision: CollisionStrategy,

    /// Skip the confirmation prompt
    #[arg(long, short = 'y')]
    yes: bool,
}

#[derive(ClapArgs, Debug)]
struct ResolveArgs {
    token: String,
    choice: String,
}

fn parse_media_type(raw: &str) -> Result<MediaType, String> {
    MediaType::parse(raw).ok_or_else(|| format!("unknown media type '{raw}' (tv, movie, music)"))
}

fn parse_provider(raw: &str) -> Result<ProviderKind, String> {
    ProviderKind::parse(raw).ok_or_else(|| format!("unknown provider '{raw}'"))
}

fn parse_mode(raw: &str) -> Result<ApplyMode, String> {
    match raw {
        "dry-run" | "dry_run" => Ok(ApplyMode::DryRun),
        "transactional" => Ok(ApplyMode::Transactional),
        "continue-on-error" | "continue_on_error" => Ok(ApplyMode::ContinueOnError),
        _ => Err(format!(
            "unknown mode '{raw}' (dry-run, transactional, continue-on-error)"
        )),
    }
}

fn parse_collision(raw: &str) -> Result<CollisionStrategy, String> {
    match raw {
        "skip" => Ok(CollisionStrategy::Skip),
        "overwrite" => Ok(CollisionStrategy::Overwrite),
        "backup" => Ok(CollisionStrategy::Backup),
        _ => Err(format!("unknown collision strategy '{raw}'")),
    }
}

fn exit_code_for(err: &CoreError) -> u8 {
    match err {
        CoreError::Validation(_) | CoreError::DisambiguationRequired(_) => EXIT_VALIDATION,
        CoreError::Locked { .. } => EXIT_LOCKED,
        CoreError::ProviderUnavailable { .. } => EXIT_PROVIDER,
        _ => 1,
    }
}

async fn build_pipeline(cache_path: Option<PathBuf>) -> anyhow::Result<Pipeline> {
    let mut config = Config::load()?;
    if let Some(path) = cache_path {
        config.cache_path = path;
    }
    let config = Arc::new(config);
    let store = Arc::new(CacheStore::open(&config.cache_path).await?);
    let registry = ProviderRegistry::from_config(&config, Arc::clone(&store));
    let gateway = Arc::new(ProviderGateway::new(registry, Arc::clone(&store), &config));
    Ok(Pipeline::new(store, gateway, config))
}

fn print_plan_summary(review: &PlanReview, verbose: bool) {
    println!("plan {} ({} items)", review.plan_id, review.summary.total_items);
    println!("  fingerprint: {}", review.source_fingerprint);
    for (bucket, count) in &review.summary.by_bucket {
        println!("  {bucket}: {count}");
    }
    if review.summary.anthology_candidates > 0 {
        println!("  anthology: {}", review.summary.anthology_candidates);
    }
    for (warning, count) in &review.summary.warnings {
        println!("  warning {warning}: {count}");
    }
    if verbose {
        for item in &review.items {
            println!(
                "  [{:.2} {}] {} -> {}",
                item.confidence,
                item.bucket.as_str(),
                item.src.path.display(),
                item.dst.path.display()
            );
            for warning in &item.warnings {
                println!("      warning: {warning}");
            }
        }
    }
}

fn report_error(err: &CoreError) {
    if let CoreError::DisambiguationRequired(pending) = err {
        eprintln!(
            "disambiguation required for {} '{}':",
            pending.field, pending.title_norm
        );
        for candidate in &pending.candidates {
            let year = candidate
                .year
                .map_or_else(|| "----".to_string(), |y| y.to_string());
            eprintln!(
                "  {} ({year}) [{} {}]",
                candidate.title, candidate.provider, candidate.id
            );
        }
        eprintln!(
            "resolve with: namegnomectl resolve {} <choice-id>",
            pending.token
        );
    } else {
        eprintln!("error ({}): {err}", err.code());
    }
}

async fn run(cli: Cli) -> Result<u8, anyhow::Error> {
    let pipeline = build_pipeline(cli.cache_path).await?;

    let outcome: Result<u8, CoreError> = match cli.command {
        Command::Scan(args) => {
            let request = ScanRequest {
                root: args.root,
                media_type: args.media_type,
                compute_hashes: false,
            };
            match pipeline.scan(&request, None).await {
                Ok(snapshot) => {
                    let result = ScanResult::from(&snapshot);
                    if args.json {
                        println!("{}", serde_json::to_string_pretty(&result)?);
                    } else {
                        println!(
                            "scan {}: {} files, {} anthology candidates",
                            result.scan_id, result.file_count, result.anthology_candidates
                        );
                        println!("  fingerprint: {}", result.fingerprint);
                    }
                    Ok(0)
                }
                Err(err) => Err(err),
            }
        }
        Command::Plan {
            action: PlanAction::Generate(args),
        } => {
            let request = ScanRequest {
                root: args.root,
                media_type: args.media_type,
                compute_hashes: false,
            };
            let options = PlanOptions {
                anthology: args.anthology,
                offline: args.offline,
                provider: args.provider,
                use_llm: !args.no_llm,
            };
            let planned = async {
                let snapshot = pipeline.scan(&request, None).await?;
                pipeline.plan(&snapshot, &options, None).await
            }
            .await;
            match planned {
                Ok(review) => {
                    if args.json {
                        println!("{}", to_canonical_json(&review)?);
                    } else {
                        print_plan_summary(&review, args.verbose);
                    }
                    Ok(0)
                }
                Err(err) => Err(err),
            }
        }
        Command::Apply(args) => {
            if !args.yes && args.mode != ApplyMode::DryRun {
                print!("apply plan {} to disk? [y/N] ", args.plan_id);
                std::io::stdout().flush()?;
                let mut answer = String::new();
                std::io::stdin().read_line(&mut answer)?;
                if !matches!(answer.trim(), "y" | "Y" | "yes") {
                    println!("aborted");
                    return Ok(0);
                }
            }
            let options = ApplyOptions {
                mode: args.mode,
                collision: args.collision,
            };
            match pipeline.apply_by_id(args.plan_id, &options, None).await {
                Ok(report) => {
                    println!(
                        "report {}: {} renamed, {} skipped, {} stale, {} failed",
                        report.report_id,
                        report.summary.renamed,
                        report.summary.skipped,
                        report.summary.stale,
                        report.summary.failed
                    );
                    if let Some(token) = &report.rollback_token {
                        println!("  rollback token: {token}");
                    }
                    if report.rolled_back {
                        println!("  transaction rolled back");
                    }
                    Ok(if report.is_partial() { EXIT_PARTIAL } else { 0 })
                }
                Err(err) => Err(err),
            }
        }
        Command::Resolve(args) => {
            match pipeline.resolve_and_replan(&args.token, &args.choice).await {
                Ok(review) => {
                    print_plan_summary(&review, false);
                    Ok(0)
                }
                Err(err) => Err(err),
            }
        }
    };

    match outcome {
        Ok(code) => Ok(code),
        Err(err) => {
            report_error(&err);
            Ok(exit_code_for(&err))
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "namegnome_core=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(1)
        }
    }
}
