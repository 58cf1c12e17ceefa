//! Run the compaction engine over JSON message dumps.
//!
//! # Examples
//!
//! ```sh
//! # Compact a conversation for a 200k-token model, archiving to disk
//! cinch-compact compact --input conv.json --context-limit 200000 \
//!   --reserved-output 8192 --archive-dir ./archive --conversation-id conv-42
//!
//! # Fit an attachment block into 3000 tokens
//! cinch-compact truncate-block --input block.json --max-tokens 3000
//!
//! # Check call/result pairing and token totals
//! cinch-compact check --input conv.json
//!
//! # Print the JSON schema of the message format
//! cinch-compact schema messages
//! ```

use cinch_compact::context::{DEFAULT_CHARS_PER_TOKEN, PairingReport};
use cinch_compact::prelude::*;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Context-window eviction and compaction for LLM agent conversations.
#[derive(Parser)]
#[command(name = "cinch-compact", version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compact a JSON array of messages for one agent iteration
    Compact(CompactArgs),
    /// Fit a JSON context block into a token budget
    TruncateBlock(TruncateBlockArgs),
    /// Report pairing problems and token totals
    Check(CheckArgs),
    /// Print a JSON schema for an input format
    Schema {
        #[arg(value_enum, default_value_t = SchemaKind::Messages)]
        kind: SchemaKind,
    },
}

#[derive(clap::Args)]
struct CompactArgs {
    // ── Input / output ─────────────────────────────────────────
    /// JSON file with an array of messages
    #[arg(long)]
    input: PathBuf,

    /// Write the report here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    // ── Budget ─────────────────────────────────────────────────
    /// Model context window in tokens
    #[arg(long)]
    context_limit: usize,

    /// Tokens reserved for the model's response
    #[arg(long, default_value_t = 4096)]
    reserved_output: usize,

    /// Additional tokens reserved for prompt content outside the messages
    #[arg(long, default_value_t = 0)]
    extra_reserved: usize,

    /// Characters per token for the built-in estimator
    #[arg(long, default_value_t = DEFAULT_CHARS_PER_TOKEN)]
    chars_per_token: f64,

    /// Treat the model as having no prompt cache
    #[arg(long)]
    no_cache: bool,

    // ── Archive ────────────────────────────────────────────────
    /// Archive evicted history as JSON files under this directory
    #[arg(long, conflicts_with = "archive_url")]
    archive_dir: Option<PathBuf>,

    /// POST evicted history to this archive service
    #[arg(long)]
    archive_url: Option<String>,

    /// Conversation id sent to the archive store
    #[arg(long, default_value = "cli")]
    conversation_id: String,

    /// Execution id sent to the archive store
    #[arg(long)]
    execution_id: Option<String>,

    // ── Policy ─────────────────────────────────────────────────
    /// JSON file with a CompactionConfig (missing fields use defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the per-result token cap
    #[arg(long)]
    tool_result_token_cap: Option<usize>,

    /// Override the archive ratio
    #[arg(long)]
    archive_ratio: Option<f64>,
}

#[derive(clap::Args)]
struct TruncateBlockArgs {
    /// JSON file with a context block
    #[arg(long)]
    input: PathBuf,

    /// Token budget for the block
    #[arg(long)]
    max_tokens: usize,

    #[arg(long)]
    max_files: Option<usize>,

    #[arg(long)]
    max_results: Option<usize>,

    #[arg(long)]
    max_output_files_per_result: Option<usize>,

    #[arg(long)]
    min_result_content_tokens: Option<usize>,

    #[arg(long, default_value_t = DEFAULT_CHARS_PER_TOKEN)]
    chars_per_token: f64,
}

#[derive(clap::Args)]
struct CheckArgs {
    /// JSON file with an array of messages
    #[arg(long)]
    input: PathBuf,

    #[arg(long, default_value_t = DEFAULT_CHARS_PER_TOKEN)]
    chars_per_token: f64,
}

#[derive(Clone, Copy, ValueEnum)]
enum SchemaKind {
    Messages,
    ContextBlock,
    Config,
}

// ── Reports ────────────────────────────────────────────────────────

#[derive(Serialize)]
struct CompactReport {
    was_compressed: bool,
    archive_locator: Option<ArchiveLocator>,
    archived_count: usize,
    truncated_tool_results: usize,
    tokens_before: usize,
    tokens_after: usize,
    budget: CompressionBudget,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct CheckReport {
    message_count: usize,
    total_tokens: usize,
    archive_notes: usize,
    pairing_valid: bool,
    pairing: PairingReport,
}

// ── Helpers ────────────────────────────────────────────────────────

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read '{}': {e}", path.display()))?;
    serde_json::from_str(&text).map_err(|e| format!("failed to parse '{}': {e}", path.display()))
}

fn to_pretty_json<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("failed to serialize output: {e}"))
}

fn model_capabilities(args: &CompactArgs) -> ModelCapabilities {
    ModelCapabilities::new(args.context_limit, args.reserved_output)
        .with_cache_affinity(!args.no_cache)
}

fn load_config(args: &CompactArgs, model: &ModelCapabilities) -> Result<CompactionConfig, String> {
    let mut config = match &args.config {
        Some(path) => read_json::<CompactionConfig>(path)?,
        None => CompactionConfig::default(),
    };
    if config.cache_aware {
        config = model.apply_to(config);
    }
    if let Some(cap) = args.tool_result_token_cap {
        config = config.with_tool_result_token_cap(cap);
    }
    if let Some(ratio) = args.archive_ratio {
        config = config.with_archive_ratio(ratio);
    }
    Ok(config)
}

fn build_store(args: &CompactArgs) -> Result<Box<dyn ArchiveStore>, String> {
    if let Some(url) = &args.archive_url {
        let store = HttpArchiveStore::new(url.clone())
            .map_err(|e| format!("failed to build archive client: {e}"))?;
        return Ok(Box::new(store));
    }
    let dir = args
        .archive_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(".cinch-archive"));
    Ok(Box::new(FileArchiveStore::new(dir)))
}

// ── Commands ───────────────────────────────────────────────────────

async fn run_compact(args: &CompactArgs) -> Result<String, String> {
    let messages: Vec<Message> = read_json(&args.input)?;
    let model = model_capabilities(args);
    let config = load_config(args, &model)?;
    let store = build_store(args)?;
    let estimator = CharRatioEstimator::new(args.chars_per_token);

    let mut ctx = ArchiveContext::new(args.conversation_id.clone(), store.as_ref(), &estimator)
        .with_config(config)
        .with_event_handler(&LoggingHandler);
    if let Some(execution_id) = &args.execution_id {
        ctx = ctx.with_execution_id(execution_id.clone());
    }

    let tokens_before = estimate_sequence_tokens(&messages, &estimator);
    let outcome = compress_for_model(&messages, &model, &ctx, args.extra_reserved).await;
    let tokens_after = estimate_sequence_tokens(&outcome.messages, &estimator);

    if outcome.was_compressed {
        eprintln!(
            "  Compacted {} -> {} messages (~{tokens_before} -> ~{tokens_after} tokens)",
            messages.len(),
            outcome.messages.len()
        );
    } else {
        eprintln!("  No compaction needed ({})", outcome.budget.to_log_string());
    }

    let report = CompactReport {
        was_compressed: outcome.was_compressed,
        archive_locator: outcome.archive_locator,
        archived_count: outcome.archived_count,
        truncated_tool_results: outcome.truncated_tool_results,
        tokens_before,
        tokens_after,
        budget: outcome.budget,
        messages: outcome.messages,
    };
    let json = to_pretty_json(&report)?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, &json)
                .map_err(|e| format!("failed to write '{}': {e}", path.display()))?;
            Ok(String::new())
        }
        None => Ok(json),
    }
}

fn run_truncate_block(args: &TruncateBlockArgs) -> Result<String, String> {
    let block: ContextBlock = read_json(&args.input)?;
    let defaults = ContextBlockLimits::default();
    let limits = ContextBlockLimits {
        max_files: args.max_files.unwrap_or(defaults.max_files),
        max_results: args.max_results.unwrap_or(defaults.max_results),
        max_output_files_per_result: args
            .max_output_files_per_result
            .unwrap_or(defaults.max_output_files_per_result),
        min_result_content_tokens: args
            .min_result_content_tokens
            .unwrap_or(defaults.min_result_content_tokens),
    };
    let estimator = CharRatioEstimator::new(args.chars_per_token);
    let truncated = truncate_context_block(&block, args.max_tokens, &limits, &estimator);
    to_pretty_json(&truncated)
}

fn run_check(args: &CheckArgs) -> Result<String, String> {
    let messages: Vec<Message> = read_json(&args.input)?;
    let estimator = CharRatioEstimator::new(args.chars_per_token);
    let pairing = validate_pairing(&messages);
    let report = CheckReport {
        message_count: messages.len(),
        total_tokens: estimate_sequence_tokens(&messages, &estimator),
        archive_notes: messages.iter().filter(|m| m.is_archive_note()).count(),
        pairing_valid: pairing.is_valid(),
        pairing,
    };
    to_pretty_json(&report)
}

fn run_schema(kind: SchemaKind) -> Result<String, String> {
    let schema = match kind {
        SchemaKind::Messages => json_schema_for::<Vec<Message>>(),
        SchemaKind::ContextBlock => json_schema_for::<ContextBlock>(),
        SchemaKind::Config => json_schema_for::<CompactionConfig>(),
    };
    to_pretty_json(&schema)
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Command::Compact(args) => run_compact(args).await,
        Command::TruncateBlock(args) => run_truncate_block(args),
        Command::Check(args) => run_check(args),
        Command::Schema { kind } => run_schema(*kind),
    };

    match result {
        Ok(output) if output.is_empty() => {}
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
