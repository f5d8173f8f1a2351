use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use essaysync_core::blocks::markdown_to_blocks;
use essaysync_core::config::load_config;
use essaysync_core::essay::read_essay;
use essaysync_core::feed::FeedSource;
use essaysync_core::reconcile::{
    NOTHING_TO_SYNC, ReplaceStrategy, SyncOutcome, SyncReport, SyncRequest, sync_from_env,
};
use essaysync_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, normalize_for_display, resolve_paths,
};
use serde::Serialize;

#[derive(Debug, Parser)]
#[command(
    name = "essaysync",
    version,
    about = "Publish changed markdown essays to Notion pages"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    essays_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    essays_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            essays_dir: cli.essays_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create or update Notion pages for changed essays")]
    Sync(SyncArgs),
    #[command(about = "Show how an essay would be published, without contacting Notion")]
    Inspect(InspectArgs),
}

#[derive(Debug, Args)]
struct SyncArgs {
    #[arg(
        value_name = "FILE",
        help = "Essay paths relative to the project root (default: $CHANGED_FILES)"
    )]
    files: Vec<String>,
    #[arg(long, conflicts_with = "files", help = "Sync every markdown file in the essays dir")]
    all: bool,
    #[arg(long, value_name = "replace|recreate", help = "Override the content replacement strategy")]
    strategy: Option<ReplaceStrategy>,
    #[arg(long, help = "Report planned actions without calling Notion or writing files")]
    dry_run: bool,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct InspectArgs {
    file: String,
    #[arg(long, help = "Print the result as JSON")]
    json: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Sync(args)) => run_sync(&runtime, args),
        Some(Commands::Inspect(args)) => run_inspect(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_sync(runtime: &RuntimeOptions, args: SyncArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    if runtime.diagnostics {
        println!("[diagnostics]\n{}", paths.diagnostics());
    }

    let config = load_config(&paths.config_path)?;
    let source = if !args.files.is_empty() {
        FeedSource::Explicit(args.files)
    } else if args.all {
        FeedSource::All
    } else {
        FeedSource::ChangedFiles
    };
    let request = SyncRequest {
        source,
        strategy: args.strategy,
        dry_run: args.dry_run,
    };

    let report = match sync_from_env(&paths, &config, &request)? {
        SyncOutcome::NothingToSync => {
            println!("{NOTHING_TO_SYNC}");
            return Ok(());
        }
        SyncOutcome::Completed(report) => report,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_sync_report(&paths, &report);
    }
    Ok(())
}

fn print_sync_report(paths: &ResolvedPaths, report: &SyncReport) {
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("strategy: {}", report.strategy.as_str());
    println!("dry_run: {}", report.dry_run);
    println!("requested: {}", report.requested);
    println!("created: {}", report.created);
    println!("updated: {}", report.updated);
    println!("recreated: {}", report.recreated);
    println!("failed: {}", report.failed);
    println!("deleted_blocks: {}", report.deleted_blocks);
    println!("skipped_deletes: {}", report.skipped_deletes);
    println!("request_count: {}", report.request_count);
    for file in &report.files {
        println!(
            "file: {} [{}] page_id={} blocks={}",
            file.path,
            file.action.as_str(),
            file.page_id.as_deref().unwrap_or("<none>"),
            file.blocks
        );
    }
    if report.errors.is_empty() {
        println!("errors: <none>");
    } else {
        for error in &report.errors {
            println!("error: {error}");
        }
    }
}

#[derive(Debug, Serialize)]
struct InspectReport {
    path: String,
    title: String,
    page_id: Option<String>,
    block_count: usize,
    block_types: BTreeMap<String, usize>,
}

fn run_inspect(runtime: &RuntimeOptions, args: InspectArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    if runtime.diagnostics {
        println!("[diagnostics]\n{}", paths.diagnostics());
    }

    let path = paths.resolve_essay_path(&args.file);
    let essay = read_essay(&path).with_context(|| format!("cannot inspect {}", args.file))?;
    let blocks = markdown_to_blocks(&essay.body);
    let mut block_types = BTreeMap::new();
    for block in &blocks {
        let name = block.block_type().unwrap_or("unknown").to_string();
        *block_types.entry(name).or_insert(0usize) += 1;
    }
    let report = InspectReport {
        path: normalize_for_display(&path),
        title: essay.title,
        page_id: essay.page_id,
        block_count: blocks.len(),
        block_types,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("path: {}", report.path);
    println!("title: {}", report.title);
    println!(
        "page_id: {}",
        report.page_id.as_deref().unwrap_or("<none>")
    );
    println!("block_count: {}", report.block_count);
    if report.block_types.is_empty() {
        println!("block_types: <none>");
    }
    for (name, count) in &report.block_types {
        println!("block_type.{name}: {count}");
    }
    Ok(())
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        essays_dir: runtime.essays_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides);
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    Ok(resolve_paths(&context, &overrides))
}
