use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use viewbot_core::bot::{PageAction, RunOptions, RunReport, run_bot, unified_diff};
use viewbot_core::bvid::av_to_bv;
use viewbot_core::config::{DEFAULT_CONFIG_PATH, ViewbotConfig, load_config};
use viewbot_core::format::format_views;
use viewbot_core::infobox::update_page;
use viewbot_core::platform::Platform;
use viewbot_core::scrapers::{ScraperConfig, live_resolver};

#[derive(Debug, Parser)]
#[command(
    name = "viewbot",
    version,
    about = "Refresh song view counts on a MediaWiki wiki"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Walk the wiki and save refreshed view counts")]
    Run(RunArgs),
    #[command(about = "Refresh view counts in a local wikitext file")]
    Check(CheckArgs),
    #[command(about = "Fetch the live view count of one video")]
    Views(ViewsArgs),
    #[command(about = "Convert a Bilibili av number to its BV id")]
    Bvid { av: String },
    #[command(about = "Format a view count the way the bot writes it")]
    Format { views: u64 },
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long, value_name = "TITLE", help = "Start the page walk at this title")]
    start: Option<String>,
    #[arg(long, value_name = "ID", help = "Namespace to walk")]
    namespace: Option<i32>,
    #[arg(short = 'c', long, value_name = "NAME", help = "Only visit members of this category")]
    category: Option<String>,
    #[arg(long, value_name = "N", help = "Stop after this many pages")]
    limit: Option<usize>,
    #[arg(long, help = "Compute edits and print diffs without saving")]
    dry_run: bool,
    #[arg(long, help = "Print the run report as JSON")]
    json: bool,
    #[arg(long, value_name = "TEXT", help = "Override the edit summary")]
    summary: Option<String>,
}

#[derive(Debug, Args)]
struct CheckArgs {
    file: PathBuf,
    #[arg(long, help = "Print a unified diff instead of the updated text")]
    diff: bool,
}

#[derive(Debug, Args)]
struct ViewsArgs {
    #[arg(help = "Platform tag or name (BB, YT, NN)")]
    platform: String,
    id: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_tracing(cli.verbose);

    match cli.command {
        Some(Commands::Run(args)) => run_run(cli.config.as_deref(), args),
        Some(Commands::Check(args)) => run_check(args),
        Some(Commands::Views(args)) => run_views(args),
        Some(Commands::Bvid { av }) => run_bvid(&av),
        Some(Commands::Format { views }) => {
            println!("{}", format_views(views));
            Ok(())
        }
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_runtime_config(path: Option<&Path>) -> Result<ViewbotConfig> {
    let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_PATH));
    debug!(path = %path.display(), exists = path.exists(), "loading config");
    load_config(path)
}

fn run_run(config_path: Option<&Path>, args: RunArgs) -> Result<()> {
    let config = load_runtime_config(config_path)?;
    let options = RunOptions {
        namespace: args.namespace.unwrap_or_else(|| config.namespace()),
        start: args.start.or_else(|| config.bot.start.clone()),
        category: args.category.or_else(|| config.bot.category.clone()),
        limit: args.limit,
        dry_run: args.dry_run,
        summary: args.summary.unwrap_or_else(|| config.summary()),
    };
    info!(
        namespace = options.namespace,
        start = options.start.as_deref().unwrap_or("<none>"),
        category = options.category.as_deref().unwrap_or("<none>"),
        dry_run = options.dry_run,
        "starting bot run"
    );
    let resolver = live_resolver(ScraperConfig::from_env())?;
    let report = run_bot(&config, &options, &resolver)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_run_report(&report);
    }
    if !report.success {
        std::process::exit(1);
    }
    Ok(())
}

fn print_run_report(report: &RunReport) {
    println!("view count run");
    println!("dry_run: {}", format_flag(report.dry_run));
    println!("scanned: {}", report.scanned);
    println!("candidates: {}", report.candidates);
    println!("changed: {}", report.changed);
    println!("edited: {}", report.edited);
    println!("skipped: {}", report.skipped);
    println!("requests: {}", report.request_count);
    for page in &report.pages {
        if page.action == PageAction::Unchanged {
            continue;
        }
        println!(
            "  {:?} {}: {}",
            page.action,
            page.title,
            page.detail.as_deref().unwrap_or("")
        );
        if let Some(diff) = &page.diff {
            print!("{diff}");
        }
    }
    if !report.errors.is_empty() {
        println!("errors:");
        for error in &report.errors {
            println!("  - {error}");
        }
    }
}

fn run_check(args: CheckArgs) -> Result<()> {
    let text = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let resolver = live_resolver(ScraperConfig::from_env())?;
    let update = update_page(&text, &resolver)?;

    for template in &update.templates {
        info!(
            before = template.before.trim(),
            after = template.after.trim(),
            links = template.link_count,
            changed = template.changed,
            "checked infobox"
        );
    }
    if args.diff {
        let title = args.file.to_string_lossy().replace('\\', "/");
        print!("{}", unified_diff(&title, &text, &update.text));
    } else {
        print!("{}", update.text);
    }
    Ok(())
}

fn run_views(args: ViewsArgs) -> Result<()> {
    let platform = Platform::parse(&args.platform)?;
    let resolver = live_resolver(ScraperConfig::from_env())?;
    let views = resolver.resolve(platform, &args.id)?;
    info!(%platform, id = %args.id, views, "resolved view count");
    println!("{views}");
    Ok(())
}

fn run_bvid(av: &str) -> Result<()> {
    let trimmed = av.trim();
    let digits = trimmed
        .strip_prefix("av")
        .or_else(|| trimmed.strip_prefix("AV"))
        .unwrap_or(trimmed);
    let number = digits
        .parse::<u64>()
        .with_context(|| format!("invalid av number: {av}"))?;
    println!("{}", av_to_bv(number));
    Ok(())
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
