use anyhow::{Context, Result};
use cadence_calculator::{
    detect_source, export, inspect, process, CadenceCategory, CadenceConfig, InputFile,
    ReportFilter, ReportView, ReportingPeriod, RuleRegistry, RunInputs, SortOrder, SourceType,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Monthly audit cadence calculator
#[derive(Parser, Debug)]
#[command(name = "cadence")]
#[command(about = "Compute audit cadence reports from ARMT, prior cadence and outflow spreadsheets")]
#[command(version)]
struct Cli {
    /// Config file (TOML)
    #[arg(short, long, global = true, env = "CADENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Node profile to use (overrides the config file)
    #[arg(short, long, global = true)]
    node: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline and write the report files
    Process(ProcessArgs),

    /// Show the shape of input files without processing them
    Inspect {
        /// Files to inspect (type detected from the name unless --kind is given)
        files: Vec<PathBuf>,

        /// Force the input type: armt, cadence or outflow
        #[arg(long)]
        kind: Option<String>,
    },

    /// List node profiles
    Nodes,

    /// List scoring rule sets
    Rules,
}

#[derive(clap::Args, Debug)]
struct ProcessArgs {
    /// ARMT policy export
    #[arg(long)]
    armt: PathBuf,

    /// Previous month's cadence report
    #[arg(long)]
    prior: PathBuf,

    /// Outflow ticket report
    #[arg(long)]
    outflow: PathBuf,

    /// Output month: 2025-12 or "December 2025"
    #[arg(short, long)]
    month: String,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    out: PathBuf,

    /// Rule set name (overrides the config file)
    #[arg(long)]
    rule_set: Option<String>,

    /// Sheet to read from each workbook (overrides the config file)
    #[arg(long)]
    sheet: Option<String>,

    /// Keep only these sources
    #[arg(long = "source")]
    sources: Vec<String>,

    /// Keep only these programs
    #[arg(long = "program")]
    programs: Vec<String>,

    /// Keep only JSR (true) or non-JSR (false) policies
    #[arg(long)]
    jsr: Option<bool>,

    /// Keep only these categories (new, tightened, held, relaxed, carried)
    #[arg(long = "category")]
    categories: Vec<String>,

    /// Keep only these cadence scores
    #[arg(long = "score")]
    scores: Vec<u32>,

    #[arg(long)]
    min_score: Option<u32>,

    #[arg(long)]
    max_score: Option<u32>,

    /// Sort order: key, score, due-date
    #[arg(long, default_value = "key")]
    sort: String,

    /// Print the summary as JSON instead of text
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence_calculator=info,cadence=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = CadenceConfig::resolve(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(node) = &cli.node {
        config.node = config.profile(node)?.name.clone();
    }

    match cli.command {
        Command::Process(args) => run_process(config, args),
        Command::Inspect { files, kind } => run_inspect(&config, &files, kind.as_deref()),
        Command::Nodes => run_nodes(&config),
        Command::Rules => run_rules(&config),
    }
}

fn run_process(mut config: CadenceConfig, args: ProcessArgs) -> Result<()> {
    if let Some(rule_set) = args.rule_set {
        config.rule_set = rule_set;
    }
    if let Some(sheet) = args.sheet {
        config.sheet_name = sheet;
    }

    let period: ReportingPeriod = args.month.parse()?;
    let categories = args
        .categories
        .iter()
        .map(|c| c.parse::<CadenceCategory>())
        .collect::<Result<Vec<_>, _>>()?;

    let view = ReportView {
        filter: ReportFilter {
            sources: args.sources,
            programs: args.programs,
            jsr: args.jsr,
            categories,
            scores: args.scores,
            min_score: args.min_score,
            max_score: args.max_score,
            keys: None,
        },
        sort: args.sort.parse::<SortOrder>()?,
    };

    let inputs = RunInputs::from_paths(&args.armt, &args.prior, &args.outflow)
        .context("Failed to read input files")?;

    println!("🗓️  {} cadence for {}", config.node, period);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let run = match process(&inputs, period, &config, &view) {
        Ok(run) => run,
        Err(e) => {
            if let Some(input) = e.input() {
                eprintln!("❌ {} input rejected, see `cadence inspect`", input);
            }
            return Err(e).with_context(|| format!("Cadence run for {} failed", period));
        }
    };

    let paths = export::write_outputs(
        &args.out,
        &run.report,
        &run.summary,
        run.source_sheets(),
        &config.absent_marker,
    )
    .with_context(|| format!("Failed to write reports to {}", args.out.display()))?;

    if args.json {
        println!("{}", export::summary_json(&run.summary)?);
        return Ok(());
    }

    let stats = &run.stats;
    println!("\n📂 Inputs");
    for (label, load) in [
        ("ARMT", &stats.armt),
        ("Prior cadence", &stats.prior_cadence),
        ("Outflow", &stats.outflow),
    ] {
        println!(
            "   {:<14} {:>6} rows → {:>6} records ({} out of scope, {} duplicates)",
            label, load.rows_read, load.records, load.filtered, load.duplicates
        );
    }

    let summary = &run.summary;
    println!("\n📊 Summary");
    println!("   Records:          {} (of {})", summary.total_records, summary.unfiltered_records);
    println!("   With current NC:  {}", summary.with_current_nc);
    println!("   JSR policies:     {}", summary.jsr_policies);
    for (category, count) in &summary.by_category {
        println!("   {:<17} {}", format!("{}:", category), count);
    }
    if let Some(score) = &summary.score_stats {
        println!(
            "   Score range:      {}-{} (mean {:.1}, median {})",
            score.min, score.max, score.mean, score.median
        );
    }

    println!("\n💾 Written");
    for path in [
        &paths.report,
        &paths.bundle,
        &paths.master,
        &paths.armt,
        &paths.csv,
        &paths.summary,
    ] {
        println!("   {}", path.display());
    }
    println!("   fingerprint {}", paths.fingerprint);

    Ok(())
}

fn run_inspect(config: &CadenceConfig, files: &[PathBuf], kind: Option<&str>) -> Result<()> {
    let profile = config.active_profile()?;

    for path in files {
        let source = match kind {
            Some(k) => parse_kind(k)?,
            None => detect_source(path)?,
        };
        let input = InputFile::from_path(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let report = inspect(&input, source, &config.sheet_name, profile.key_scheme)?;

        let status = if report.is_valid() { "✅" } else { "❌" };
        println!("{} {} ({})", status, display_name(path), report.source);
        println!("   sheet:   {}", report.sheet_name);
        println!("   rows:    {}", report.rows);
        println!("   columns: {}", report.headers.join(", "));
        if !report.is_valid() {
            println!("   missing: {}", report.missing_columns.join(", "));
        }
    }

    Ok(())
}

fn run_nodes(config: &CadenceConfig) -> Result<()> {
    println!("🗺️  Node profiles");
    for profile in config.nodes.values() {
        let marker = if profile.name == config.node { "*" } else { " " };
        println!(
            " {} {:<5} {:<12} {}",
            marker,
            profile.name,
            profile.key_scheme.as_str(),
            profile.description
        );
    }
    Ok(())
}

fn run_rules(config: &CadenceConfig) -> Result<()> {
    let registry = RuleRegistry::with_builtin(&config.ladder);
    println!("🪜 Rule sets");
    for rules in registry.iter() {
        let marker = if rules.name() == config.rule_set { "*" } else { " " };
        println!(" {} {:<12} {}", marker, rules.name(), rules.description());
    }
    println!("\n   Ladder levels:");
    for level in &config.ladder.levels {
        println!(
            "   {:>4} days  breach at {} NC → due in {} days",
            level.days, level.breach_threshold, level.breach_due_days
        );
    }
    Ok(())
}

fn parse_kind(kind: &str) -> Result<SourceType> {
    SourceType::ALL
        .into_iter()
        .find(|s| s.code().eq_ignore_ascii_case(kind))
        .with_context(|| format!("Unknown input kind '{}' (armt, cadence, outflow)", kind))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("?")
        .to_string()
}
