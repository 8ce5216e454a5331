use anyhow::{bail, Context, Result};
use clap::Parser;
use sql_verifier::{Orchestrator, SampleDataset, SchemaModel, VerificationReport, VerifierConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sql-verify")]
#[command(about = "Verify SQL statements against a schema and sample data, repairing local faults")]
struct Args {
    /// SQL statements to verify
    statements: Vec<String>,

    /// Schema description (JSON)
    #[arg(short, long)]
    schema: PathBuf,

    /// Sample rows (JSON, table -> rows)
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Verifier configuration (JSON); SQL_VERIFY_* variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Read statements from a file, one per line
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Report findings without attempting repairs
    #[arg(long)]
    no_fix: bool,

    /// Maximum repair attempts per statement
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Print reports as JSON
    #[arg(long)]
    json: bool,
}

fn read_statements(args: &Args) -> Result<Vec<String>> {
    let mut statements = args.statements.clone();
    if let Some(path) = &args.file {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read statements from {}", path.display()))?;
        statements.extend(
            raw.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with("--"))
                .map(str::to_string),
        );
    }
    if statements.is_empty() {
        bail!("No statements given; pass them as arguments or with --file");
    }
    Ok(statements)
}

fn load_config(args: &Args) -> Result<VerifierConfig> {
    let mut config = match &args.config {
        Some(path) => VerifierConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => VerifierConfig::default(),
    }
    .apply_env()?;

    if args.no_fix {
        config.auto_fix = false;
    }
    if let Some(max) = args.max_attempts {
        config.max_repair_attempts = max;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let statements = read_statements(&args)?;
    let config = load_config(&args)?;

    let schema = SchemaModel::load(&args.schema)
        .with_context(|| format!("Failed to load schema from {}", args.schema.display()))?;
    let dataset = match &args.data {
        Some(path) => Some(
            SampleDataset::load(path)
                .with_context(|| format!("Failed to load sample data from {}", path.display()))?,
        ),
        None => None,
    };

    info!(
        "Verifying {} statement(s) against {} table(s)",
        statements.len(),
        schema.tables().len()
    );

    let orchestrator = Arc::new(Orchestrator::new(config)?);
    let schema = Arc::new(schema);
    let dataset = Arc::new(dataset);

    let handles: Vec<_> = statements
        .into_iter()
        .map(|sql| {
            let orchestrator = Arc::clone(&orchestrator);
            let schema = Arc::clone(&schema);
            let dataset = Arc::clone(&dataset);
            tokio::task::spawn_blocking(move || {
                orchestrator.verify(&sql, &schema, (*dataset).as_ref())
            })
        })
        .collect();

    let mut reports: Vec<VerificationReport> = Vec::with_capacity(handles.len());
    for handle in handles {
        let report = handle.await.context("Verification task panicked")??;
        reports.push(report);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!("{}", report.render());
        }
    }

    let failed = reports.iter().filter(|r| !r.passed).count();
    if failed > 0 {
        error!("{} of {} statement(s) failed verification", failed, reports.len());
        std::process::exit(1);
    }
    Ok(())
}
