//! Keel CLI - run the vessel profiling workflow from the command line

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use keel_core::prelude::*;
use keel_core::stages::profile_builder::usage_questions;
use keel_core::telemetry;

#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "Build baseline vessel profiles from a photo or manual entry", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to keel.toml, KEEL_CONFIG_PATH and KEEL_* env vars)
    #[arg(short, long, global = true, env = "KEEL_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full profiling workflow for one vessel
    Run(RunArgs),
    /// Print the usage questionnaire as JSON
    Questions,
    /// Print the effective configuration as JSON
    Config,
    /// Version information
    Version,
}

#[derive(Args)]
struct RunArgs {
    /// Photo of the vessel
    #[arg(long, conflicts_with = "make")]
    image: Option<PathBuf>,

    /// Media type of the photo, guessed from the extension when omitted
    #[arg(long, requires = "image")]
    media_type: Option<String>,

    /// Known brand, passed to the vision model as a hint
    #[arg(long, requires = "image")]
    brand: Option<String>,

    /// Known model, passed to the vision model as a hint
    #[arg(long, requires = "image")]
    model: Option<String>,

    /// Builder or make (manual entry)
    #[arg(long, requires = "class_model")]
    make: Option<String>,

    /// Class or model (manual entry)
    #[arg(long = "class-model")]
    class_model: Option<String>,

    /// Vessel name (manual entry)
    #[arg(long)]
    name: Option<String>,

    /// MMSI (manual entry)
    #[arg(long)]
    mmsi: Option<String>,

    /// Overall length, e.g. "25 ft" or "7.6 m" (manual entry)
    #[arg(long)]
    length: Option<String>,

    /// Beam (manual entry)
    #[arg(long)]
    beam: Option<String>,

    /// Hull type (manual entry)
    #[arg(long)]
    boat_type: Option<String>,

    /// Telemetry CSV file
    #[arg(long)]
    telemetry: Option<PathBuf>,

    #[command(flatten)]
    usage: UsageArgs,

    /// Directory for the report, CSV exports and charts
    #[arg(short, long, default_value = "keel-output")]
    output: PathBuf,

    /// Run one stage at a time, printing progress after each
    #[arg(long)]
    step: bool,
}

#[derive(Args)]
struct UsageArgs {
    /// Primary use of the vessel
    #[arg(long)]
    primary_use: Option<String>,

    /// Operating hours per day
    #[arg(long)]
    operating_hours: Option<f64>,

    /// Months per year in service
    #[arg(long)]
    operating_season: Option<f64>,

    /// Typical engine load in percent
    #[arg(long)]
    typical_load: Option<f64>,

    /// Usual sea state and weather
    #[arg(long)]
    operating_conditions: Option<String>,
}

impl UsageArgs {
    fn answers(&self) -> Option<UsageAnswers> {
        let answers = UsageAnswers {
            primary_use: self.primary_use.clone(),
            operating_hours: self.operating_hours,
            operating_season: self.operating_season,
            typical_load: self.typical_load,
            operating_conditions: self.operating_conditions.clone(),
        };
        (answers != UsageAnswers::default()).then_some(answers)
    }
}

fn load_config(path: Option<&Path>) -> Result<KeelConfig> {
    let config = match path {
        Some(path) => KeelConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => KeelConfig::load()?,
    };
    Ok(config)
}

fn guess_media_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

fn session_input(args: &RunArgs) -> Result<SessionInput> {
    let input = match (&args.image, &args.make, &args.class_model) {
        (Some(path), _, _) => {
            let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            let media_type = args
                .media_type
                .clone()
                .unwrap_or_else(|| guess_media_type(path).to_string());
            SessionInput::image(bytes, media_type)
                .with_brand_model(args.brand.clone(), args.model.clone())
        }
        (None, Some(make), Some(model)) => SessionInput::manual(ManualEntry {
            name: args.name.clone(),
            mmsi: args.mmsi.clone(),
            length: args.length.clone(),
            beam: args.beam.clone(),
            boat_type: args.boat_type.clone(),
            ..ManualEntry::new(make, model)
        }),
        _ => bail!("either --image or both --make and --class-model are required"),
    };

    let input = match &args.telemetry {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
            let records = telemetry::read_csv(file)
                .with_context(|| format!("parsing {}", path.display()))?;
            tracing::info!(records = records.len(), "Loaded telemetry");
            input.with_telemetry(records)
        }
        None => input,
    };

    Ok(match args.usage.answers() {
        Some(answers) => input.with_usage(answers),
        None => input,
    })
}

fn chart_extension(media_type: &str) -> &str {
    match media_type {
        "image/svg+xml" => "svg",
        "image/png" => "png",
        _ => "bin",
    }
}

/// Write every artifact the session produced under `dir`
fn write_artifacts(engine: &WorkflowEngine, session: &Session, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let mut written = Vec::new();
    let mut write = |name: String, contents: &[u8]| -> Result<()> {
        let path = dir.join(name);
        fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))?;
        written.push(path);
        Ok(())
    };

    write("session.json".into(), &serde_json::to_vec_pretty(session)?)?;

    for output in session.context.values() {
        match output {
            StageOutput::PerformanceCurves(curves) => {
                let csv = engine.services().exporter.to_csv(&curves.table())?;
                write("performance_curves.csv".into(), csv.as_bytes())?;
            }
            StageOutput::VoyageAnalytics(analytics) => {
                write("voyages.csv".into(), analytics.voyage_csv.as_bytes())?;
                write("dwells.csv".into(), analytics.dwell_csv.as_bytes())?;
            }
            StageOutput::ReportGenerator(report) => {
                write("report.json".into(), &serde_json::to_vec_pretty(report)?)?;
                for chart in &report.charts {
                    let name = format!("{}.{}", chart.name, chart_extension(&chart.media_type));
                    write(name, &chart.data)?;
                }
            }
            _ => {}
        }
    }
    Ok(written)
}

fn print_summary(session: &Session) {
    println!("Session {} {:?}", session.session_id, session.status);
    for record in &session.step_results {
        match &record.result {
            StageResult::Success(_) => {
                println!("  {:<20} ok      {:>6} ms", record.stage_name, record.duration_ms)
            }
            StageResult::Failed(failure) => println!(
                "  {:<20} {}  {}",
                record.stage_name, failure.error_code, failure.error
            ),
        }
    }
    if let Some(reason) = &session.failure_reason {
        println!("Reason: {}", reason);
    }
}

async fn run(config: KeelConfig, args: RunArgs) -> Result<()> {
    let input = session_input(&args)?;
    let engine = WorkflowEngine::from_config(config)?;

    let session = if args.step {
        let id = engine.start(input).await?;
        loop {
            match engine.step(&id).await {
                Ok(record) => {
                    let progress = engine.progress(&id).await?;
                    println!(
                        "[{}/{}] {} {:?} ({:.0}%)",
                        progress.current_step,
                        progress.total_steps,
                        record.stage_name,
                        record.status,
                        progress.percent_complete
                    );
                }
                Err(KeelError::SessionFinished(_)) | Err(KeelError::Cancelled(_)) => break,
                Err(e) => return Err(e.into()),
            }
        }
        engine.status(&id).await?
    } else {
        engine.start_and_run(input).await?
    };

    print_summary(&session);
    for path in write_artifacts(&engine, &session, &args.output)? {
        println!("wrote {}", path.display());
    }

    if session.status == SessionStatus::Failed {
        bail!("profiling failed");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(load_config(cli.config.as_deref())?, args).await?,
        Commands::Questions => {
            println!("{}", serde_json::to_string_pretty(&usage_questions())?);
        }
        Commands::Config => {
            let config = load_config(cli.config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Version => {
            println!("keel {}", env!("CARGO_PKG_VERSION"));
            println!("keel-core {}", keel_core::VERSION);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_manual_input_from_args() {
        let cli = Cli::try_parse_from([
            "keel",
            "run",
            "--make",
            "Boston Whaler",
            "--class-model",
            "Outrage 23",
            "--length",
            "23 ft",
            "--operating-hours",
            "6",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };

        let input = session_input(&args).unwrap();
        let InputSource::Manual(entry) = &input.source else {
            panic!("expected manual input");
        };
        assert_eq!(entry.builder_make, "Boston Whaler");
        assert_eq!(entry.length.as_deref(), Some("23 ft"));
        assert_eq!(input.usage.unwrap().operating_hours, Some(6.0));
    }

    #[test]
    fn test_image_conflicts_with_manual() {
        let parsed = Cli::try_parse_from(["keel", "run", "--image", "boat.jpg", "--make", "Sea Ray"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_media_type_guess() {
        assert_eq!(guess_media_type(Path::new("boat.PNG")), "image/png");
        assert_eq!(guess_media_type(Path::new("boat.jpeg")), "image/jpeg");
    }
}
