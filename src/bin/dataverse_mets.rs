use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dataverse_mets::app::{App, ProgressEvent, ProgressSink, StageOptions};
use dataverse_mets::config::{ConfigLoader, ResolvedConfig};
use dataverse_mets::domain::{RestrictedPolicy, TransferId};
use dataverse_mets::error::DataverseError;
use dataverse_mets::output::JsonOutput;
use dataverse_mets::records::SqliteStore;

#[derive(Parser)]
#[command(name = "dataverse-mets")]
#[command(about = "Dataverse transfer METS generation and reconciliation")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true, help = "Print the stage result as JSON on stdout")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Generate METS.xml from the transfer's dataset.json")]
    Convert(StageArgs),
    #[command(about = "Match METS.xml against the transfer's file records")]
    Reconcile(ReconcileArgs),
}

#[derive(Args, Clone)]
struct StageArgs {
    transfer_dir: Utf8PathBuf,

    transfer_uuid: Option<String>,

    #[arg(long)]
    dataset_name: Option<String>,

    #[arg(long)]
    output_dir: Option<Utf8PathBuf>,

    #[arg(long)]
    output_name: Option<String>,

    #[arg(long, value_enum)]
    restricted_policy: Option<RestrictedPolicy>,
}

#[derive(Args, Clone)]
struct ReconcileArgs {
    #[command(flatten)]
    stage: StageArgs,

    #[arg(long)]
    database: Option<Utf8PathBuf>,
}

struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({:.2}s)", event.message, elapsed.as_secs_f64()),
            None => eprintln!("{}", event.message),
        }
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<DataverseError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &DataverseError) -> u8 {
    match error {
        DataverseError::MetadataUnavailable { .. } => 2,
        DataverseError::Structure(_) => 3,
        DataverseError::Match { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Convert(args) => {
            apply_overrides(&mut config, &args);
            if let Some(uuid) = &args.transfer_uuid {
                info!(transfer = %uuid, "convert called for transfer");
            }
            let app = App::new(config);
            let options = stage_options(&args);
            let result = if cli.json {
                let result = app.convert(&args.transfer_dir, &options, &JsonOutput)?;
                JsonOutput::print_convert(&result)
                    .map_err(|err| DataverseError::Filesystem(err.to_string()))?;
                result
            } else {
                app.convert(&args.transfer_dir, &options, &StderrProgress)?
            };
            info!(mets = %result.mets_path, items = result.items, "conversion finished");
        }
        Commands::Reconcile(args) => {
            apply_overrides(&mut config, &args.stage);
            if let Some(database) = args.database {
                config.database = Some(database);
            }
            let transfer: TransferId = args
                .stage
                .transfer_uuid
                .as_deref()
                .ok_or_else(|| DataverseError::InvalidTransferId("missing".to_string()))?
                .parse()?;
            let database = config.database.clone().ok_or_else(|| {
                DataverseError::InvalidConfigValue(
                    "reconcile needs a database path (--database or config `database`)".to_string(),
                )
            })?;

            let mut store = SqliteStore::open(&database)?;
            let app = App::new(config);
            let options = stage_options(&args.stage);
            let dir = &args.stage.transfer_dir;
            if cli.json {
                let result = app.reconcile(&mut store, dir, &transfer, &options, &JsonOutput)?;
                JsonOutput::print_reconcile(&result)
                    .map_err(|err| DataverseError::Filesystem(err.to_string()))?;
            } else {
                app.reconcile(&mut store, dir, &transfer, &options, &StderrProgress)?;
            }
        }
    }
    Ok(())
}

fn apply_overrides(config: &mut ResolvedConfig, args: &StageArgs) {
    if let Some(policy) = args.restricted_policy {
        config.restricted_policy = policy;
    }
}

fn stage_options(args: &StageArgs) -> StageOptions {
    StageOptions {
        dataset_name: args.dataset_name.clone(),
        output_dir: args.output_dir.clone(),
        output_name: args.output_name.clone(),
    }
}
