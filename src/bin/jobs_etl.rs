use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use job_postings_pipeline::config::{ConfigLoader, Credentials, ResolvedConfig};
use job_postings_pipeline::domain::SearchId;
use job_postings_pipeline::error::PipelineError;
use job_postings_pipeline::flows::{
    CollectFlow, CollectOptions, FeatureFlow, FeatureOptions, ProgressSink, RunReport, SplitFlow,
    SyncFlow, init_warehouse,
};
use job_postings_pipeline::output::{JsonOutput, OutputMode, TextOutput};
use job_postings_pipeline::serpapi::SerpApiClient;
use job_postings_pipeline::storage::{FilePersistence, StorageBackend};
use job_postings_pipeline::warehouse::WarehouseBackend;

#[derive(Parser)]
#[command(name = "jobs-etl")]
#[command(about = "Collect Google Jobs listings, stage them and build the job-results feature table")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true, help = "Configuration file (defaults to ./jobs-etl.json when present)")]
    config: Option<String>,

    #[arg(long, global = true, help = "Print reports as JSON")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Query the search API across the configured grid")]
    Collect(CollectArgs),
    #[command(about = "Split raw responses into metadata, parameters and job results")]
    Split(SplitArgs),
    #[command(about = "Load processed files the warehouse has not seen yet")]
    Sync,
    #[command(about = "Derive the feature table from the warehouse")]
    Features(FeaturesArgs),
    #[command(about = "Collect, split, sync and derive features in one go")]
    Run(RunArgs),
    #[command(about = "Create the warehouse datasets and raw tables")]
    InitWarehouse,
}

#[derive(Args)]
struct CollectArgs {
    #[arg(long)]
    stop_on_error: bool,
}

#[derive(Args)]
struct SplitArgs {
    #[arg(long = "search-id", help = "Split only these searches instead of every pending one")]
    search_ids: Vec<String>,
}

#[derive(Args)]
struct FeaturesArgs {
    #[arg(long, help = "Write the CSV only, leave the final table untouched")]
    no_load: bool,
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    stop_on_error: bool,

    #[arg(long)]
    no_load: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<PipelineError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PipelineError) -> u8 {
    match error {
        PipelineError::InvalidSaveLocation(_)
        | PipelineError::InvalidWarehouseLocation(_)
        | PipelineError::InvalidDedupRule(_)
        | PipelineError::InvalidRegex(_)
        | PipelineError::InvalidConfig(_)
        | PipelineError::ConfigRead(_)
        | PipelineError::ConfigParse(_)
        | PipelineError::MissingCredential(_)
        | PipelineError::InvalidSearchId(_) => 2,
        PipelineError::SearchHttp(_)
        | PipelineError::StorageHttp(_)
        | PipelineError::StorageStatus { .. }
        | PipelineError::WarehouseHttp(_)
        | PipelineError::WarehouseStatus { .. }
        | PipelineError::LoadJobFailed { .. }
        | PipelineError::LoadJobTimeout(_) => 3,
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
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Text => &TextOutput,
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let credentials = Credentials::from_env();
    let persistence = FilePersistence::new(
        StorageBackend::from_layout(&config.storage, credentials.gcp_access_token.as_deref())?,
        config.storage.clone(),
    );

    match cli.command {
        Commands::Collect(args) => {
            let client = search_client(&config, &credentials)?;
            let options = CollectOptions {
                stop_on_error: args.stop_on_error,
            };
            let report = CollectFlow::new(&client, &persistence, &config.api, &config.grid)
                .run(options, sink)?;
            emit(output_mode, &report, TextOutput::collect_summary)
        }
        Commands::Split(args) => {
            let ids = args
                .search_ids
                .iter()
                .map(|id| id.parse::<SearchId>())
                .collect::<Result<Vec<_>, _>>()?;
            let ids = (!ids.is_empty()).then_some(ids.as_slice());
            let report = SplitFlow::new(&persistence).run(ids, sink)?;
            emit(output_mode, &report, TextOutput::split_summary)
        }
        Commands::Sync => {
            let warehouse = warehouse(&config, &credentials)?;
            let report =
                SyncFlow::new(&persistence, &warehouse, &config.warehouse.raw_dataset).run(sink)?;
            emit(output_mode, &report, TextOutput::sync_summary)
        }
        Commands::Features(args) => {
            let warehouse = warehouse(&config, &credentials)?;
            let options = FeatureOptions {
                load: !args.no_load,
            };
            let report =
                FeatureFlow::new(&persistence, &warehouse, &config.features, &config.warehouse)
                    .run(options, sink)?;
            emit(output_mode, &report, TextOutput::features_summary)
        }
        Commands::Run(args) => {
            let client = search_client(&config, &credentials)?;
            let warehouse = warehouse(&config, &credentials)?;
            let collect = CollectFlow::new(&client, &persistence, &config.api, &config.grid).run(
                CollectOptions {
                    stop_on_error: args.stop_on_error,
                },
                sink,
            )?;
            let split = SplitFlow::new(&persistence).run(None, sink)?;
            let sync =
                SyncFlow::new(&persistence, &warehouse, &config.warehouse.raw_dataset).run(sink)?;
            let features =
                FeatureFlow::new(&persistence, &warehouse, &config.features, &config.warehouse)
                    .run(
                        FeatureOptions {
                            load: !args.no_load,
                        },
                        sink,
                    )?;
            let report = RunReport {
                collect,
                split,
                sync,
                features,
            };
            emit(output_mode, &report, TextOutput::run_summary)
        }
        Commands::InitWarehouse => {
            let warehouse = warehouse(&config, &credentials)?;
            let report = init_warehouse(&warehouse, &config.warehouse, sink)?;
            emit(output_mode, &report, TextOutput::setup_summary)
        }
    }
}

fn search_client(
    config: &ResolvedConfig,
    credentials: &Credentials,
) -> Result<SerpApiClient, PipelineError> {
    SerpApiClient::new(
        &config.api.endpoint,
        credentials.serpapi_api_key()?,
        Duration::from_secs(config.api.timeout_secs),
    )
}

fn warehouse(
    config: &ResolvedConfig,
    credentials: &Credentials,
) -> Result<WarehouseBackend, PipelineError> {
    WarehouseBackend::from_settings(
        &config.warehouse,
        credentials.gcp_project.as_deref(),
        credentials.gcp_access_token.as_deref(),
    )
}

fn emit<T: Serialize>(
    mode: OutputMode,
    report: &T,
    summary: fn(&T) -> String,
) -> miette::Result<()> {
    match mode {
        OutputMode::Json => JsonOutput::print(report).into_diagnostic(),
        OutputMode::Text => {
            println!("{}", summary(report));
            Ok(())
        }
    }
}
