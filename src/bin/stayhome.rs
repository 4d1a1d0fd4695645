//! stayhome CLI - command-line interface for the stay-home index pipeline
//!
//! Commands:
//! - transform: Run the full pipeline over an observation panel and a population table
//! - validate: Check input records and preview the merge
//! - doctor: Diagnose configuration and environment
//! - schema: Print input and output record schemas

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use stayhome_index::encoder::{OutputFormat, PanelEncoder};
use stayhome_index::merger::{MergeStats, PanelMerger};
use stayhome_index::summary::summarize;
use stayhome_index::types::{ObservationRecord, PopulationRecord};
use stayhome_index::{
    IndexProcessor, PipelineConfig, RecordFormat, RecordReader, INDEX_VERSION, OBSERVATION_SCHEMA,
    OUTPUT_SCHEMA, POPULATION_SCHEMA, PRODUCER_NAME,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// stayhome - county stay-home index from device panel data
#[derive(Parser)]
#[command(name = "stayhome")]
#[command(version = INDEX_VERSION)]
#[command(about = "Compute population-adjusted, baseline-indexed county stay-home metrics", long_about = None)]
struct Cli {
    /// Log output format (logs go to stderr; filter with RUST_LOG)
    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and write the enriched panel
    Transform {
        /// Observation panel path (use - for stdin)
        #[arg(long)]
        observations: PathBuf,

        /// Population table path
        #[arg(long)]
        population: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// Input format (both input files)
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormatArg,

        /// Pipeline configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Baseline date (YYYY-MM-DD), overrides the configuration file
        #[arg(long)]
        reference_date: Option<String>,

        /// Write the run report (JSON) to this path
        #[arg(long)]
        report: Option<PathBuf>,

        /// Write state daily summaries to this path, in the output format
        #[arg(long)]
        summary: Option<PathBuf>,
    },

    /// Validate input records and report what the merge would drop
    Validate {
        /// Observation panel path (use - for stdin)
        #[arg(long)]
        observations: PathBuf,

        /// Population table path
        #[arg(long)]
        population: Option<PathBuf>,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Pipeline configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Check a configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print
        #[arg(value_enum)]
        schema_type: SchemaType,

        /// Output as JSON schema
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
}

impl From<InputFormat> for RecordFormat {
    fn from(format: InputFormat) -> Self {
        match format {
            InputFormat::Ndjson => RecordFormat::Ndjson,
            InputFormat::Json => RecordFormat::Json,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum OutputFormatArg {
    /// Newline-delimited JSON (one row per line)
    Ndjson,
    /// JSON array of rows
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(format: OutputFormatArg) -> Self {
        match format {
            OutputFormatArg::Ndjson => OutputFormat::Ndjson,
            OutputFormatArg::Json => OutputFormat::Json,
            OutputFormatArg::JsonPretty => OutputFormat::JsonPretty,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Observation panel records
    Observation,
    /// Population reference records
    Population,
    /// Enriched panel rows
    Output,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_format);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Install a stderr subscriber; stdout is reserved for data
fn init_logging(format: &LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stayhome_index=info,stayhome=info"));

    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(io::stderr))
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(io::stderr))
            .init(),
    }
}

fn run(cli: Cli) -> Result<(), StayhomeCliError> {
    match cli.command {
        Commands::Transform {
            observations,
            population,
            output,
            input_format,
            output_format,
            config,
            reference_date,
            report,
            summary,
        } => cmd_transform(TransformArgs {
            observations: &observations,
            population: &population,
            output: &output,
            input_format: input_format.into(),
            output_format: output_format.into(),
            config: config.as_deref(),
            reference_date: reference_date.as_deref(),
            report: report.as_deref(),
            summary: summary.as_deref(),
        }),

        Commands::Validate {
            observations,
            population,
            input_format,
            config,
            json,
        } => cmd_validate(
            &observations,
            population.as_deref(),
            input_format.into(),
            config.as_deref(),
            json,
        ),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),

        Commands::Schema {
            schema_type,
            json_schema,
        } => cmd_schema(schema_type, json_schema),
    }
}

struct TransformArgs<'a> {
    observations: &'a Path,
    population: &'a Path,
    output: &'a Path,
    input_format: RecordFormat,
    output_format: OutputFormat,
    config: Option<&'a Path>,
    reference_date: Option<&'a str>,
    report: Option<&'a Path>,
    summary: Option<&'a Path>,
}

fn cmd_transform(args: TransformArgs<'_>) -> Result<(), StayhomeCliError> {
    let mut config = load_config(args.config)?;
    if let Some(date) = args.reference_date {
        config = config.with_reference_date(PipelineConfig::parse_reference_date(date)?);
    }
    let processor = IndexProcessor::new(config)?;

    let observations =
        RecordReader::read_observations(&read_input(args.observations)?, args.input_format)?;
    let population =
        RecordReader::read_population(&read_input(args.population)?, args.input_format)?;
    info!(
        observations = observations.len(),
        population = population.len(),
        "loaded input tables"
    );

    let output = processor.process(&observations, &population)?;
    let encoder = PanelEncoder::new(args.output_format);

    write_output(args.output, &encoder.encode(&output.rows)?)?;

    if let Some(path) = args.report {
        fs::write(path, serde_json::to_string_pretty(&output.report)?)?;
    }
    if let Some(path) = args.summary {
        fs::write(path, encoder.encode(&summarize(&output.rows))?)?;
    }

    Ok(())
}

fn cmd_validate(
    observations_path: &Path,
    population_path: Option<&Path>,
    input_format: RecordFormat,
    config: Option<&Path>,
    json: bool,
) -> Result<(), StayhomeCliError> {
    let config = load_config(config)?;
    let observations: Vec<ObservationRecord> =
        RecordReader::parse(&read_input(observations_path)?, input_format)?;
    let results = RecordReader::validate_observations(&observations);

    let merge = match population_path {
        Some(path) => {
            let population: Vec<PopulationRecord> =
                RecordReader::read_population(&read_input(path)?, input_format)?;
            Some(PanelMerger::merge(&observations, &population, &config.state_codes)?.stats)
        }
        None => None,
    };

    let report = ValidationReport {
        total_records: observations.len(),
        valid_records: observations.len() - results.len(),
        invalid_records: results.len(),
        errors: results
            .iter()
            .map(|r| ValidationErrorDetail {
                index: r.index,
                error: r.error.to_string(),
            })
            .collect(),
        merge,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total records:   {}", report.total_records);
        println!("Valid records:   {}", report.valid_records);
        println!("Invalid records: {}", report.invalid_records);

        if let Some(merge) = &report.merge {
            println!("\nMerge preview:");
            println!("  Rows kept:               {}", merge.rows_out);
            println!("  Outside state range:     {}", merge.out_of_range_state);
            println!("  Null geography:          {}", merge.null_key);
            println!("  No population row:       {}", merge.unmatched);
            println!("  Negative counts:         {}", merge.invalid_counts);
            println!("  State aggregate rows:    {}", merge.state_aggregate_rows_skipped);
        }

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - Record {}: {}", err.index + 1, err.error);
            }
        }
    }

    if report.invalid_records > 0 {
        Err(StayhomeCliError::ValidationFailed(report.invalid_records))
    } else {
        Ok(())
    }
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), StayhomeCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("{} {}", PRODUCER_NAME, INDEX_VERSION),
    });

    checks.push(DoctorCheck {
        name: "schemas".to_string(),
        status: CheckStatus::Ok,
        message: format!(
            "Inputs: {}, {}; output: {}",
            OBSERVATION_SCHEMA, POPULATION_SCHEMA, OUTPUT_SCHEMA
        ),
    });

    let effective = match config {
        Some(path) if !path.exists() => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: "Configuration file does not exist; using defaults".to_string(),
            });
            PipelineConfig::default()
        }
        Some(path) => match fs::read_to_string(path)
            .map_err(StayhomeCliError::from)
            .and_then(|content| PipelineConfig::from_json(&content).map_err(Into::into))
        {
            Ok(config) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: "Configuration file valid".to_string(),
                });
                config
            }
            Err(e) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Invalid configuration: {}", CliError::from(e).message),
                });
                PipelineConfig::default()
            }
        },
        None => PipelineConfig::default(),
    };

    checks.push(DoctorCheck {
        name: "reference_date".to_string(),
        status: CheckStatus::Ok,
        message: format!(
            "Baseline {}, window {}, min history {}, states {}..={}",
            effective.reference_date,
            effective.smoothing_window,
            effective.min_history,
            effective.state_codes.first,
            effective.state_codes.last
        ),
    });

    // Check stdin (observations can be piped in with --observations -)
    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass files by path)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (--observations - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: INDEX_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("stayhome Doctor Report");
        println!("======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(StayhomeCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_schema(schema_type: SchemaType, json_schema: bool) -> Result<(), StayhomeCliError> {
    match schema_type {
        SchemaType::Observation => {
            if json_schema {
                println!("{}", observation_json_schema());
            } else {
                println!("Observation Schema: {}", OBSERVATION_SCHEMA);
                println!();
                println!("One record per county per day:");
                println!("- state_id: state FIPS code (number or numeric string, nullable)");
                println!("- county_id: county FIPS code (number or numeric string, nullable)");
                println!("- date: YYYY-MM-DD");
                println!("- device_count: sampled devices residing in the county");
                println!("- completely_home_device_count: devices that did not leave home");
            }
        }
        SchemaType::Population => {
            if json_schema {
                println!("{}", population_json_schema());
            } else {
                println!("Population Schema: {}", POPULATION_SCHEMA);
                println!();
                println!("- state_id, county_id: FIPS codes; county_id 0 is a state total and is ignored");
                println!("- state_name, county_name: display names");
                println!("- population_2019: census population (nullable)");
            }
        }
        SchemaType::Output => {
            if json_schema {
                println!("{}", output_json_schema());
            } else {
                println!("Output Schema: {}", OUTPUT_SCHEMA);
                println!();
                println!("One row per county per day, ordered by state, county, date:");
                println!("- keys: state_id, county_id, date, state_name, county_name");
                println!("- inputs: device_count, completely_home_device_count, population");
                println!("- bias correction: state_population, state_sample_population,");
                println!("  adjustment_factor, adjusted_device_count, adjusted_home_count");
                println!("- prior: state_prior_mean, state_prior_variance, prior_alpha, prior_beta");
                println!("- posterior: posterior_alpha, posterior_beta, posterior_mean_pct");
                println!("- smoothed_estimate, index_value");
                println!("- flags: reasons a derived value is null");
            }
        }
    }

    Ok(())
}

// Helper functions

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, StayhomeCliError> {
    match path {
        Some(path) => Ok(PipelineConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(PipelineConfig::default()),
    }
}

fn read_input(path: &Path) -> Result<String, StayhomeCliError> {
    if path.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn write_output(path: &Path, data: &str) -> Result<(), StayhomeCliError> {
    if path.to_string_lossy() == "-" {
        print!("{}", data);
    } else {
        fs::write(path, data)?;
    }
    Ok(())
}

fn observation_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": OBSERVATION_SCHEMA,
        "type": "object",
        "required": ["date", "device_count", "completely_home_device_count"],
        "properties": {
            "state_id": { "type": ["integer", "string", "null"] },
            "county_id": { "type": ["integer", "string", "null"] },
            "date": { "type": "string", "format": "date" },
            "device_count": { "type": "integer", "minimum": 0 },
            "completely_home_device_count": { "type": "integer", "minimum": 0 }
        }
    })
    .to_string()
}

fn population_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": POPULATION_SCHEMA,
        "type": "object",
        "properties": {
            "state_id": { "type": ["integer", "string", "null"] },
            "county_id": { "type": ["integer", "string", "null"] },
            "state_name": { "type": ["string", "null"] },
            "county_name": { "type": ["string", "null"] },
            "population_2019": { "type": ["integer", "null"], "minimum": 0 }
        }
    })
    .to_string()
}

fn output_json_schema() -> String {
    let nullable_number = serde_json::json!({ "type": ["number", "null"] });
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": OUTPUT_SCHEMA,
        "type": "object",
        "required": ["state_id", "county_id", "date", "device_count", "completely_home_device_count"],
        "properties": {
            "state_id": { "type": "integer" },
            "county_id": { "type": "integer" },
            "date": { "type": "string", "format": "date" },
            "state_name": { "type": ["string", "null"] },
            "county_name": { "type": ["string", "null"] },
            "device_count": { "type": "integer" },
            "completely_home_device_count": { "type": "integer" },
            "population": { "type": ["integer", "null"] },
            "state_population": nullable_number,
            "state_sample_population": nullable_number,
            "adjustment_factor": nullable_number,
            "adjusted_device_count": nullable_number,
            "adjusted_home_count": nullable_number,
            "state_prior_mean": nullable_number,
            "state_prior_variance": nullable_number,
            "prior_alpha": nullable_number,
            "prior_beta": nullable_number,
            "posterior_alpha": nullable_number,
            "posterior_beta": nullable_number,
            "posterior_mean_pct": nullable_number,
            "smoothed_estimate": nullable_number,
            "index_value": nullable_number,
            "flags": { "type": "array", "items": { "type": "string" } }
        }
    })
    .to_string()
}

// Error types

#[derive(Debug)]
enum StayhomeCliError {
    Io(io::Error),
    Compute(stayhome_index::ComputeError),
    Json(serde_json::Error),
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for StayhomeCliError {
    fn from(e: io::Error) -> Self {
        StayhomeCliError::Io(e)
    }
}

impl From<stayhome_index::ComputeError> for StayhomeCliError {
    fn from(e: stayhome_index::ComputeError) -> Self {
        StayhomeCliError::Compute(e)
    }
}

impl From<serde_json::Error> for StayhomeCliError {
    fn from(e: serde_json::Error) -> Self {
        StayhomeCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<StayhomeCliError> for CliError {
    fn from(e: StayhomeCliError) -> Self {
        use stayhome_index::ComputeError;

        match e {
            StayhomeCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            StayhomeCliError::Compute(e) => {
                let (code, hint) = match &e {
                    ComputeError::ParseError(_) | ComputeError::JsonError(_) => (
                        "PARSE_ERROR",
                        "Run 'stayhome schema observation' for the expected record layout",
                    ),
                    ComputeError::EmptyInput(_) => (
                        "EMPTY_INPUT",
                        "Check that observation and population state/county codes overlap",
                    ),
                    ComputeError::DuplicateObservation(_)
                    | ComputeError::DuplicatePopulation(_) => (
                        "DUPLICATE_KEY",
                        "Each county-day and each county population must appear once",
                    ),
                    ComputeError::InvalidConfig(_) | ComputeError::DateParseError(_) => (
                        "CONFIG_ERROR",
                        "Run 'stayhome doctor --config <file>' to check the configuration",
                    ),
                    ComputeError::EncodingError(_) => ("ENCODING_ERROR", "Check output format"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            StayhomeCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            StayhomeCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} records failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            StayhomeCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_records: usize,
    valid_records: usize,
    invalid_records: usize,
    errors: Vec<ValidationErrorDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    merge: Option<MergeStats>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    error: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
