//! Binary entry point for the roadstore administrative CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use roadstore::{
    admin::{inspect, verify, InspectReport, VerifyLevel, VerifyReport},
    cli::import::{run_import, ImportConfig, ImportSummary},
    config::StoreConfig,
    logging::init_logging,
    storage::archive::Descriptor,
};

#[derive(Parser, Debug)]
#[command(
    name = "roadstore",
    version,
    about = "Administrative CLI for roadstore graph archives",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "ROADSTORE_CONFIG",
        help = "Config file (defaults to the platform config dir)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(
        long,
        global = true,
        value_name = "FILTER",
        help = "Log filter, e.g. debug or roadstore::staging=trace (overrides RUST_LOG)"
    )]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ImportCmd {
    #[arg(long, value_name = "FILE", help = "CSV file with id,lat,lon[,tags] columns")]
    nodes: PathBuf,

    #[arg(long, value_name = "DIR", help = "Staging directory for this run")]
    staging: PathBuf,

    #[arg(long, value_name = "ARCHIVE", help = "Archive to write")]
    output: PathBuf,

    #[arg(long, help = "Keep the staging directory after a successful import")]
    keep_staging: bool,

    #[arg(long, default_value = "unknown", help = "Data supplier recorded in the metadata")]
    supplier: String,

    #[arg(long, help = "Dataset name recorded in the metadata")]
    name: Option<String>,

    #[arg(long, value_name = "DEGREES", help = "Override the staging cell size")]
    cell_degrees: Option<f64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Print archive header and metadata")]
    Info {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,
    },

    #[command(about = "List the streams stored in an archive")]
    Streams {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,
    },

    #[command(about = "Verify archive integrity")]
    Verify {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        #[arg(
            long,
            value_enum,
            default_value_t = VerifyLevelArg::Fast,
            help = "Verification level"
        )]
        level: VerifyLevelArg,
    },

    #[command(about = "Import nodes from CSV into a new archive")]
    Import(ImportCmd),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum VerifyLevelArg {
    Fast,
    Full,
}

impl From<VerifyLevelArg> for VerifyLevel {
    fn from(level: VerifyLevelArg) -> Self {
        match level {
            VerifyLevelArg::Fast => VerifyLevel::Fast,
            VerifyLevelArg::Full => VerifyLevel::Full,
        }
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref())?;
    let config = StoreConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Command::Info { archive } => {
            let report = inspect(&archive)?;
            emit(&cli.format, &report, |_| print_info_text(&report))?;
        }
        Command::Streams { archive } => {
            let report = inspect(&archive)?;
            emit(&cli.format, &report.streams, |_| print_streams_text(&report))?;
        }
        Command::Verify { archive, level } => {
            let report = verify(&archive, level.into())?;
            emit(&cli.format, &report, |_| print_verify_text(&report))?;
            if !report.success {
                std::process::exit(2);
            }
        }
        Command::Import(cmd) => {
            let import_cfg = build_import_config(cmd, &config);
            let summary = run_import(&import_cfg)?;
            emit(&cli.format, &summary, |_| print_import_text(&summary))?;
        }
    }

    Ok(())
}

fn build_import_config(cmd: ImportCmd, config: &StoreConfig) -> ImportConfig {
    let mut descriptor = Descriptor::new(cmd.supplier, "CSV", "roadstore");
    descriptor.name = cmd.name;
    let mut staging_options = config.staging.clone();
    if let Some(degrees) = cmd.cell_degrees {
        staging_options.cell_degrees = degrees;
    }
    ImportConfig {
        nodes: cmd.nodes,
        staging: cmd.staging,
        output: cmd.output,
        keep_staging: cmd.keep_staging,
        descriptor,
        staging_options,
        archive_options: config.archive.clone(),
    }
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(OutputFormat),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(OutputFormat::Text),
    }
    Ok(())
}

fn print_info_text(report: &InspectReport) {
    let meta = &report.metadata;
    let desc = &meta.descriptor;
    println!("Archive: {} ({} bytes)", report.path.display(), report.file_bytes);
    println!(
        "  format_version={} streams={} payload_bytes={}",
        report.header.format_version,
        report.header.stream_count,
        report.payload_bytes()
    );
    println!(
        "Descriptor: supplier={} format={} specification={} name={} version={}",
        desc.supplier,
        desc.format,
        desc.specification,
        desc.name.as_deref().unwrap_or("-"),
        desc.version.as_deref().unwrap_or("-"),
    );
    println!(
        "Counts: vertices={} edges={} places={} relations={}",
        meta.counts.vertices.value,
        meta.counts.edges.value,
        meta.counts.places.value,
        meta.counts.relations.value
    );
    match &meta.bounds {
        Some(b) => println!(
            "Bounds: ({:.7}, {:.7}) - ({:.7}, {:.7})",
            b.min.lat(),
            b.min.lon(),
            b.max.lat(),
            b.max.lon()
        ),
        None => println!("Bounds: none"),
    }
    println!("Built: {}", report.built_at.as_deref().unwrap_or("unknown"));
}

fn print_streams_text(report: &InspectReport) {
    for stream in &report.streams {
        println!(
            "{:<24} {:<8} entries={:<10} bytes={:<10} crc32=0x{:08x}",
            stream.name,
            stream.kind.name(),
            stream.element_count,
            stream.len,
            stream.crc32
        );
    }
}

fn print_verify_text(report: &VerifyReport) {
    println!(
        "Verify ({:?}) => success={} streams={} decoded={} bytes={} vertices={} edges={}",
        report.level,
        report.success,
        report.counts.streams,
        report.counts.streams_decoded,
        report.counts.bytes_checked,
        report.counts.vertices,
        report.counts.edges,
    );
    for finding in &report.findings {
        println!("- {:?}: {}", finding.severity, finding.message);
    }
}

fn print_import_text(summary: &ImportSummary) {
    println!(
        "Imported {} nodes from {} cells (bounds {})",
        summary.nodes_imported,
        summary.cells,
        if summary.metadata.bounds.is_some() { "set" } else { "empty" }
    );
}
