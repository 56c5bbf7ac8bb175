use std::path::PathBuf;

use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use ecquorum::{
    checksum::{reconcile_parts, PartChecksum},
    config::Config,
    coordinator::ErasureCoordinator,
    disk::{FailureKind, Outcome, OutcomeSet},
    quorum::{tally, IgnoreSet},
    telemetry::{
        initialize_json_subscriber, initialize_otlp_subscriber, initialize_stdout_subscriber,
    },
};
use serde_json::json;
use tracing::level_filters::LevelFilter;

#[derive(Debug, Parser)]
#[command(name = "ecq")]
#[command(about = "quorum reduction and checksum reconciliation for erasure-coded disks")]
#[command(long_about = None)]
struct Cli {
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
    Otlp,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Reduces one outcome per disk (`Success` or a failure kind) into a single verdict
    Reduce {
        #[arg(long, value_delimiter = ',', required = true)]
        outcomes: Vec<Outcome>,
        #[arg(long, value_delimiter = ',')]
        ignore: Vec<FailureKind>,
    },
    /// Merges two JSON arrays of part checksums, protecting the active part
    Reconcile {
        #[arg(long)]
        current: PathBuf,
        #[arg(long)]
        incoming: PathBuf,
        #[arg(long)]
        active_part: String,
    },
    /// Runs a put/get and a multipart upload against the disks described by a config file
    Simulate {
        #[arg(long)]
        config_path: PathBuf,
    },
}

async fn read_checksums(path: PathBuf) -> anyhow::Result<Vec<PartChecksum>> {
    let c = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&c)?)
}

async fn simulate(config_path: PathBuf) -> anyhow::Result<()> {
    let config = Config::from_path(config_path).await?;
    let coordinator = ErasureCoordinator::from_config(&config)?;
    let volume = "simulation";
    let object = "object";

    let report = |step: &str, result: String| {
        println!("{}", json!({ "step": step, "result": result }));
    };

    match coordinator.make_volume(volume).await {
        Ok(()) => report("make_volume", "ok".to_string()),
        Err(err) => {
            report("make_volume", err.to_string());
            return Ok(());
        }
    }

    let put = coordinator
        .put_object(volume, object, Bytes::from_static(b"hello erasure set"))
        .await;
    report("put_object", format!("{:?}", put));

    let get = coordinator.get_object(volume, object).await;
    report(
        "get_object",
        format!("{:?}", get.map(|data| String::from_utf8_lossy(&data).to_string())),
    );

    let upload_id = match coordinator.new_multipart_upload(volume, object).await {
        Ok(upload_id) => upload_id,
        Err(err) => {
            report("new_multipart_upload", err.to_string());
            return Ok(());
        }
    };
    report("new_multipart_upload", upload_id.clone());

    for (part_number, data) in [(1, "hello "), (2, "multipart")] {
        let part = coordinator
            .put_object_part(volume, object, &upload_id, part_number, Bytes::from(data))
            .await;
        report("put_object_part", format!("{:?}", part));
    }

    let complete = coordinator
        .complete_multipart_upload(volume, object, &upload_id, &[1, 2])
        .await;
    report("complete_multipart_upload", format!("{:?}", complete));

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    match args.log_format {
        LogFormat::Pretty => initialize_stdout_subscriber(LevelFilter::WARN),
        LogFormat::Json => initialize_json_subscriber(LevelFilter::INFO),
        LogFormat::Otlp => initialize_otlp_subscriber("http://localhost:4317/v1/traces")?,
    }

    match args.command {
        Commands::Reduce { outcomes, ignore } => {
            let reduction = tally(&OutcomeSet::new(outcomes), &IgnoreSet::from_kinds(&ignore));
            println!(
                "{}",
                json!({
                    "error": reduction.error().map(|kind| kind.to_string()),
                    "has_quorum": reduction.has_quorum(),
                    "leader": reduction.leader().map(|outcome| format!("{:?}", outcome)),
                    "max_count": reduction.max_count(),
                    "considered": reduction.considered(),
                })
            );
        }
        Commands::Reconcile {
            current,
            incoming,
            active_part,
        } => {
            let current = read_checksums(current).await?;
            let incoming = read_checksums(incoming).await?;
            let merged = reconcile_parts(&current, &incoming, &active_part)?;
            println!("{}", serde_json::to_string_pretty(&merged)?);
        }
        Commands::Simulate { config_path } => simulate(config_path).await?,
    }

    Ok(())
}
