use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use oml_sdk::{values, Client, ClientOptions, FieldType, MeasurementPoint};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "oml-signalgen")]
#[command(about = "A simple signal generator reporting sine and cosine samples into OML")]
#[command(version)]
struct Args {
    /// Number of samples to generate
    #[arg(short = 'n', long, default_value = "100")]
    samples: u32,

    /// Delay between samples in milliseconds
    #[arg(short, long, default_value = "500")]
    interval_ms: u64,

    /// Angle increment between samples, in degrees
    #[arg(long, default_value = "15")]
    increment: i32,

    /// Domain (experiment) the samples belong to
    #[arg(long)]
    oml_domain: Option<String>,

    /// Sender identity, defaults to <hostname>-<pid>
    #[arg(long)]
    oml_id: Option<String>,

    /// Collection URI, e.g. file:-, tcp:localhost:3003
    #[arg(long)]
    oml_collect: Option<String>,

    /// Validate measurements without sending them anywhere
    #[arg(long)]
    oml_noop: bool,

    /// Config file with domain, id and collect keys
    #[arg(long)]
    oml_config: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so that `file:-` output stays clean
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let client = Client::new();
    let sin = client.define(
        MeasurementPoint::builder("sin")
            .field("label", FieldType::String)
            .field("angle", FieldType::Int32)
            .field("value", FieldType::Double)
            .build(),
    )?;
    let cos = client.define(
        MeasurementPoint::builder("cos")
            .field("label", FieldType::String)
            .field("value", FieldType::Double)
            .build(),
    )?;

    let mut options = ClientOptions::new()
        .app_name("signalgen")
        .noop(args.oml_noop);
    options.domain = args.oml_domain;
    options.sender_id = args.oml_id;
    options.collect_uri = args.oml_collect;
    options.config_file = args.oml_config;

    client
        .init(options)
        .context("failed to start the measurement client")?;
    client.inject_experiment_metadata("samples", &args.samples.to_string());
    client.inject_metadata(&sin, "unit", "degree", Some("angle"))?;

    for i in 0..args.samples {
        let angle = args.increment.wrapping_mul(i as i32);
        let radians = f64::from(angle).to_radians();
        let label = format!("label_{}", angle);
        client.inject(&sin, &values![label.as_str(), angle, radians.sin()])?;
        client.inject(&cos, &values![label, radians.cos()])?;
        tracing::debug!(angle, "sample sent");

        if i + 1 < args.samples {
            std::thread::sleep(Duration::from_millis(args.interval_ms));
        }
    }

    client.stop();
    tracing::info!("generated {} samples", args.samples);
    Ok(())
}
