//! Command-line interface for camhub.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};

use camhub_core::config::json_logging_requested;
use camhub_core::{CameraConfig, CameraSettings, Frame, TriggerMode, WhiteBalanceMode};
use camhub_devices::{CameraManager, HdrOptions, HdrOutput};

/// camhub - industrial camera orchestration.
#[derive(Parser, Debug)]
#[command(name = "camhub")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file (defaults to ./camhub.toml when present).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// List attached cameras.
    Discover {
        /// Restrict discovery to these families.
        #[arg(short, long)]
        family: Vec<String>,

        /// Include simulated families.
        #[arg(long)]
        mocks: bool,

        /// Report index, resolution and frame rate.
        #[arg(long)]
        details: bool,
    },
    /// Capture one frame from each camera.
    Capture {
        /// Camera identities (`Family:device`).
        #[arg(required = true)]
        cameras: Vec<String>,

        /// Output path; `{camera}` is replaced per camera.
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Capture an exposure bracket from each camera.
    Hdr {
        #[arg(required = true)]
        cameras: Vec<String>,

        #[arg(short, long, default_value_t = 3)]
        levels: u32,

        #[arg(short, long, default_value_t = 2.0)]
        multiplier: f64,

        /// Output pattern; supports `{camera}`, `{index}` and `{exposure}`.
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Apply settings to one camera.
    Configure {
        camera: String,

        #[arg(long)]
        exposure: Option<f64>,

        #[arg(long)]
        gain: Option<f64>,

        #[arg(long)]
        pixel_format: Option<String>,

        /// `continuous` or `trigger`.
        #[arg(long)]
        trigger_mode: Option<TriggerMode>,

        /// `off`, `once` or `continuous`.
        #[arg(long)]
        white_balance: Option<WhiteBalanceMode>,

        /// Load device settings from this file before applying the rest.
        #[arg(long)]
        import: Option<PathBuf>,

        /// Save the resulting device settings to this file.
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Show registry and manager state.
    Diagnostics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = CameraConfig::load(args.config.as_deref()).context("Failed to load config")?;
    let manager = CameraManager::with_builtin_registry(config)?;

    let result = run(&manager, args.command).await;
    manager.close_all().await;

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

fn init_logging(verbose: bool) {
    let default_directive = if verbose { "camhub=debug" } else { "camhub=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if json_logging_requested() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}

async fn run(manager: &CameraManager, command: Command) -> Result<Value> {
    match command {
        Command::Discover {
            family,
            mocks,
            details,
        } => {
            let names: Vec<&str> = family.iter().map(String::as_str).collect();
            let families = (!names.is_empty()).then_some(names.as_slice());
            let include_mocks = mocks || manager.config().include_mocks;
            if details {
                Ok(json!(manager.discover_detailed(families, include_mocks).await))
            } else {
                Ok(json!(manager.discover(families, include_mocks).await))
            }
        }
        Command::Capture { cameras, output } => {
            manager.open_many(&cameras).await;
            let results = manager.batch_capture(&cameras, output.as_deref()).await;
            Ok(results
                .into_iter()
                .map(|(camera, frame)| (camera, Value::from(frame.as_ref().map(frame_summary))))
                .collect::<serde_json::Map<String, Value>>()
                .into())
        }
        Command::Hdr {
            cameras,
            levels,
            multiplier,
            output,
        } => {
            let mut options = HdrOptions::new(levels, multiplier);
            if let Some(pattern) = output {
                options = options.with_save_pattern(pattern);
            }
            manager.open_many(&cameras).await;
            let results = manager.batch_capture_hdr(&cameras, &options).await;
            Ok(results
                .into_iter()
                .map(|(camera, output)| (camera, Value::from(output.as_ref().map(hdr_summary))))
                .collect::<serde_json::Map<String, Value>>()
                .into())
        }
        Command::Configure {
            camera,
            exposure,
            gain,
            pixel_format,
            trigger_mode,
            white_balance,
            import,
            export,
        } => {
            let session = manager.open(&camera).await?;
            if let Some(path) = import {
                session.import_config(&path).await?;
            }

            let settings = CameraSettings {
                exposure,
                gain,
                trigger_mode,
                pixel_format,
                white_balance,
                ..CameraSettings::default()
            };
            let applied = if settings.is_empty() {
                true
            } else {
                session.configure(&settings).await?
            };

            if let Some(path) = export {
                session.export_config(&path).await?;
            }

            Ok(json!({
                "camera": camera,
                "applied": applied,
                "exposure": session.exposure().await?,
                "gain": session.gain().await?,
                "pixel_format": session.pixel_format().await?,
            }))
        }
        Command::Diagnostics => Ok(json!(manager.diagnostics().await)),
    }
}

fn frame_summary(frame: &Frame) -> Value {
    json!({
        "width": frame.width,
        "height": frame.height,
        "channels": frame.channels(),
        "color_order": frame.color_order,
        "captured_at": frame.captured_at.to_rfc3339(),
    })
}

fn hdr_summary(output: &HdrOutput) -> Value {
    match output {
        HdrOutput::Images(levels) => json!(levels
            .iter()
            .map(|level| json!({
                "exposure": level.exposure,
                "frame": frame_summary(&level.frame),
            }))
            .collect::<Vec<_>>()),
        HdrOutput::Completed(complete) => json!({ "completed": complete }),
    }
}
