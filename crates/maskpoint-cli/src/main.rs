//! Headless maskpoint client.
//!
//! Drives the full engine pass against a running segmentation server:
//! connect, upload an image, add prompt points, predict, and write the
//! composited overlay to disk. Also exposes the small server-management
//! calls (health, model list, model select).

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use maskpoint_core::{EngineConfig, ImageSelection, PromptLabel, PromptPoint, SegmentEngine};
use maskpoint_remote_client::{RemoteClient, RemoteClientConfig};

#[derive(Parser)]
#[command(name = "maskpoint")]
#[command(about = "Point-prompted remote segmentation client")]
struct Cli {
    /// Segmentation server base URL
    #[arg(long, global = true, default_value = maskpoint_core::config::DEFAULT_SERVER_URL)]
    server: String,

    /// Per-request timeout in milliseconds
    #[arg(long, global = true, default_value_t = maskpoint_remote_client::DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print server health (model, device, live session count)
    Health,
    /// List available models and which one is loaded
    Models,
    /// Switch the server's active model (invalidates all sessions)
    SelectModel {
        model_key: String,
    },
    /// One-shot segmentation: upload an image, prompt it, save the overlay
    Segment(SegmentArgs),
}

#[derive(Args)]
struct SegmentArgs {
    /// Input image (png or jpeg)
    #[arg(long)]
    image: PathBuf,

    /// Prompt point "X,Y", "X,Y,fg" or "X,Y,bg"; repeatable, order preserved
    #[arg(long = "point")]
    points: Vec<String>,

    /// Rectangular prompt "x0,y0,x1,y1" in image pixels
    #[arg(long = "box")]
    box_prompt: Option<String>,

    /// Ask the server for multiple mask hypotheses
    #[arg(long)]
    multimask: bool,

    /// Brightness retained outside the mask (0..1)
    #[arg(long, default_value_t = 0.35)]
    dim: f32,

    /// Load this model before segmenting
    #[arg(long)]
    model: Option<String>,

    /// Output overlay PNG
    #[arg(long, default_value = "overlay.png")]
    out: PathBuf,

    /// Also write the raw 0/255 mask PNG
    #[arg(long)]
    mask_out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = RemoteClient::new(RemoteClientConfig {
        base_url: cli.server.clone(),
        timeout_ms: cli.timeout_ms,
    })
    .context("invalid server address")?;

    match cli.command {
        Commands::Health => {
            let health = client.health().await.context("health check failed")?;
            println!(
                "ok={} model={} device={} sessions={}",
                health.ok, health.model.model_key, health.model.device, health.sessions
            );
        }
        Commands::Models => {
            let models = client.list_models().await.context("model list failed")?;
            for entry in &models.available {
                let marker = if entry.model_key == models.current.model_key {
                    "*"
                } else {
                    " "
                };
                let status = if entry.downloaded {
                    format!("{:.1} MB", entry.checkpoint_size_bytes as f64 / 1_048_576.0)
                } else {
                    "missing".to_string()
                };
                println!("{marker} {:32} {status}", entry.model_key);
            }
        }
        Commands::SelectModel { model_key } => {
            let response = client
                .select_model(&model_key)
                .await
                .context("model select failed")?;
            println!(
                "ok={} model={} device={}",
                response.ok, response.model.model_key, response.model.device
            );
        }
        Commands::Segment(args) => {
            let config = EngineConfig {
                base_url: cli.server,
                timeout_ms: cli.timeout_ms,
                multimask: args.multimask,
                dim_factor: args.dim,
                ..Default::default()
            };
            run_segment(SegmentEngine::new(client, config), args).await?;
        }
    }
    Ok(())
}

async fn run_segment(
    mut engine: SegmentEngine<RemoteClient>,
    args: SegmentArgs,
) -> Result<()> {
    let points = args
        .points
        .iter()
        .map(|raw| parse_point(raw))
        .collect::<Result<Vec<_>>>()?;
    let box_prompt = args.box_prompt.as_deref().map(parse_box).transpose()?;
    if points.is_empty() && box_prompt.is_none() {
        bail!("at least one --point or a --box is required");
    }

    let bytes = std::fs::read(&args.image)
        .with_context(|| format!("reading {}", args.image.display()))?;
    let decoded = image::load_from_memory(&bytes)
        .with_context(|| format!("decoding {}", args.image.display()))?;
    let (width, height) = (decoded.width(), decoded.height());
    let file_name = args
        .image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image.png".to_string());

    let health = engine.connect().await.context("server unreachable")?;
    println!(
        "connected: model={} device={}",
        health.model.model_key, health.model.device
    );
    if let Some(model) = &args.model {
        engine.switch_model(model).await.context("model switch failed")?;
        println!("model switched to {model}");
    }

    engine
        .select_image(ImageSelection::new(bytes, file_name, width, height))
        .await
        .context("image upload failed")?;
    if let maskpoint_core::EmbeddingState::Ready { elapsed_ms, .. } = engine.state().embedding {
        println!("embedding ready in {elapsed_ms:.0} ms ({width}x{height})");
    }

    if !points.is_empty() {
        engine.add_points(points).await.context("predict failed")?;
    }
    if let Some(corners) = box_prompt {
        engine.set_box(corners).await.context("predict failed")?;
    }

    let (score, mask_area, elapsed_ms, mask) = {
        let prediction = engine
            .state()
            .prediction
            .as_ref()
            .context("server returned no prediction")?;
        (
            prediction.score,
            prediction.mask_area,
            prediction.elapsed_ms,
            prediction.mask.clone(),
        )
    };
    println!("mask: score={score:.4} area={mask_area}px elapsed={elapsed_ms:.0} ms");

    let base = decoded.to_rgba8();
    let overlay = engine
        .render(width, height, &base)
        .context("composite failed")?;
    overlay
        .save(&args.out)
        .with_context(|| format!("writing {}", args.out.display()))?;
    println!("overlay written to {}", args.out.display());

    if let Some(mask_out) = &args.mask_out {
        mask.save(mask_out)
            .with_context(|| format!("writing {}", mask_out.display()))?;
        println!("mask written to {}", mask_out.display());
    }

    engine.disconnect().await;
    Ok(())
}

/// Parses "X,Y", "X,Y,fg" or "X,Y,bg" into a prompt point (fg by default).
fn parse_point(raw: &str) -> Result<PromptPoint> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    let (x, y, label) = match parts.as_slice() {
        [x, y] => (x, y, PromptLabel::Foreground),
        [x, y, tag] => {
            let label = match tag.to_ascii_lowercase().as_str() {
                "fg" | "1" => PromptLabel::Foreground,
                "bg" | "0" => PromptLabel::Background,
                other => bail!("unknown point label '{other}' (expected fg/bg)"),
            };
            (x, y, label)
        }
        _ => bail!("expected X,Y[,fg|bg], got '{raw}'"),
    };
    Ok(PromptPoint {
        x: x.parse().with_context(|| format!("bad x in '{raw}'"))?,
        y: y.parse().with_context(|| format!("bad y in '{raw}'"))?,
        label,
    })
}

/// Parses "x0,y0,x1,y1" into box corners.
fn parse_box(raw: &str) -> Result<[f64; 4]> {
    let values = raw
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .with_context(|| format!("bad box coordinate in '{raw}'"))
        })
        .collect::<Result<Vec<f64>>>()?;
    match values.as_slice() {
        [x0, y0, x1, y1] => Ok([*x0, *y0, *x1, *y1]),
        _ => bail!("expected x0,y0,x1,y1, got '{raw}'"),
    }
}
