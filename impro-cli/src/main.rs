mod cli;
mod source;

use std::process;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use impro::{EngineRegistry, ImproConfig, Pipeline};
use mimalloc::MiMalloc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::Args;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const DEFAULT_LOG_DIRECTIVES: &str = "impro=info,pipeline_common=info";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("{e:#}");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("impro=debug,pipeline_common=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVES))
    };

    // Stdout carries the image, so logs go to stderr.
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(verbose).with_writer(std::io::stderr))
        .init();
}

fn load_config(args: &Args) -> Result<ImproConfig> {
    let mut config = match &args.config {
        Some(path) => ImproConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ImproConfig::default(),
    };
    config.apply_overrides(|key| std::env::var(key).ok())?;
    if let Some(max) = args.max_output_pixels {
        config.max_output_pixels = Some(max);
    }
    Ok(config)
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    let registry = Arc::new(EngineRegistry::with_defaults(&config)?);

    if args.list_engines {
        let descriptors: Vec<_> = registry.descriptors().collect();
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
        return Ok(());
    }

    let input: Box<dyn AsyncRead + Unpin + Send> = match &args.input {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };
    let mut reader = BufReader::new(input);

    let source_type = match (&args.source_type, args.explain) {
        (Some(explicit), _) => source::detect(Some(explicit.as_str()), None, &[]),
        // Nothing is read when only explaining, so the content cannot be sniffed.
        (None, true) => source::detect(None, args.input.as_deref(), &[]),
        (None, false) => {
            let head = reader.fill_buf().await.context("failed to read input")?;
            source::detect(None, args.input.as_deref(), head)
        }
    };
    debug!(?source_type, "Detected source type");

    let mut options = config.pipeline_options();
    options.source_type = source_type;
    options.disabled.extend(args.disabled.iter().cloned());
    if let Some(raw) = &args.source_metadata {
        let metadata: serde_json::Value =
            serde_json::from_str(raw).context("--source-metadata is not valid JSON")?;
        let serde_json::Value::Object(metadata) = metadata else {
            bail!("--source-metadata must be a JSON object");
        };
        options.source_metadata = Some(metadata);
    }

    let mut pipeline = Pipeline::new(registry, options);
    let leftover = pipeline.add_query(&args.query)?;
    if !leftover.is_empty() {
        bail!("unknown operations in query: {leftover}");
    }

    if args.explain {
        let used = pipeline.flush()?.to_vec();
        let explanation = serde_json::json!({
            "usedEngines": used,
            "contentType": pipeline.target_content_type(),
        });
        println!("{}", serde_json::to_string_pretty(&explanation)?);
        return Ok(());
    }

    let running = pipeline.spawn()?;
    let engines: Vec<&str> = running.used_engines().iter().map(|u| u.name.as_str()).collect();
    info!(?engines, content_type = ?running.content_type(), "Processing");

    let writer: Box<dyn AsyncWrite + Unpin + Send> = match &args.output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };
    let written = running.process(reader, writer).await?;
    info!(bytes = written, "Done");
    Ok(())
}
