mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use popoff_av::{FfmpegEngine, ToolRegistry};
use popoff_core::config::Config;
use popoff_core::events::{EventBus, IngestEvent};
use popoff_core::{PostDraft, SourceAsset};
use popoff_pipeline::{IngestionService, Outcome};

struct IngestArgs {
    source: PathBuf,
    thumbnail: PathBuf,
    description: String,
    tags: Vec<String>,
    duration_ms: Option<u64>,
    dimensions: Option<(u32, u32)>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "popoff=debug,popoff_pipeline=trace,popoff_av=debug,popoff_core=debug".to_string()
        } else {
            "popoff=info,popoff_pipeline=info,popoff_av=warn,popoff_core=warn".to_string()
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Ingest {
            source,
            thumbnail,
            description,
            tags,
            duration_ms,
            width,
            height,
        } => {
            let args = IngestArgs {
                source,
                thumbnail,
                description,
                tags,
                duration_ms,
                dimensions: width.zip(height),
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(ingest(args, cli.config.as_deref()))
        }
        Commands::Probe { file, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(&file, json, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("popoff {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn ingest(args: IngestArgs, config_path: Option<&Path>) -> Result<()> {
    let config = Config::load_or_default(config_path);
    for warning in config.validate() {
        tracing::warn!("config: {}", warning);
    }

    if !args.source.exists() {
        anyhow::bail!("Source file does not exist: {:?}", args.source);
    }

    let tools = ToolRegistry::discover(&config.tools);
    let source = describe_source(&args, &tools).await?;
    tracing::info!(
        duration_ms = source.duration_ms(),
        width = source.width,
        height = source.height,
        "Ingesting {}",
        source.path.display()
    );

    let engine = FfmpegEngine::from_registry(&tools)?
        .with_timeout(config.transcode.engine_timeout());
    let events = Arc::new(EventBus::default());
    let service = IngestionService::with_http(&config, Arc::new(engine), events.clone())?;

    let draft = PostDraft {
        description: args.description,
        tags: args.tags,
        thumbnail: args.thumbnail,
    };

    let mut rx = events.subscribe();
    let handle = service.start(source, draft)?;
    let job_id = handle.id();
    println!("Job {} started", job_id);

    let printer = tokio::spawn(async move {
        let mut last_percent = None;
        while let Ok(event) = rx.recv().await {
            if event.payload.job_id() != job_id {
                continue;
            }
            match &event.payload {
                IngestEvent::Progress { progress, step, .. } => {
                    let percent = (progress * 100.0).floor() as u32;
                    if last_percent != Some(percent) {
                        last_percent = Some(percent);
                        println!("[{:>3}%] {}", percent, step);
                    }
                }
                IngestEvent::StateChanged { to, .. } => {
                    tracing::debug!("state -> {}", to);
                }
                other if other.is_terminal() => break,
                _ => {}
            }
        }
    });

    let outcome = tokio::select! {
        outcome = handle.wait() => outcome?,
        _ = tokio::signal::ctrl_c() => {
            println!("Cancelling...");
            handle.cancel();
            handle.wait().await?
        }
    };
    // The printer ends on the terminal event; don't hang if it was lagged past it.
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;

    match outcome {
        Outcome::Completed(post) => {
            println!("\nPublished post {}", post);
            Ok(())
        }
        Outcome::Cancelled => {
            println!("\nCancelled");
            Ok(())
        }
        Outcome::Failed(reason) => {
            tracing::error!(reason = reason.kind(), "{}", reason);
            anyhow::bail!("{}", reason.user_message())
        }
    }
}

/// Build the source description from explicit arguments, probing for
/// whatever was not given.
async fn describe_source(args: &IngestArgs, tools: &ToolRegistry) -> Result<SourceAsset> {
    if let (Some(duration_ms), Some((width, height))) = (args.duration_ms, args.dimensions) {
        let file_size = tokio::fs::metadata(&args.source)
            .await
            .with_context(|| format!("Failed to read {:?}", args.source))?
            .len();
        return Ok(SourceAsset {
            path: args.source.clone(),
            duration: Duration::from_millis(duration_ms),
            width,
            height,
            file_size,
        });
    }

    let ffprobe = tools.require("ffprobe")?;
    let mut probed = popoff_av::probe::probe_source(ffprobe, &args.source).await?;
    if let Some(ms) = args.duration_ms {
        probed.duration = Duration::from_millis(ms);
    }
    if let Some((width, height)) = args.dimensions {
        probed.width = width;
        probed.height = height;
    }
    Ok(probed)
}

async fn probe_file(file: &Path, json: bool, config_path: Option<&Path>) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }
    let config = Config::load_or_default(config_path);
    let tools = ToolRegistry::discover(&config.tools);
    let ffprobe = tools.require("ffprobe")?;
    let source = popoff_av::probe::probe_source(ffprobe, file).await?;

    if json {
        let value = serde_json::json!({
            "path": source.path,
            "base_name": source.base_name(),
            "duration_ms": source.duration_ms(),
            "width": source.width,
            "height": source.height,
            "file_size": source.file_size,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("File: {}", source.path.display());
        println!("Base name: {}", source.base_name());
        println!("Size: {} bytes", source.file_size);
        println!("Duration: {:.3}s", source.duration.as_secs_f64());
        println!("Dimensions: {}x{}", source.width, source.height);
        let max = config.ingest.max_duration();
        if source.duration > max {
            println!("\nToo long to ingest (limit is {}s)", max.as_secs());
        }
    }
    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = Config::load_or_default(config_path);
    let tools = ToolRegistry::discover(&config.tools).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);
        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }
        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Ingestion needs both ffmpeg and ffprobe.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("Failed to read config file {:?}", p))?;
            Config::from_json(&contents)?
        }
        None => {
            println!("No config file specified; validating defaults");
            Config::default()
        }
    };

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("✓ Configuration is valid");
        println!("  API: {}", config.api.base_url);
        println!("  Scratch: {}", config.transcode.scratch_dir.display());
        println!("  Max duration: {}s", config.ingest.max_duration_secs);
        Ok(())
    } else {
        for w in &warnings {
            println!("✗ {}", w);
        }
        anyhow::bail!("Configuration has {} problem(s)", warnings.len())
    }
}
