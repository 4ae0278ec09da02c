//! `holoscan`: turn photographs into meshes from the command line.
//!
//! # Commands
//!
//! - `holoscan generate <IMAGE>` - Reconstruct one image in the foreground
//! - `holoscan submit <FILE>...` - Upload images or meshes through the scan service
//! - `holoscan list` - List recorded scans, newest first
//! - `holoscan status <SCAN_ID>` - Show one scan
//!
//! Logging goes to stderr and honours `RUST_LOG` (default `info`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use mesh_scan::ScanImage;
use scan_jobs::ScanId;
use scan_service::{PipelineConfig, ScanService, ServiceConfig, try_generate_mesh};
use tracing_subscriber::EnvFilter;

/// Single-image 3D reconstruction
#[derive(Parser)]
#[command(name = "holoscan")]
#[command(about = "Reconstruct textured meshes from single photographs", long_about = None)]
#[command(version)]
struct Cli {
    /// Service configuration file (JSON); defaults plus HOLOSCAN_* variables otherwise
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconstruct one image and write its mesh
    Generate {
        /// Input image (PNG or JPEG)
        #[arg(name = "IMAGE")]
        image: PathBuf,

        /// Output directory
        #[arg(long, short, default_value = ".")]
        output: PathBuf,

        /// Scan id used in the file name; generated when omitted
        #[arg(long)]
        scan_id: Option<String>,

        /// Octree depth (resolution)
        #[arg(long)]
        depth: Option<u32>,

        /// Density quantile below which vertices are pruned
        #[arg(long)]
        quantile: Option<f64>,

        /// Use fast preview settings
        #[arg(long)]
        preview: bool,
    },

    /// Upload files through the scan service and wait for their meshes
    Submit {
        /// Images to reconstruct, or mesh files to register as-is
        #[arg(name = "FILE", required = true)]
        files: Vec<PathBuf>,

        /// Seconds to wait for each reconstruction
        #[arg(long, default_value_t = 600)]
        wait: u64,
    },

    /// List recorded scans, newest first
    List,

    /// Show one scan
    Status {
        /// Scan id
        #[arg(name = "SCAN_ID")]
        scan_id: String,
    },
}

const MESH_EXTENSIONS: &[&str] = &["ply", "obj", "stl", "glb", "gltf", "usdz", "fbx"];

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Generate {
            image,
            output,
            scan_id,
            depth,
            quantile,
            preview,
        } => {
            let mut pipeline = match &cli.config {
                Some(path) => ServiceConfig::load(path)?.pipeline,
                None if preview => PipelineConfig::preview(),
                None => PipelineConfig::default(),
            };
            if let Some(depth) = depth {
                pipeline = pipeline.with_octree_depth(depth);
            }
            if let Some(quantile) = quantile {
                pipeline = pipeline.with_density_quantile(quantile);
            }
            generate(&image, &output, scan_id, &pipeline)
        }
        Commands::Submit { files, wait } => {
            submit(&load_config(cli.config.as_deref())?, &files, wait)
        }
        Commands::List => list(&load_config(cli.config.as_deref())?),
        Commands::Status { scan_id } => status(&load_config(cli.config.as_deref())?, &scan_id),
    }
}

fn load_config(path: Option<&Path>) -> Result<ServiceConfig> {
    let config = match path {
        Some(path) => ServiceConfig::load(path),
        None => ServiceConfig::from_env(),
    };
    config.context("loading configuration")
}

fn generate(
    image: &Path,
    output: &Path,
    scan_id: Option<String>,
    pipeline: &PipelineConfig,
) -> Result<()> {
    let bytes = std::fs::read(image).with_context(|| format!("reading {}", image.display()))?;
    let decoded = ScanImage::decode(&bytes)?;
    let scan_id = match scan_id {
        Some(id) => ScanId::new(id)?,
        None => scan_jobs::ScanIdGenerator::new().next_id()?,
    };

    let artifact = try_generate_mesh(&decoded, output, &scan_id, pipeline)
        .with_context(|| format!("generating mesh for {}", image.display()))?;
    println!("{}", artifact.path.display());
    println!("  {}", artifact.summary);
    println!(
        "  pruned {} vertices below density {:.4}",
        artifact.pruned_vertices, artifact.density_threshold
    );
    Ok(())
}

fn submit(config: &ServiceConfig, files: &[PathBuf], wait_secs: u64) -> Result<()> {
    let service = ScanService::open(config.clone())?;
    let mut failed = 0usize;

    for file in files {
        let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
        let ext = file
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        if MESH_EXTENSIONS.contains(&ext.as_str()) {
            let upload = service.register_mesh(&bytes, &ext)?;
            match upload.summary {
                Some(summary) => println!("{} ready {} ({summary})", upload.scan_id, upload.mesh_file),
                None => println!("{} ready {}", upload.scan_id, upload.mesh_file),
            }
            continue;
        }

        let scan_id = match service.submit_image(&bytes) {
            Ok(id) => id,
            Err(e) => {
                eprintln!("{}: {e}", file.display());
                failed += 1;
                continue;
            }
        };
        let record = service.wait_for(&scan_id, Duration::from_secs(wait_secs))?;
        match service.mesh_path(&record) {
            Some(path) => println!("{scan_id} {} {}", record.mesh_status, path.display()),
            None => {
                println!("{scan_id} {}", record.mesh_status);
                if record.mesh_status.is_terminal() {
                    failed += 1;
                }
            }
        }
    }

    service.shutdown();
    if failed > 0 {
        bail!("{failed} of {} uploads failed", files.len());
    }
    Ok(())
}

fn list(config: &ServiceConfig) -> Result<()> {
    let service = ScanService::open(config.clone())?;
    for record in service.list()? {
        println!(
            "{}  {:<10}  {}  {}",
            record.scan_id,
            record.mesh_status.as_str(),
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            record.mesh_file.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn status(config: &ServiceConfig, scan_id: &str) -> Result<()> {
    let service = ScanService::open(config.clone())?;
    let scan_id = ScanId::new(scan_id)?;
    let Some(record) = service.status(&scan_id)? else {
        bail!("scan {scan_id} not found");
    };
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
