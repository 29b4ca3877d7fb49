//! Cache Builder CLI
//!
//! Frame JSONL → persisted frame-store artifact, plus verify and inspect.

#[cfg(feature = "cli")]
use anyhow::Result;
#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "cache_builder")]
#[command(about = "Build and check frame-store artifacts for match replay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Build an artifact from a frame JSONL dump
    Build {
        /// Input frames, one JSON record per line
        #[arg(long)]
        frames: PathBuf,

        /// Match identifier the artifact is keyed by
        #[arg(long)]
        match_id: String,

        /// Output directory
        #[arg(long)]
        out: PathBuf,

        /// Tracking sample rate
        #[arg(long, default_value_t = 10.0)]
        sample_rate: f64,

        /// Verify the artifact after building
        #[arg(long, default_value = "false")]
        verify: bool,
    },

    /// Decode an artifact fully and check its metadata sidecar
    Verify {
        #[arg(long)]
        artifact: PathBuf,
    },

    /// Print the artifact header
    Inspect {
        #[arg(long)]
        artifact: PathBuf,
    },
}

#[cfg(feature = "cli")]
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build { frames, match_id, out, sample_rate, verify } => {
            println!("Building artifact...");
            println!("   Frames:   {}", frames.display());
            println!("   Match:    {}", match_id);
            println!("   Output:   {}", out.display());

            let meta = cache_builder::build_match_cache(&frames, &match_id, &out, sample_rate)?;
            print_metadata(&meta);

            if verify {
                let path = replay_core::store::artifact_path(&out, &match_id);
                verify_artifact(&path)?;
            }
        }

        Commands::Verify { artifact } => verify_artifact(&artifact)?,

        Commands::Inspect { artifact } => {
            let header = cache_builder::inspect(&artifact)?;
            println!("{}", artifact.display());
            println!("   Match:       {}", header.match_id);
            println!("   Version:     {}", header.version);
            println!("   Frames:      {}", header.frame_count);
            println!("   Sample rate: {} Hz", header.sample_rate_hz);
            println!("   Created:     {}", header.created_at_rfc3339());
        }
    }

    Ok(())
}

#[cfg(feature = "cli")]
fn print_metadata(meta: &cache_builder::CacheMetadata) {
    println!("\nArtifact built");
    println!("   Frames:          {}", meta.frame_count);
    println!(
        "   Original size:   {} bytes ({:.2} KB)",
        meta.original_size,
        meta.original_size as f64 / 1024.0
    );
    println!(
        "   Compressed size: {} bytes ({:.2} KB)",
        meta.compressed_size,
        meta.compressed_size as f64 / 1024.0
    );
    println!("   Compression:     {:.1}%", meta.compression_ratio * 100.0);
    println!("   Checksum:        {}", meta.checksum);
    println!("   Created:         {}", meta.created_at);
}

#[cfg(feature = "cli")]
fn verify_artifact(path: &std::path::Path) -> Result<()> {
    println!("\nVerifying {}...", path.display());
    let report = cache_builder::verify_cache(path)?;
    match report.sidecar_matches {
        Some(true) => println!("Artifact and sidecar agree ({} frames)", report.header.frame_count),
        Some(false) => anyhow::bail!("Artifact decodes but its metadata sidecar does not match"),
        None => println!("Artifact decodes ({} frames); no sidecar found", report.header.frame_count),
    }
    Ok(())
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("cache_builder CLI is not available. Enable the 'cli' feature to use it.");
    std::process::exit(1);
}
