//! Build command - produces customized installation media.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use devwin::config::Config;
use devwin::pipeline::{BuildSettings, Pipeline, SourceImage};
use devwin::platform;

use super::{open_cache, Selectors};

/// Arguments of the build command.
pub struct BuildArgs {
    /// Local base image; downloaded through the cache when absent.
    pub iso: Option<PathBuf>,
    pub selectors: Selectors,
    pub answer_file: PathBuf,
    pub output: Option<PathBuf>,
    /// Also write a secondary image holding only the answer file.
    pub answer_media: Option<PathBuf>,
}

/// Default destination for a build.
fn default_output(args: &BuildArgs, config: &Config) -> PathBuf {
    let name = match &args.iso {
        Some(iso) => format!(
            "{}-devwin.iso",
            iso.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "image".to_string())
        ),
        None => format!(
            "devwin-{}-{}-{}.iso",
            args.selectors.language, args.selectors.edition, args.selectors.architecture
        ),
    };
    config.output_dir.join(name)
}

/// Execute the build command.
pub fn cmd_build(args: BuildArgs, config: &Config) -> Result<()> {
    let answer = read_answer_file(&args.answer_file)?;
    let destination = args.output.clone().unwrap_or_else(|| default_output(&args, config));

    let pipeline = Pipeline::new(
        platform::host(config),
        BuildSettings {
            volume_label: config.volume_label.clone(),
            max_parallelism: config.max_parallelism,
            temp_parent: std::env::temp_dir(),
        },
    );

    let report = match &args.iso {
        Some(iso) => pipeline.build(iso, &answer, &destination)?,
        None => {
            let cache = open_cache(config)?;
            let source = SourceImage::Download {
                language: args.selectors.language.clone(),
                edition: args.selectors.edition.clone(),
                architecture: args.selectors.architecture.clone(),
            };
            pipeline.build_from(&cache, &source, &answer, &destination)?
        }
    };

    println!("\n=== Build Complete ===");
    println!("  Image:   {}", report.destination.display());
    println!("  Source:  {}", report.kind);
    match &report.original {
        Some(_) => println!(
            "  Catalog: {} boot entries verified against source",
            report.repacked.entries.len()
        ),
        None => println!("  Catalog: {} boot entries", report.repacked.entries.len()),
    }

    if let Some(media) = &args.answer_media {
        pipeline.build_answer_media(&answer, media)?;
        println!("  Answer media: {}", media.display());
    }
    Ok(())
}

fn read_answer_file(path: &Path) -> Result<Vec<u8>> {
    let answer = fs::read(path)
        .with_context(|| format!("Failed to read answer file {}", path.display()))?;
    if answer.is_empty() {
        anyhow::bail!("Answer file {} is empty", path.display());
    }
    Ok(answer)
}
