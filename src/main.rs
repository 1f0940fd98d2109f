//! Devwin - customized Windows installation media builder.
//!
//! Builds bootable install images with an answer file injected:
//! - Base image from a local path or the published manifest (cached, SHA-1 verified)
//! - Mounted, modified, and re-authored with both BIOS and UEFI boot entries
//! - Repacked boot catalog verified byte-for-byte against the source

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use devwin::config::Config;
use devwin::cleanup::ExitGuard;

use commands::Selectors;

#[derive(Parser)]
#[command(name = "devwin")]
#[command(about = "Customized Windows installation media builder")]
#[command(
    after_help = "QUICK START:\n  devwin preflight                                Check host tools\n  devwin build --answer-file autounattend.xml     Download and build\n  devwin catalog out/image.iso                    Inspect boot entries\n  devwin clean                                    Remove built images"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct SelectorArgs {
    /// Manifest language code (default: DEVWIN_LANGUAGE)
    #[arg(long)]
    language: Option<String>,
    /// Manifest edition (default: DEVWIN_EDITION)
    #[arg(long)]
    edition: Option<String>,
    /// Manifest architecture; amd64 is accepted for x64 (default: DEVWIN_ARCH)
    #[arg(long)]
    arch: Option<String>,
}

impl SelectorArgs {
    fn resolve(self, config: &Config) -> Selectors {
        Selectors::resolve(self.language, self.edition, self.arch, config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build a customized installation image
    Build {
        /// Local base image (.iso, .wim or .esd); downloaded when omitted
        #[arg(long)]
        iso: Option<PathBuf>,

        #[command(flatten)]
        selectors: SelectorArgs,

        /// Answer file written to the media root as autounattend.xml
        #[arg(long)]
        answer_file: PathBuf,

        /// Destination image (default: DEVWIN_OUTPUT_DIR/<name>.iso)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also write a small secondary image holding only the answer file
        #[arg(long)]
        answer_media: Option<PathBuf>,
    },

    /// Dump the El Torito boot catalog of an image
    Catalog {
        image: PathBuf,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Verify two images carry identical boot catalogs
    Verify { original: PathBuf, repacked: PathBuf },

    /// Resolve a base image into the cache and print its path
    Download {
        #[command(flatten)]
        selectors: SelectorArgs,
        /// Copy into a temp file the caller owns instead of printing the cache path
        #[arg(long)]
        temp: bool,
    },

    /// List manifest values
    List {
        #[command(subcommand)]
        what: ListTarget,
    },

    /// Clean built images (default) or the image cache
    Clean {
        #[command(subcommand)]
        what: Option<CleanTarget>,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },

    /// Run preflight checks (verify host tools before build)
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Subcommand)]
enum ListTarget {
    Languages,
    Editions,
    Architectures,
}

#[derive(Subcommand)]
enum CleanTarget {
    /// Clean the image cache
    Cache,
    /// Clean built images
    Output,
    /// Clean everything
    All,
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show current configuration
    Config,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("DEVWIN_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn run(cli: Cli, config: &Config) -> anyhow::Result<()> {
    match cli.command {
        Commands::Build {
            iso,
            selectors,
            answer_file,
            output,
            answer_media,
        } => commands::cmd_build(
            commands::build::BuildArgs {
                iso,
                selectors: selectors.resolve(config),
                answer_file,
                output,
                answer_media,
            },
            config,
        ),

        Commands::Catalog { image, json } => commands::cmd_catalog(&image, json),

        Commands::Verify { original, repacked } => commands::cmd_verify(&original, &repacked),

        Commands::Download { selectors, temp } => {
            commands::cmd_download(&selectors.resolve(config), temp, config)
        }

        Commands::List { what } => {
            let target = match what {
                ListTarget::Languages => commands::list::ListTarget::Languages,
                ListTarget::Editions => commands::list::ListTarget::Editions,
                ListTarget::Architectures => commands::list::ListTarget::Architectures,
            };
            commands::cmd_list(target, config)
        }

        Commands::Clean { what } => {
            let target = match what {
                None | Some(CleanTarget::Output) => commands::clean::CleanTarget::Output,
                Some(CleanTarget::Cache) => commands::clean::CleanTarget::Cache,
                Some(CleanTarget::All) => commands::clean::CleanTarget::All,
            };
            commands::cmd_clean(target, config)
        }

        Commands::Show { what } => {
            let target = match what {
                ShowTarget::Config => commands::show::ShowTarget::Config,
            };
            commands::cmd_show(target, config)
        }

        Commands::Preflight { strict } => commands::cmd_preflight(strict, config),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = Config::load();
    init_tracing();

    // Releases mounts and temp files still registered, on every exit path.
    let _guard = ExitGuard;

    match run(cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let reason = e
                .downcast_ref::<devwin::Error>()
                .map(devwin::Error::reason_code)
                .unwrap_or("error");
            error!(reason, "{e:#}");
            ExitCode::FAILURE
        }
    }
}
