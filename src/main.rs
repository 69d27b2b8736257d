//! imgboot - boot provisioning for OS disk images.
//!
//! Mounts the partitions of an already partitioned image, installs and
//! configures the bootloader, and for immutable images builds a dm-verity
//! protected, Secure Boot signed Unified Kernel Image.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use imgboot::config::Config;

#[derive(Parser)]
#[command(name = "imgboot")]
#[command(about = "Boot provisioning and integrity pipeline for OS images")]
#[command(
    after_help = "QUICK START:\n  imgboot preflight  Check host tools and boot assets\n  imgboot assemble --install-root /mnt/image --template image.json \\\n      --partition boot=/dev/loop0p1 --partition rootfs=/dev/loop0p2"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct ImageArgs {
    /// Directory standing in for the image's root filesystem
    #[arg(long)]
    install_root: PathBuf,
    /// Image template (JSON)
    #[arg(long)]
    template: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount partitions, install packages, install boot, build and sign the UKI
    Assemble {
        #[command(flatten)]
        image: ImageArgs,
        /// Partition device, as ID=DEVICE (repeatable)
        #[arg(long = "partition", value_parser = commands::parse_partition, required = true)]
        partitions: Vec<(String, PathBuf)>,
        /// Host shell command installing packages (INSTALL_ROOT is set)
        #[arg(long)]
        install_cmd: Option<String>,
    },

    /// Install and configure the bootloader in a mounted install root
    Boot {
        #[command(flatten)]
        image: ImageArgs,
        /// Partition device, as ID=DEVICE (repeatable)
        #[arg(long = "partition", value_parser = commands::parse_partition, required = true)]
        partitions: Vec<(String, PathBuf)>,
    },

    /// Configure the overlay root of an immutable image
    Security {
        #[command(flatten)]
        image: ImageArgs,
    },

    /// Build the Unified Kernel Image (systemd-boot only)
    Uki {
        #[command(flatten)]
        image: ImageArgs,
    },

    /// Secure Boot sign the UKI and bootloader
    Sign {
        #[command(flatten)]
        image: ImageArgs,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },

    /// Run preflight checks (host tools and boot assets)
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show current configuration
    Config,
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_filter)
        .unwrap_or_else(|_| EnvFilter::new(imgboot::config::DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let base_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));

    // Load .env if present
    dotenvy::dotenv().ok();
    let config = Config::load(&base_dir);
    init_logging(&config);

    match cli.command {
        Commands::Assemble {
            image,
            partitions,
            install_cmd,
        } => {
            let devices = commands::partition_map(partitions)?;
            commands::cmd_assemble(
                &config,
                &image.install_root,
                &image.template,
                &devices,
                install_cmd.as_deref(),
            )?;
        }

        Commands::Boot { image, partitions } => {
            let devices = commands::partition_map(partitions)?;
            commands::cmd_boot(&config, &image.install_root, &image.template, &devices)?;
        }

        Commands::Security { image } => {
            commands::cmd_security(&image.install_root, &image.template)?;
        }

        Commands::Uki { image } => {
            commands::cmd_uki(&image.install_root, &image.template)?;
        }

        Commands::Sign { image } => {
            commands::cmd_sign(&config, &image.install_root, &image.template)?;
        }

        Commands::Show { what } => {
            let show_target = match what {
                ShowTarget::Config => commands::show::ShowTarget::Config,
            };
            commands::cmd_show(show_target, &config)?;
        }

        Commands::Preflight { strict } => {
            commands::cmd_preflight(&config, strict)?;
        }
    }

    Ok(())
}
