#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command line toolchain for the bonus map.
//!
//! Loads target and bonus geographies and population centroids into
//! `PostGIS`, then builds target/bonus associations with population
//! estimates through the adaptive batch loader.
//!
//! Uses `indicatif-log-bridge` (via [`bonus_map_cli_utils::init_logger`])
//! to route `log` output through `indicatif::MultiProgress` so that log
//! lines and progress bars never fight for the terminal.

mod commands;
mod config;
mod input;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bonus_map_geography_models::GeographyKind;
use clap::{Parser, Subcommand};

use crate::commands::Context;
use crate::config::AppConfig;
use crate::input::GeographyFile;

#[derive(Parser)]
#[command(name = "bonus_map", about = "Geography association and population estimation")]
struct Cli {
    /// TOML file with `[loader]` and `[matcher]` sections
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Load a `GeoJSON` feature collection as geographies of one kind
    LoadGeographies {
        /// Geography kind (e.g. `county`, `justice40`)
        #[arg(long)]
        kind: GeographyKind,
        /// `GeoJSON` file
        #[arg(long)]
        file: PathBuf,
        /// Dataset label stored with every record
        #[arg(long)]
        dataset: Option<String>,
        /// Dataset vintage stored with every record
        #[arg(long)]
        vintage: Option<String>,
        /// Write to memory instead of the database
        #[arg(long)]
        dry_run: bool,
    },
    /// Load Census population-weighted block group centroids from CSV
    LoadCentroids {
        /// Centroid CSV file
        #[arg(long)]
        file: PathBuf,
        /// Write to memory instead of the database
        #[arg(long)]
        dry_run: bool,
    },
    /// Derive block group centroids from census blocks (island areas)
    DeriveCentroids {
        /// Census block CSV file
        #[arg(long)]
        blocks: PathBuf,
        /// Discard the cache and derive again
        #[arg(long)]
        rebuild: bool,
        /// Load the centroids into the database afterwards
        #[arg(long)]
        load: bool,
        /// With `--load`, write to memory instead of the database
        #[arg(long)]
        dry_run: bool,
    },
    /// Build associations for one target/bonus kind pair
    Associate {
        /// Target kind
        #[arg(long)]
        target: GeographyKind,
        /// Bonus kind
        #[arg(long)]
        bonus: GeographyKind,
        /// Write associations to memory instead of the database (matching
        /// still reads geographies and centroids from `PostGIS`)
        #[arg(long)]
        dry_run: bool,
    },
    /// Build associations for every registered pair
    AssociateAll {
        /// Write associations to memory instead of the database (matching
        /// still reads geographies and centroids from `PostGIS`)
        #[arg(long)]
        dry_run: bool,
    },
    /// Estimate target populations by areal interpolation from another kind
    Interpolate {
        /// Kind to estimate
        #[arg(long)]
        target: GeographyKind,
        /// Kind whose known populations are apportioned
        #[arg(long)]
        source: GeographyKind,
    },
    /// Print the registered target/bonus strategy table
    Pairs,
}

async fn run(cli: Cli, ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate().await,
        Commands::LoadGeographies {
            kind,
            file,
            dataset,
            vintage,
            dry_run,
        } => {
            let source = GeographyFile {
                kind,
                dataset: dataset.as_deref(),
                vintage: vintage.as_deref(),
            };
            commands::load_geographies(ctx, &source, &file, dry_run).await
        }
        Commands::LoadCentroids { file, dry_run } => {
            commands::load_centroids(ctx, &file, dry_run).await
        }
        Commands::DeriveCentroids {
            blocks,
            rebuild,
            load,
            dry_run,
        } => commands::derive_centroids(ctx, &blocks, rebuild, load, dry_run).await,
        Commands::Associate {
            target,
            bonus,
            dry_run,
        } => commands::associate(ctx, target, bonus, dry_run).await,
        Commands::AssociateAll { dry_run } => commands::associate_all(ctx, dry_run).await,
        Commands::Interpolate { target, source } => {
            commands::interpolate(ctx, target, source).await
        }
        Commands::Pairs => {
            commands::pairs();
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = bonus_map_cli_utils::init_logger();
    let mut cli = Cli::parse();

    let config = AppConfig::load(cli.config.take().as_deref())?;

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted; stopping after the current batch");
            flag.store(true, Ordering::Relaxed);
        }
    });

    let ctx = Context {
        config,
        multi,
        cancel,
    };

    if let Err(e) = run(cli, &ctx).await {
        log::error!("{e}");
        return Err(e);
    }

    Ok(())
}
