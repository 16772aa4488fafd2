//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use bonus_map_association::{AssociationMatcher, STRATEGY_TABLE, pairs_for_target};
use bonus_map_association_models::TargetBonusAssociation;
use bonus_map_cli_utils::{IndicatifLoadProgress, MultiProgress};
use bonus_map_database::{DuckDbCentroidCache, PgCentroidStore, PgGeographyStore, PgRecordSink};
use bonus_map_geography_models::{GeographyKind, PopulationCentroid};
use bonus_map_loader::{AdaptiveBatchLoader, LoadSummary, LoaderError, MemorySink, Record};
use bonus_map_population::cache::{CacheError, CacheOutcome, load_or_derive};
use bonus_map_population::interpolate_between_kinds;
use switchy_database::Database;

use crate::config::AppConfig;
use crate::input::{self, GeographyFile};

type BoxError = Box<dyn std::error::Error>;

/// State shared by every subcommand.
pub struct Context {
    /// Parsed configuration.
    pub config: AppConfig,
    /// Progress bar container wired to the logger.
    pub multi: MultiProgress,
    /// Set on Ctrl-C; loaders stop between batches.
    pub cancel: Arc<AtomicBool>,
}

impl Context {
    async fn load_records<R: Record + 'static>(
        &self,
        label: &str,
        records: Vec<R>,
        dry_run: bool,
    ) -> Result<LoadSummary, LoaderError> {
        let loader = AdaptiveBatchLoader::new(self.config.loader.clone())
            .with_progress(IndicatifLoadProgress::spinner(&self.multi, label))
            .with_cancel(Arc::clone(&self.cancel));
        let stream = futures::stream::iter(records);

        if dry_run {
            let mut sink = MemorySink::<R>::new();
            loader.load(stream, &mut sink).await
        } else {
            let mut sink = PgRecordSink::<R>::from_env(self.config.loader.batch_timeout());
            loader.load(stream, &mut sink).await
        }
    }

    async fn matcher(&self) -> Result<AssociationMatcher, BoxError> {
        let db: Arc<dyn Database> = Arc::from(bonus_map_database::db::connect_from_env().await?);
        Ok(AssociationMatcher::new(
            Arc::new(PgGeographyStore::new(Arc::clone(&db))),
            Arc::new(PgCentroidStore::new(db)),
            self.config.matcher.clone(),
        )?)
    }
}

/// Applies pending migrations.
///
/// # Errors
///
/// Returns an error if the connection or a migration fails.
pub async fn migrate() -> Result<(), BoxError> {
    let db = bonus_map_database::db::connect_from_env().await?;
    bonus_map_database::run_migrations(db.as_ref()).await?;
    Ok(())
}

/// Loads a `GeoJSON` geography file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the load fails.
pub async fn load_geographies(
    ctx: &Context,
    file: &GeographyFile<'_>,
    path: &Path,
    dry_run: bool,
) -> Result<(), BoxError> {
    let geographies = input::read_geographies(path, file)?;
    log::info!(
        "Read {} {} geographies from {}",
        geographies.len(),
        file.kind,
        path.display()
    );

    let label = format!("{} geographies", file.kind);
    let summary = ctx.load_records(&label, geographies, dry_run).await?;
    log::info!(
        "{label}: {} submitted, {} inserted",
        summary.total_submitted,
        summary.rows_affected
    );
    Ok(())
}

/// Loads published population-weighted centroids.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the load fails.
pub async fn load_centroids(ctx: &Context, path: &Path, dry_run: bool) -> Result<(), BoxError> {
    let centroids = input::read_centroids(path)?;
    log::info!("Read {} centroids from {}", centroids.len(), path.display());
    load_centroid_records(ctx, centroids, dry_run).await
}

async fn load_centroid_records(
    ctx: &Context,
    centroids: Vec<PopulationCentroid>,
    dry_run: bool,
) -> Result<(), BoxError> {
    let summary = ctx.load_records("centroids", centroids, dry_run).await?;
    log::info!(
        "centroids: {} submitted, {} inserted",
        summary.total_submitted,
        summary.rows_affected
    );
    Ok(())
}

/// Derives centroids from census blocks through the local cache and
/// optionally loads them.
///
/// # Errors
///
/// Returns an error if the cache, the block file, or the load fails.
pub async fn derive_centroids(
    ctx: &Context,
    blocks: &Path,
    rebuild: bool,
    load: bool,
    dry_run: bool,
) -> Result<(), BoxError> {
    let mut cache = DuckDbCentroidCache::open_default()?;
    let (centroids, outcome) = load_or_derive(
        &mut cache,
        || {
            input::read_blocks(blocks).map_err(|e| CacheError::Source {
                message: e.to_string(),
            })
        },
        rebuild,
    )?;

    match outcome {
        CacheOutcome::Loaded => log::info!("Loaded {} cached centroids", centroids.len()),
        CacheOutcome::Derived => log::info!(
            "Derived {} centroids from {}",
            centroids.len(),
            blocks.display()
        ),
    }

    if load {
        load_centroid_records(ctx, centroids, dry_run).await?;
    }
    Ok(())
}

/// Matches one kind pair and loads the associations.
async fn associate_pair(
    ctx: &Context,
    matcher: &AssociationMatcher,
    target: GeographyKind,
    bonus: GeographyKind,
    dry_run: bool,
) -> Result<LoadSummary, BoxError> {
    let matches = matcher.find_bonus_matches(target, bonus).await?;
    let strategy = matches.strategy;
    let found = matches.len();
    let (skipped_geometry, skipped_estimation) =
        (matches.skipped_geometry, matches.skipped_estimation);

    let label = format!("{target} x {bonus}");
    let records: Vec<TargetBonusAssociation> = matches.into_iter().collect();
    let summary = ctx.load_records(&label, records, dry_run).await?;

    log::info!(
        "{label} ({strategy}): {found} matches, {} submitted, {} new, \
         {skipped_geometry} skipped for geometry, {skipped_estimation} without population",
        summary.total_submitted,
        summary.rows_affected,
    );
    Ok(summary)
}

/// Builds associations for one kind pair.
///
/// # Errors
///
/// Returns an error if the pair is unregistered, a query fails, or the
/// load fails.
pub async fn associate(
    ctx: &Context,
    target: GeographyKind,
    bonus: GeographyKind,
    dry_run: bool,
) -> Result<(), BoxError> {
    let matcher = ctx.matcher().await?;
    associate_pair(ctx, &matcher, target, bonus, dry_run).await?;
    Ok(())
}

/// Builds associations for every registered pair, one shard per target
/// kind. Each shard owns its connection and its sinks.
///
/// # Errors
///
/// Returns the first shard error.
pub async fn associate_all(ctx: &Context, dry_run: bool) -> Result<(), BoxError> {
    let shards = GeographyKind::TARGETS.iter().map(|&target| async move {
        let matcher = ctx.matcher().await?;
        let mut submitted = 0u64;
        for (bonus, _) in pairs_for_target(target) {
            submitted += associate_pair(ctx, &matcher, target, bonus, dry_run)
                .await?
                .total_submitted;
        }
        Ok::<_, BoxError>((target, submitted))
    });

    let totals = futures::future::try_join_all(shards).await?;
    for (target, submitted) in totals {
        log::info!("{target}: {submitted} associations submitted");
    }
    Ok(())
}

/// Prints areal-interpolation population estimates for every `target`
/// geography from the known populations of `source` geographies.
///
/// # Errors
///
/// Returns an error if the connection or a lookup fails.
pub async fn interpolate(
    ctx: &Context,
    target: GeographyKind,
    source: GeographyKind,
) -> Result<(), BoxError> {
    let db: Arc<dyn Database> = Arc::from(bonus_map_database::db::connect_from_env().await?);
    let store = PgGeographyStore::new(db);
    let estimates =
        interpolate_between_kinds(&store, target, source, ctx.config.matcher.working_srid).await?;

    println!("{:<24} population", target.as_ref());
    let mut missing = 0usize;
    for (id, estimate) in &estimates {
        if let Some(population) = estimate {
            println!("{id:<24} {population:.0}");
        } else {
            missing += 1;
            println!("{id:<24} -");
        }
    }

    log::info!(
        "{target} from {source}: {} estimated, {missing} overlap no {source} with a population",
        estimates.len() - missing
    );
    Ok(())
}

/// Prints the registered strategy table.
pub fn pairs() {
    println!("{:<20} {:<12} {:<16} population", "target", "bonus", "strategy");
    for (target, bonus, strategy) in STRATEGY_TABLE {
        println!(
            "{:<20} {:<12} {:<16} {}",
            target.as_ref(),
            bonus.as_ref(),
            strategy.as_ref(),
            strategy.population_strategy().as_ref()
        );
    }
}
