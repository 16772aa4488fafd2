//! Cache for derived centroids, keyed by block group identity.

use bonus_map_geography_models::{CensusBlock, PopulationCentroid};
use thiserror::Error;

use crate::derive::derive_centroids;

/// Errors raised by a [`CentroidCache`] or the block source feeding it.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Cache storage failed.
    #[error("Centroid cache error: {message}")]
    Backend {
        /// Description of what went wrong.
        message: String,
    },

    /// Census blocks could not be read.
    #[error("Census block source error: {message}")]
    Source {
        /// Description of what went wrong.
        message: String,
    },
}

/// Persistent storage for derived centroids.
pub trait CentroidCache {
    /// Every cached centroid. Empty when nothing has been stored.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Backend`] if the cache cannot be read.
    fn load(&self) -> Result<Vec<PopulationCentroid>, CacheError>;

    /// Stores centroids, replacing any with the same key.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Backend`] if the cache cannot be written.
    fn store(&mut self, centroids: &[PopulationCentroid]) -> Result<(), CacheError>;

    /// Removes every cached centroid.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Backend`] if the cache cannot be cleared.
    fn clear(&mut self) -> Result<(), CacheError>;
}

/// How [`load_or_derive`] produced its centroids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Read from the cache.
    Loaded,
    /// Derived from census blocks and written to the cache.
    Derived,
}

/// Returns cached centroids, deriving and storing them first if the cache
/// is empty or `rebuild` is set.
///
/// `blocks` is only invoked when a derivation is needed.
///
/// # Errors
///
/// Returns [`CacheError`] if the cache or the block source fails.
pub fn load_or_derive<C, F>(
    cache: &mut C,
    blocks: F,
    rebuild: bool,
) -> Result<(Vec<PopulationCentroid>, CacheOutcome), CacheError>
where
    C: CentroidCache + ?Sized,
    F: FnOnce() -> Result<Vec<CensusBlock>, CacheError>,
{
    if rebuild {
        log::info!("Rebuilding derived centroid cache");
        cache.clear()?;
    } else {
        let cached = cache.load()?;
        if !cached.is_empty() {
            log::info!("Loaded {} derived centroids from cache", cached.len());
            return Ok((cached, CacheOutcome::Loaded));
        }
    }

    let blocks = blocks()?;
    log::info!("Deriving centroids from {} census blocks", blocks.len());
    let centroids = derive_centroids(blocks);
    cache.store(&centroids)?;

    Ok((centroids, CacheOutcome::Derived))
}
