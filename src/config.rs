//! Configuration types for chan-sync

use serde::{Deserialize, Serialize};

/// Loader behavior configuration
///
/// Everything here has a sensible default; `LoaderConfig::default()` is a
/// working configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Number of drafts dispatched per parse batch (default: 16)
    #[serde(default = "default_posts_per_batch")]
    pub posts_per_batch: usize,

    /// Worker pool size for parallel post parsing.
    ///
    /// `None` sizes the pool to the host's available parallelism at
    /// construction time.
    #[serde(default)]
    pub parser_workers: Option<usize>,

    /// How many catalog OPs to read from the store when rebuilding a catalog
    /// without fresh server data, and the reload headroom on a normal pass
    /// (default: 150, ten pages of fifteen threads)
    #[serde(default = "default_catalog_fallback_posts")]
    pub catalog_fallback_posts: usize,

    /// Emit verbose per-stage logs (default: false)
    #[serde(default)]
    pub verbose_logs: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            posts_per_batch: default_posts_per_batch(),
            parser_workers: None,
            catalog_fallback_posts: default_catalog_fallback_posts(),
            verbose_logs: false,
        }
    }
}

fn default_posts_per_batch() -> usize {
    16
}

fn default_catalog_fallback_posts() -> usize {
    150
}
