//! Tier option templates

use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::info;

use tabletdb_common::config::{StorageConfig, TierConfig, TierMode};
use tabletdb_common::types::{CompressType, StorageMode};

/// Process-wide templates, built by the first table to initialize
static TEMPLATES: OnceCell<Arc<TierTemplates>> = OnceCell::new();

/// Store options shared by every table of one storage tier
#[derive(Debug, Clone)]
pub struct TierOptions {
    config: TierConfig,
}

impl TierOptions {
    pub fn new(config: TierConfig) -> Self {
        Self { config }
    }

    /// Store configuration for a table directory on this tier
    pub fn store_config(&self, path: &Path, compress_type: CompressType) -> sled::Config {
        let mode = match self.config.mode {
            TierMode::HighThroughput => sled::Mode::HighThroughput,
            TierMode::LowSpace => sled::Mode::LowSpace,
        };

        sled::Config::new()
            .path(path)
            .create_new(true)
            .cache_capacity(self.config.cache_capacity)
            .flush_every_ms(self.config.flush_every_ms)
            .segment_size(self.config.segment_size)
            .mode(mode)
            .use_compression(compress_type != CompressType::NoCompress)
    }

    /// Column families compacted in parallel
    pub fn compaction_threads(&self) -> usize {
        self.config.compaction_threads.max(1)
    }

    /// Physical entries fetched per traversal read
    pub fn readahead_entries(&self) -> usize {
        self.config.readahead_entries.max(1)
    }
}

/// SSD and HDD templates
#[derive(Debug)]
pub struct TierTemplates {
    ssd: TierOptions,
    hdd: TierOptions,
}

impl TierTemplates {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            ssd: TierOptions::new(config.ssd.clone()),
            hdd: TierOptions::new(config.hdd.clone()),
        }
    }

    /// Shared templates for this process.
    ///
    /// The first caller's configuration wins; later calls return the same
    /// instance regardless of their argument.
    pub fn global(config: &StorageConfig) -> Arc<TierTemplates> {
        TEMPLATES
            .get_or_init(|| {
                info!(
                    ssd_compaction_threads = config.ssd.compaction_threads,
                    hdd_compaction_threads = config.hdd.compaction_threads,
                    "Building storage tier option templates"
                );
                Arc::new(Self::new(config))
            })
            .clone()
    }

    pub fn for_mode(&self, mode: StorageMode) -> &TierOptions {
        match mode {
            StorageMode::Ssd => &self.ssd,
            StorageMode::Hdd => &self.hdd,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_templates_built_once() {
        let first = TierTemplates::global(&StorageConfig::default());

        let mut other = StorageConfig::default();
        other.ssd.compaction_threads = 99;
        let second = TierTemplates::global(&other);

        assert!(Arc::ptr_eq(&first, &second));
        assert_ne!(second.for_mode(StorageMode::Ssd).compaction_threads(), 99);
    }

    #[test]
    fn test_for_mode_selects_tier() {
        let templates = TierTemplates::new(&StorageConfig::default());
        assert_eq!(templates.for_mode(StorageMode::Ssd).compaction_threads(), 4);
        assert_eq!(templates.for_mode(StorageMode::Hdd).compaction_threads(), 1);
        assert!(
            templates.for_mode(StorageMode::Ssd).readahead_entries()
                < templates.for_mode(StorageMode::Hdd).readahead_entries()
        );
    }

    #[test]
    fn test_zero_knobs_are_clamped() {
        let mut config = TierConfig::ssd();
        config.compaction_threads = 0;
        config.readahead_entries = 0;
        let options = TierOptions::new(config);
        assert_eq!(options.compaction_threads(), 1);
        assert_eq!(options.readahead_entries(), 1);
    }
}
