//! Session options for export and import.

use std::num::NonZeroUsize;
use std::thread;

use camino::Utf8PathBuf;
use citydb_core::{Feature, LodFilter};
use serde::{Deserialize, Serialize};

/// Smallest worker pool a session starts.
pub const MIN_THREADS: usize = 2;

/// Worker count used when none is configured: the available parallelism,
/// but never fewer than [`MIN_THREADS`].
#[must_use]
pub fn default_threads() -> usize {
    thread::available_parallelism()
        .map_or(MIN_THREADS, NonZeroUsize::get)
        .max(MIN_THREADS)
}

/// Worker count and backlog of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Number of worker threads.
    pub threads: usize,
    /// Units of work queued ahead of the workers before submission blocks.
    pub backlog: usize,
}

impl PoolSettings {
    /// Settings for `threads` workers, defaulting as described in
    /// [`default_threads`], with a backlog of two units per worker.
    #[must_use]
    pub fn for_threads(threads: Option<usize>) -> Self {
        let threads = threads.filter(|count| *count > 0).unwrap_or_else(default_threads);
        Self {
            threads,
            backlog: threads.saturating_mul(2),
        }
    }

    /// Override the backlog.
    #[must_use]
    pub const fn with_backlog(mut self, backlog: usize) -> Self {
        self.backlog = backlog;
        self
    }
}

/// Which features pass the validity filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidityMode {
    /// Every feature.
    #[default]
    All,
    /// Features valid at the configured instant.
    Valid,
    /// Features not valid at the configured instant.
    Invalid,
}

/// Time-slice filter applied to nested features while exporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidityFilter {
    /// Filter mode.
    pub mode: ValidityMode,
    /// Instant as a Unix timestamp; `None` means "now", so only features
    /// without a termination date are valid.
    pub at: Option<i64>,
}

impl ValidityFilter {
    /// Whether `feature` passes.
    #[must_use]
    pub fn accepts(&self, feature: &Feature) -> bool {
        match self.mode {
            ValidityMode::All => true,
            ValidityMode::Valid => feature.is_valid_at(self.at),
            ValidityMode::Invalid => !feature.is_valid_at(self.at),
        }
    }
}

/// Where texture images are extracted to during export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalFileOptions {
    /// Directory receiving the `appearance` folder.
    pub output_dir: Utf8PathBuf,
    /// Number of numbered subfolders images are spread over; `0` writes
    /// every image directly into `appearance`.
    #[serde(default)]
    pub buckets: u32,
}

/// Export session options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// Worker threads; see [`default_threads`].
    pub threads: Option<usize>,
    /// SRID of exported envelopes; `None` keeps the database SRID.
    pub target_srid: Option<i32>,
    /// Level-of-detail policy.
    pub lod: LodFilter,
    /// Whether appearances are exported.
    pub export_appearances: bool,
    /// Texture image extraction, if enabled.
    pub external_files: Option<ExternalFileOptions>,
    /// Validity filter for nested features.
    pub validity: ValidityFilter,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            threads: None,
            target_srid: None,
            lod: LodFilter::default(),
            export_appearances: true,
            external_files: None,
            validity: ValidityFilter::default(),
        }
    }
}

impl ExportOptions {
    /// Set the worker count.
    #[must_use]
    pub const fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Set the target SRID.
    #[must_use]
    pub const fn with_target_srid(mut self, srid: i32) -> Self {
        self.target_srid = Some(srid);
        self
    }

    /// Set the LOD policy.
    #[must_use]
    pub fn with_lod(mut self, lod: LodFilter) -> Self {
        self.lod = lod;
        self
    }

    /// Enable or disable appearances.
    #[must_use]
    pub const fn with_appearances(mut self, enabled: bool) -> Self {
        self.export_appearances = enabled;
        self
    }

    /// Extract texture images below `output_dir`.
    #[must_use]
    pub fn with_external_files(mut self, output_dir: Utf8PathBuf, buckets: u32) -> Self {
        self.external_files = Some(ExternalFileOptions {
            output_dir,
            buckets,
        });
        self
    }

    /// Set the validity filter.
    #[must_use]
    pub const fn with_validity(mut self, validity: ValidityFilter) -> Self {
        self.validity = validity;
        self
    }

    pub(crate) fn pool_settings(&self) -> PoolSettings {
        PoolSettings::for_threads(self.threads)
    }
}

/// Import session options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// Worker threads; see [`default_threads`].
    pub threads: Option<usize>,
    /// Level-of-detail policy applied before writing.
    pub lod: LodFilter,
    /// Whether appearances are imported.
    pub import_appearances: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            threads: None,
            lod: LodFilter::default(),
            import_appearances: true,
        }
    }
}

impl ImportOptions {
    /// Set the worker count.
    #[must_use]
    pub const fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Set the LOD policy.
    #[must_use]
    pub fn with_lod(mut self, lod: LodFilter) -> Self {
        self.lod = lod;
        self
    }

    /// Enable or disable appearances.
    #[must_use]
    pub const fn with_appearances(mut self, enabled: bool) -> Self {
        self.import_appearances = enabled;
        self
    }

    pub(crate) fn pool_settings(&self) -> PoolSettings {
        PoolSettings::for_threads(self.threads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use citydb_core::FeatureType;
    use rstest::rstest;

    #[rstest]
    #[case(Some(3), 3, 6)]
    #[case(Some(1), 1, 2)]
    fn explicit_thread_counts_are_kept(
        #[case] threads: Option<usize>,
        #[case] expected: usize,
        #[case] backlog: usize,
    ) {
        let settings = PoolSettings::for_threads(threads);
        assert_eq!(settings.threads, expected);
        assert_eq!(settings.backlog, backlog);
    }

    #[rstest]
    #[case(None)]
    #[case(Some(0))]
    fn missing_thread_count_uses_at_least_two(#[case] threads: Option<usize>) {
        assert!(PoolSettings::for_threads(threads).threads >= MIN_THREADS);
    }

    #[rstest]
    #[case(ValidityMode::All, Some(10), true)]
    #[case(ValidityMode::Valid, Some(10), false)]
    #[case(ValidityMode::Invalid, Some(10), true)]
    #[case(ValidityMode::Valid, None, true)]
    #[case(ValidityMode::Invalid, None, false)]
    fn validity_filter_modes(
        #[case] mode: ValidityMode,
        #[case] terminated: Option<i64>,
        #[case] expected: bool,
    ) {
        let mut feature = Feature::new(FeatureType::new("bldg", "Building"));
        feature.termination_date = terminated;
        let filter = ValidityFilter { mode, at: Some(20) };
        assert_eq!(filter.accepts(&feature), expected);
    }

    #[rstest]
    fn options_deserialize_with_defaults() {
        let options: ExportOptions =
            serde_json::from_str(r#"{"target_srid": 4326}"#).expect("valid options");
        assert_eq!(options.target_srid, Some(4326));
        assert!(options.export_appearances);
        assert!(options.lod.is_noop());
    }
}
