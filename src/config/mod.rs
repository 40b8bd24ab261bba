use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use utoipa::ToSchema;

pub const MIB: u64 = 1024 * 1024;

/// Smallest part size accepted for split downloads, in MiB
pub const MIN_PART_SIZE_MB: u64 = 5;

/// Largest part size accepted for split downloads, in MiB
pub const MAX_PART_SIZE_MB: u64 = 500;

/// Order in which staged documents are concatenated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum MergeOrder {
    /// Keep the order files were uploaded in
    #[default]
    Upload,
    /// Sort by display name, case-insensitive
    Name,
}

impl FromStr for MergeOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "upload" => Ok(Self::Upload),
            "name" | "name-ascending" => Ok(Self::Name),
            other => Err(format!("unknown merge order '{}'", other)),
        }
    }
}

/// How a sequence of staged documents is reduced to one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ReduceStrategy {
    /// merge(merge(merge(f1, f2), f3), f4) ...
    #[default]
    LeftFold,
    /// merge(merge(f1, f2), merge(f3, f4)) for exactly four inputs, left fold otherwise
    Balanced,
}

impl FromStr for ReduceStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "left-fold" | "left" | "fold" => Ok(Self::LeftFold),
            "balanced" => Ok(Self::Balanced),
            other => Err(format!("unknown reduce strategy '{}'", other)),
        }
    }
}

/// When the merged output is offered as raw parts instead of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum SplitMode {
    /// Split only outputs larger than the configured threshold
    #[default]
    Auto,
    Always,
    Never,
}

impl FromStr for SplitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            other => Err(format!("unknown split mode '{}'", other)),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Root directory holding one work directory per session
    pub staging_dir: PathBuf,

    /// Block size for staging uploads and hashing parts (default: 8 MiB)
    pub stage_block_size: usize,

    /// Default part size in MiB (default: 150, clamped to 5..=500)
    pub part_size_mb: u64,

    /// Outputs larger than this many MiB are split in auto mode (default: 200)
    pub split_threshold_mb: u64,

    pub merge_order: MergeOrder,

    pub reduce_strategy: ReduceStrategy,

    /// Skip opening uploads to count pages (default: false)
    pub skip_page_count: bool,

    /// Upload the final result to the remote store by default (default: false)
    pub upload_to_remote: bool,

    /// Maximum size of a single upload in bytes (default: 2 GiB)
    pub max_file_size: usize,

    /// Lifetime of presigned download URLs in seconds (default: 12 hours)
    pub remote_url_ttl_secs: u64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            staging_dir: env::temp_dir().join("rust-pdf-merger"),
            stage_block_size: 8 * 1024 * 1024, // 8 MiB
            part_size_mb: 150,
            split_threshold_mb: 200,
            merge_order: MergeOrder::Upload,
            reduce_strategy: ReduceStrategy::LeftFold,
            skip_page_count: false,
            upload_to_remote: false,
            max_file_size: 2 * 1024 * 1024 * 1024, // 2 GiB
            remote_url_ttl_secs: 43200,
        }
    }
}

impl MergeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            staging_dir: env::var("STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.staging_dir),

            stage_block_size: env::var("STAGE_BLOCK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(default.stage_block_size),

            part_size_mb: env::var("PART_SIZE_MB")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(clamp_part_size_mb)
                .unwrap_or(default.part_size_mb),

            split_threshold_mb: env::var("SPLIT_THRESHOLD_MB")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.split_threshold_mb),

            merge_order: env::var("MERGE_ORDER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.merge_order),

            reduce_strategy: env::var("REDUCE_STRATEGY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.reduce_strategy),

            skip_page_count: env::var("SKIP_PAGE_COUNT")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(default.skip_page_count),

            upload_to_remote: env::var("UPLOAD_TO_REMOTE")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(default.upload_to_remote),

            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            remote_url_ttl_secs: env::var("REMOTE_URL_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.remote_url_ttl_secs),
        }
    }

    /// Small blocks and an isolated staging root, for tests
    pub fn development(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            stage_block_size: 64 * 1024,
            ..Self::default()
        }
    }

    pub fn split_threshold_bytes(&self) -> u64 {
        self.split_threshold_mb * MIB
    }
}

pub fn clamp_part_size_mb(mb: u64) -> u64 {
    mb.clamp(MIN_PART_SIZE_MB, MAX_PART_SIZE_MB)
}

pub fn part_size_in_range(mb: u64) -> bool {
    (MIN_PART_SIZE_MB..=MAX_PART_SIZE_MB).contains(&mb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MergeConfig::default();
        assert_eq!(config.stage_block_size, 8 * 1024 * 1024);
        assert_eq!(config.part_size_mb, 150);
        assert_eq!(config.merge_order, MergeOrder::Upload);
        assert_eq!(config.reduce_strategy, ReduceStrategy::LeftFold);
        assert!(!config.skip_page_count);
        assert!(!config.upload_to_remote);
    }

    #[test]
    fn test_part_size_bounds() {
        assert_eq!(clamp_part_size_mb(1), MIN_PART_SIZE_MB);
        assert_eq!(clamp_part_size_mb(150), 150);
        assert_eq!(clamp_part_size_mb(10_000), MAX_PART_SIZE_MB);
        assert!(part_size_in_range(5));
        assert!(part_size_in_range(500));
        assert!(!part_size_in_range(4));
        assert!(!part_size_in_range(501));
    }

    #[test]
    fn test_parse_knobs() {
        assert_eq!("name".parse::<MergeOrder>().unwrap(), MergeOrder::Name);
        assert_eq!(" Upload ".parse::<MergeOrder>().unwrap(), MergeOrder::Upload);
        assert!("random".parse::<MergeOrder>().is_err());
        assert_eq!(
            "balanced".parse::<ReduceStrategy>().unwrap(),
            ReduceStrategy::Balanced
        );
        assert_eq!("ALWAYS".parse::<SplitMode>().unwrap(), SplitMode::Always);
        assert!("sometimes".parse::<SplitMode>().is_err());
    }

    #[test]
    fn test_development_config() {
        let config = MergeConfig::development("/tmp/merger-test");
        assert_eq!(config.staging_dir, PathBuf::from("/tmp/merger-test"));
        assert_eq!(config.stage_block_size, 64 * 1024);
        assert_eq!(config.split_threshold_bytes(), 200 * MIB);
    }
}
