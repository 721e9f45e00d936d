//! Asset filtering
//!
//! Filters run in a fixed order and the first one that rejects an asset
//! records the reason:
//! 1. hidden / recently-deleted flags
//! 2. creation date range
//! 3. asset type allow-list
//! 4. ignore patterns

use crate::assets::{Asset, AssetType};
use crate::core::cancel::CancellationToken;
use crate::core::config::SyncOptions;
use crate::core::error::{PhotosError, Result};
use chrono::NaiveDate;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Assets filtered between cancellation checks
const FILTER_CHUNK_SIZE: usize = 1000;

/// Why an asset was left out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    Hidden,
    RecentlyDeleted,
    DateRange,
    Type,
    IgnorePattern,
}

/// Per-reason exclusion counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStats {
    pub input: usize,
    pub kept: usize,
    pub excluded_hidden: usize,
    pub excluded_recently_deleted: usize,
    pub excluded_date_range: usize,
    pub excluded_type: usize,
    pub excluded_ignore_pattern: usize,
}

impl FilterStats {
    fn record(&mut self, reason: ExclusionReason) {
        match reason {
            ExclusionReason::Hidden => self.excluded_hidden += 1,
            ExclusionReason::RecentlyDeleted => self.excluded_recently_deleted += 1,
            ExclusionReason::DateRange => self.excluded_date_range += 1,
            ExclusionReason::Type => self.excluded_type += 1,
            ExclusionReason::IgnorePattern => self.excluded_ignore_pattern += 1,
        }
    }

    pub fn total_excluded(&self) -> usize {
        self.excluded_hidden
            + self.excluded_recently_deleted
            + self.excluded_date_range
            + self.excluded_type
            + self.excluded_ignore_pattern
    }

    /// Non-zero counters as `(label, count)` pairs, for summaries
    pub fn breakdown(&self) -> Vec<(&'static str, usize)> {
        [
            ("hidden", self.excluded_hidden),
            ("recently deleted", self.excluded_recently_deleted),
            ("outside date range", self.excluded_date_range),
            ("type not selected", self.excluded_type),
            ("ignore pattern", self.excluded_ignore_pattern),
        ]
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .collect()
    }
}

#[derive(Debug, Clone)]
enum PatternKind {
    /// No wildcard: substring of the path
    Substring(String),
    /// `dir/*`: a `/dir/` component anywhere in the path
    Directory(String),
    /// Glob matched against each path component and the filename
    Glob(Regex),
}

/// One compiled ignore pattern
#[derive(Debug, Clone)]
pub struct IgnorePattern {
    raw: String,
    kind: PatternKind,
}

impl IgnorePattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        let raw = pattern.trim().replace('\\', "/");
        if raw.is_empty() {
            return Err(PhotosError::InvalidInput("empty ignore pattern".to_string()));
        }

        let has_wildcard = raw.contains('*') || raw.contains('?');
        let kind = if !has_wildcard {
            PatternKind::Substring(raw.clone())
        } else if let Some(dir) = raw.strip_suffix("/*").filter(|d| !d.contains(['*', '?'])) {
            PatternKind::Directory(dir.trim_matches('/').to_string())
        } else {
            PatternKind::Glob(glob_to_regex(&raw)?)
        };

        Ok(Self { raw, kind })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match against a `/`-separated source path and the filename
    pub fn matches(&self, path: &str, filename: &str) -> bool {
        match &self.kind {
            PatternKind::Substring(needle) => path.contains(needle.as_str()) || filename.contains(needle.as_str()),
            PatternKind::Directory(dir) => {
                let wrapped = format!("/{}/", path.trim_start_matches('/'));
                wrapped.contains(&format!("/{}/", dir))
            }
            PatternKind::Glob(re) => {
                re.is_match(filename) || path.split('/').any(|component| re.is_match(component))
            }
        }
    }
}

/// Translate a glob into an anchored regex: `*` matches within one
/// component, `?` one character
fn glob_to_regex(glob: &str) -> Result<Regex> {
    let mut pattern = String::from("^");
    for c in glob.chars() {
        match c {
            '*' => pattern.push_str("[^/]*"),
            '?' => pattern.push_str("[^/]"),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');

    Regex::new(&pattern)
        .map_err(|e| PhotosError::InvalidInput(format!("invalid ignore pattern '{}': {}", glob, e)))
}

/// The filter chain for one run
#[derive(Debug, Clone)]
pub struct AssetFilter {
    include_hidden: bool,
    include_recently_deleted: bool,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    types: Vec<AssetType>,
    patterns: Vec<IgnorePattern>,
}

impl AssetFilter {
    /// Build the chain from run options, rejecting unknown type names and
    /// inverted date ranges
    pub fn from_options(options: &SyncOptions) -> Result<Self> {
        if let (Some(start), Some(end)) = (options.start_date, options.end_date) {
            if start > end {
                return Err(PhotosError::InvalidInput(format!(
                    "start date {} is after end date {}",
                    start, end
                )));
            }
        }

        let types = options
            .types
            .iter()
            .flat_map(|t| t.split(','))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| t.parse::<AssetType>().map_err(PhotosError::InvalidInput))
            .collect::<Result<Vec<_>>>()?;

        let patterns = options
            .ignore_patterns
            .iter()
            .filter(|p| !p.trim().is_empty())
            .map(|p| IgnorePattern::parse(p))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            include_hidden: options.include_hidden,
            include_recently_deleted: options.include_recently_deleted,
            start_date: options.start_date,
            end_date: options.end_date,
            types,
            patterns,
        })
    }

    /// First reason this asset is excluded, if any
    pub fn check(&self, asset: &Asset) -> Option<ExclusionReason> {
        // flag rules live on the asset; each half is asked alone to name the reason
        if asset.should_exclude(self.include_hidden, true) {
            return Some(ExclusionReason::Hidden);
        }
        if asset.should_exclude(true, self.include_recently_deleted) {
            return Some(ExclusionReason::RecentlyDeleted);
        }

        let day = asset.creation_date.date_naive();
        if self.start_date.map(|start| day < start).unwrap_or(false)
            || self.end_date.map(|end| day > end).unwrap_or(false)
        {
            return Some(ExclusionReason::DateRange);
        }

        if !self.types.is_empty() && !self.types.contains(&asset.asset_type) {
            return Some(ExclusionReason::Type);
        }

        if !self.patterns.is_empty() {
            let path = asset.source_path.to_string_lossy().replace('\\', "/");
            if self
                .patterns
                .iter()
                .any(|p| p.matches(&path, &asset.filename))
            {
                return Some(ExclusionReason::IgnorePattern);
            }
        }

        None
    }

    /// Apply the chain, keeping input order
    pub fn apply(&self, assets: Vec<Asset>, cancel: &CancellationToken) -> Result<(Vec<Asset>, FilterStats)> {
        let mut stats = FilterStats {
            input: assets.len(),
            ..FilterStats::default()
        };
        let mut kept = Vec::with_capacity(assets.len());

        for (i, asset) in assets.into_iter().enumerate() {
            if i % FILTER_CHUNK_SIZE == 0 {
                cancel.check()?;
            }
            match self.check(&asset) {
                Some(reason) => stats.record(reason),
                None => kept.push(asset),
            }
        }

        stats.kept = kept.len();
        debug!(
            "Filter kept {} of {} assets ({} excluded)",
            stats.kept,
            stats.input,
            stats.total_excluded()
        );
        Ok((kept, stats))
    }
}
