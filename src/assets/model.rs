//! Asset records and classification

use crate::assets::target::{target_path, PathGranularity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Video file extensions; everything else is treated as a photo
const VIDEO_EXTENSIONS: &[&str] = &["mov", "mp4", "m4v", "avi", "mkv", "webm", "3gp"];

/// Asset classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Photo,
    Video,
    Screenshot,
    Burst,
    LivePhoto,
}

impl AssetType {
    pub const ALL: [AssetType; 5] = [
        AssetType::Photo,
        AssetType::Video,
        AssetType::Screenshot,
        AssetType::Burst,
        AssetType::LivePhoto,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Photo => "photo",
            AssetType::Video => "video",
            AssetType::Screenshot => "screenshot",
            AssetType::Burst => "burst",
            AssetType::LivePhoto => "live_photo",
        }
    }

    /// Folder name used in remote target paths
    pub fn dir_name(&self) -> &'static str {
        match self {
            AssetType::Photo => "photos",
            AssetType::Video => "videos",
            AssetType::Screenshot => "screenshots",
            AssetType::Burst => "bursts",
            AssetType::LivePhoto => "live_photos",
        }
    }

    /// Case-insensitive match against the type name or its folder name
    pub fn matches_name(&self, name: &str) -> bool {
        let name = name.trim();
        name.eq_ignore_ascii_case(self.as_str()) || name.eq_ignore_ascii_case(self.dir_name())
    }

    /// Resolve the type of an asset.
    ///
    /// Order: screenshot flag, live-photo subtype, burst membership, then
    /// the file extension decides between video and photo.
    pub fn classify(flags: &AssetFlags, filename: &str) -> AssetType {
        if flags.screenshot {
            AssetType::Screenshot
        } else if flags.live_photo {
            AssetType::LivePhoto
        } else if flags.burst {
            AssetType::Burst
        } else if is_video_filename(filename) {
            AssetType::Video
        } else {
            AssetType::Photo
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AssetType::ALL
            .iter()
            .copied()
            .find(|t| t.matches_name(s))
            .ok_or_else(|| format!("unknown asset type '{}'", s.trim()))
    }
}

/// Catalog flags carried by an asset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetFlags {
    pub hidden: bool,
    pub recently_deleted: bool,
    pub screenshot: bool,
    pub burst: bool,
    pub live_photo: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_photo_pair_id: Option<String>,
}

/// One photo or video from the device catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// Stable catalog id
    pub id: String,
    /// Resolved on-disk source
    pub source_path: PathBuf,
    pub filename: String,
    pub mime_type: String,
    #[serde(default)]
    pub file_size: u64,
    /// SHA-256 of the content, when computed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    pub creation_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modification_date: Option<DateTime<Utc>>,
    pub asset_type: AssetType,
    #[serde(default)]
    pub flags: AssetFlags,
    #[serde(default)]
    pub has_adjustments: bool,
    /// Remote path relative to the remote base; set by the planner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_path: Option<String>,
}

impl Asset {
    /// Build an asset, deriving MIME type and classification
    pub fn new(
        id: impl Into<String>,
        source_path: PathBuf,
        filename: impl Into<String>,
        creation_date: DateTime<Utc>,
        flags: AssetFlags,
    ) -> Self {
        let filename = filename.into();
        Self {
            id: id.into(),
            source_path,
            mime_type: mime_type_for(&filename).to_string(),
            asset_type: AssetType::classify(&flags, &filename),
            filename,
            file_size: 0,
            digest: None,
            creation_date,
            modification_date: None,
            flags,
            has_adjustments: false,
            target_path: None,
        }
    }

    /// An asset is valid when id, source path and filename are set and the
    /// creation date is not the zero timestamp
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty()
            && !self.source_path.as_os_str().is_empty()
            && !self.filename.is_empty()
            && self.creation_date.timestamp() != 0
    }

    /// True when a flag excludes this asset under the given include options
    pub fn should_exclude(&self, include_hidden: bool, include_recently_deleted: bool) -> bool {
        (self.flags.hidden && !include_hidden)
            || (self.flags.recently_deleted && !include_recently_deleted)
    }

    /// Remote target path under the given granularity
    pub fn compute_target_path(&self, granularity: PathGranularity) -> String {
        target_path(&self.creation_date, self.asset_type, &self.filename, granularity)
    }
}

/// True when the extension names a video container
pub fn is_video_filename(filename: &str) -> bool {
    extension_lower(filename)
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn extension_lower(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// MIME type from the lowercase file extension
pub fn mime_type_for(filename: &str) -> &'static str {
    match extension_lower(filename).as_deref() {
        Some("heic") | Some("heif") => "image/heif",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("tiff") | Some("tif") => "image/tiff",
        Some("webp") => "image/webp",
        Some("mov") => "video/quicktime",
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("avi") => "video/avi",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}
