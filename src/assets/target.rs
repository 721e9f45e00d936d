//! Date-based remote target paths
//!
//! Target paths are always joined with `/`, whatever the host OS.

use crate::assets::model::AssetType;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How deep the date hierarchy goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathGranularity {
    Year,
    Month,
    #[default]
    Day,
}

impl fmt::Display for PathGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PathGranularity::Year => "year",
            PathGranularity::Month => "month",
            PathGranularity::Day => "day",
        })
    }
}

impl FromStr for PathGranularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "year" => Ok(PathGranularity::Year),
            "month" => Ok(PathGranularity::Month),
            "day" => Ok(PathGranularity::Day),
            other => Err(format!(
                "invalid path granularity '{}' (expected year, month or day)",
                other
            )),
        }
    }
}

/// Build `YYYY[/MM[/DD]]/<type>/<filename>`
pub fn target_path(
    creation_date: &DateTime<Utc>,
    asset_type: AssetType,
    filename: &str,
    granularity: PathGranularity,
) -> String {
    let prefix = match granularity {
        PathGranularity::Year => format!("{:04}", creation_date.year()),
        PathGranularity::Month => {
            format!("{:04}/{:02}", creation_date.year(), creation_date.month())
        }
        PathGranularity::Day => format!(
            "{:04}/{:02}/{:02}",
            creation_date.year(),
            creation_date.month(),
            creation_date.day()
        ),
    };

    format!("{}/{}/{}", prefix, asset_type.dir_name(), filename.replace('\\', "/"))
}
