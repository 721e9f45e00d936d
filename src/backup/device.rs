//! Device details from the backup's `Info.plist`
//!
//! Only a handful of string values are needed, so the XML plist is scanned
//! as text rather than parsed.

use crate::core::error::{PhotosError, Result};
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

pub const INFO_PLIST: &str = "Info.plist";

/// Identity of the device a backup came from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_backup_date: Option<String>,
}

impl DeviceInfo {
    /// Read `<root>/Info.plist`. A missing file yields empty info.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(INFO_PLIST);
        if !path.is_file() {
            debug!("No {} in {}", INFO_PLIST, root.display());
            return Ok(Self::default());
        }

        let bytes = fs::read(&path).map_err(|e| {
            PhotosError::Io(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        Ok(Self::from_plist_text(&String::from_utf8_lossy(&bytes)))
    }

    pub fn from_plist_text(text: &str) -> Self {
        Self {
            device_name: plist_value(text, "Device Name"),
            product_type: plist_value(text, "Product Type"),
            product_version: plist_value(text, "Product Version"),
            serial_number: plist_value(text, "Serial Number"),
            last_backup_date: plist_value(text, "Last Backup Date"),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// One-line description, e.g. `Jane's iPhone (iPhone15,2, iOS 17.4)`
    pub fn describe(&self) -> String {
        let name = self.device_name.as_deref().unwrap_or("Unknown device");
        let mut details = Vec::new();
        if let Some(product) = &self.product_type {
            details.push(product.clone());
        }
        if let Some(version) = &self.product_version {
            details.push(format!("iOS {}", version));
        }

        if details.is_empty() {
            name.to_string()
        } else {
            format!("{} ({})", name, details.join(", "))
        }
    }
}

/// `<key>..</key>` followed by a `<string>` or `<date>` value
fn plist_entry_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<key>\s*([^<]*?)\s*</key>\s*<(?:string|date)>([^<]*)</(?:string|date)>").unwrap()
    })
}

/// String or date value following `<key>{key}</key>`, entities decoded
fn plist_value(text: &str, key: &str) -> Option<String> {
    plist_entry_regex()
        .captures_iter(text)
        .find(|caps| xml_unescape(&caps[1]) == key)
        .map(|caps| xml_unescape(caps[2].trim()))
        .filter(|value| !value.is_empty())
}

/// Decode the predefined XML entities
fn xml_unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
