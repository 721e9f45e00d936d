//! Manifest.db file index
//!
//! A hashed backup stores every file under `<root>/<id[0..2]>/<id>` and
//! records the logical `(domain, relativePath)` of each id in the `Files`
//! table of `Manifest.db`. This module reads that table, checks it has the
//! expected shape and answers the lookups the rest of the tool needs.

use crate::core::error::{PhotosError, Result};
use log::{debug, trace};
use regex::Regex;
use rusqlite::{params, Connection, OpenFlags, Row};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// File-index database name at the backup root
pub const MANIFEST_DB: &str = "Manifest.db";

/// Property list holding the encryption flag
pub const MANIFEST_PLIST: &str = "Manifest.plist";

/// Columns the `Files` table must provide, with their declared types
const REQUIRED_COLUMNS: &[(&str, &str)] = &[
    ("fileID", "TEXT"),
    ("domain", "TEXT"),
    ("relativePath", "TEXT"),
    ("flags", "INTEGER"),
    ("file", "BLOB"),
];

/// Relative-path patterns tried, in order, to find the photo catalog
const PHOTO_DB_PATTERNS: &[&str] = &[
    "%Photos.sqlite",
    "%PhotoData/Photos.sqlite",
    "%Photos/Photos.sqlite",
    "%Media/PhotoData/Photos.sqlite",
];

/// Domains searched when no pattern matches
const PHOTO_DB_DOMAINS: &[&str] = &[
    "MediaDomain",
    "CameraRollDomain",
    "AppDomain-com.apple.mobileslideshow",
];

/// Chars after `IsEncrypted` searched for the boolean value
const ENCRYPTION_WINDOW: usize = 100;

const SELECT_COLUMNS: &str = "fileID, domain, relativePath, flags, file";

const EXCLUDE_JOURNALS: &str =
    "relativePath NOT LIKE '%-wal' AND relativePath NOT LIKE '%-shm'";

/// One row of the `Files` table
#[derive(Debug, Clone, PartialEq)]
pub struct FileIndexEntry {
    /// 40-hex-char content id
    pub file_id: String,
    pub domain: String,
    pub relative_path: String,
    /// 1 = regular file, 2 = directory, 4 = symlink
    pub flags: i64,
    /// Embedded property list describing the file
    pub blob: Option<Vec<u8>>,
}

impl FileIndexEntry {
    pub fn is_regular_file(&self) -> bool {
        self.flags == 1
    }

    /// Last component of the relative path
    pub fn file_name(&self) -> &str {
        self.relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_path)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            file_id: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
            domain: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            relative_path: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            flags: row.get::<_, Option<i64>>(3)?.unwrap_or_default(),
            blob: row.get(4)?,
        })
    }
}

/// On-disk location of a hashed file: `<root>/<id[0..2]>/<id>`
pub fn hashed_path(root: &Path, file_id: &str) -> PathBuf {
    let bucket = file_id.get(..2).unwrap_or(file_id);
    root.join(bucket).join(file_id)
}

/// Check whether `Manifest.plist` under `root` marks the backup as encrypted.
///
/// A missing plist counts as unencrypted.
pub fn is_encrypted(root: &Path) -> Result<bool> {
    let plist = root.join(MANIFEST_PLIST);
    if !plist.exists() {
        debug!("No {} at {}", MANIFEST_PLIST, root.display());
        return Ok(false);
    }

    let bytes = fs::read(&plist).map_err(|e| {
        PhotosError::Io(format!("Failed to read '{}': {}", plist.display(), e))
    })?;
    Ok(plist_marks_encrypted(&String::from_utf8_lossy(&bytes)))
}

/// Text scan of a property list for `IsEncrypted` followed by `<true/>`.
///
/// The first boolean literal within the window after the key decides.
pub fn plist_marks_encrypted(text: &str) -> bool {
    let Some(pos) = text.find("IsEncrypted") else {
        return false;
    };

    let window: String = text[pos + "IsEncrypted".len()..]
        .chars()
        .take(ENCRYPTION_WINDOW)
        .collect();

    boolean_literal_regex()
        .captures(&window)
        .map(|caps| &caps[1] == "true")
        .unwrap_or(false)
}

fn boolean_literal_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<\s*(true|false)\s*/\s*>").unwrap())
}

/// Refuse encrypted backups
pub fn ensure_not_encrypted(root: &Path) -> Result<()> {
    if is_encrypted(root)? {
        return Err(PhotosError::EncryptedBackup(root.to_path_buf()));
    }
    Ok(())
}

/// Read-only handle on `Manifest.db`
pub struct ManifestIndex {
    root: PathBuf,
    conn: Connection,
    has_files_table: bool,
}

impl std::fmt::Debug for ManifestIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestIndex")
            .field("root", &self.root)
            .field("has_files_table", &self.has_files_table)
            .finish()
    }
}

impl ManifestIndex {
    /// Open `<root>/Manifest.db` read-only and validate its schema
    pub fn open(root: &Path) -> Result<Self> {
        let db_path = root.join(MANIFEST_DB);
        if !db_path.is_file() {
            return Err(PhotosError::IndexSchema(format!(
                "{} not found in {}",
                MANIFEST_DB,
                root.display()
            )));
        }

        let conn = Connection::open_with_flags(
            &db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            PhotosError::IndexSchema(format!("Cannot open '{}': {}", db_path.display(), e))
        })?;

        let mut index = Self {
            root: root.to_path_buf(),
            conn,
            has_files_table: false,
        };
        index.has_files_table = index.validate_schema()?;
        Ok(index)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check the `Files` table columns.
    ///
    /// Returns `Ok(false)` for a database without a `Files` table, which is
    /// tolerated; lookups on it report "not found".
    pub fn validate_schema(&self) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare("PRAGMA table_info(Files)")
            .map_err(|e| PhotosError::IndexSchema(format!("Cannot inspect Files table: {}", e)))?;

        let columns: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?)))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| PhotosError::IndexSchema(format!("Cannot inspect Files table: {}", e)))?;

        if columns.is_empty() {
            debug!("Manifest.db has no Files table");
            return Ok(false);
        }

        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|(name, ty)| {
                !columns
                    .iter()
                    .any(|(c, t)| c == name && t.eq_ignore_ascii_case(ty))
            })
            .map(|(name, ty)| format!("{} ({})", name, ty))
            .collect();

        if !missing.is_empty() {
            return Err(PhotosError::IndexSchema(format!(
                "Files table is missing columns: {}",
                missing.join(", ")
            )));
        }

        Ok(true)
    }

    /// On-disk path for a file id in this backup
    pub fn hashed_path(&self, file_id: &str) -> PathBuf {
        hashed_path(&self.root, file_id)
    }

    fn query_entries<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<FileIndexEntry>> {
        if !self.has_files_table {
            return Ok(Vec::new());
        }

        trace!("Manifest query: {}", sql);
        let mut stmt = self.conn.prepare(sql)?;
        let entries = stmt
            .query_map(params, FileIndexEntry::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// First entry whose relative path matches a LIKE pattern, shortest path first
    pub fn find_by_pattern(&self, pattern: &str) -> Result<Option<FileIndexEntry>> {
        let sql = format!(
            "SELECT {} FROM Files WHERE relativePath LIKE ?1 AND {} \
             ORDER BY LENGTH(relativePath) ASC LIMIT 1",
            SELECT_COLUMNS, EXCLUDE_JOURNALS
        );
        Ok(self.query_entries(&sql, params![pattern])?.into_iter().next())
    }

    /// First entry in `domain` whose relative path ends with `filename`
    pub fn find_by_domain(&self, domain: &str, filename: &str) -> Result<Option<FileIndexEntry>> {
        let sql = format!(
            "SELECT {} FROM Files WHERE domain = ?1 AND relativePath LIKE ?2 AND {} \
             ORDER BY LENGTH(relativePath) ASC LIMIT 1",
            SELECT_COLUMNS, EXCLUDE_JOURNALS
        );
        let suffix = format!("%{}", filename);
        Ok(self
            .query_entries(&sql, params![domain, suffix])?
            .into_iter()
            .next())
    }

    /// Locate the photo catalog database entry
    pub fn find_photo_database(&self) -> Result<FileIndexEntry> {
        for pattern in PHOTO_DB_PATTERNS {
            if let Some(entry) = self.find_by_pattern(pattern)? {
                debug!(
                    "Photo catalog found via pattern {}: {}/{}",
                    pattern, entry.domain, entry.relative_path
                );
                return Ok(entry);
            }
        }

        for domain in PHOTO_DB_DOMAINS {
            if let Some(entry) = self.find_by_domain(domain, "Photos.sqlite")? {
                debug!(
                    "Photo catalog found in {}: {}",
                    domain, entry.relative_path
                );
                return Ok(entry);
            }
        }

        Err(PhotosError::NotFound(format!(
            "Photos.sqlite not found in backup index at {}",
            self.root.display()
        )))
    }

    /// Whether the backup holds any camera-roll media
    pub fn has_media(&self) -> Result<bool> {
        let sql = format!(
            "SELECT {} FROM Files WHERE flags = 1 AND relativePath LIKE '%DCIM/%' AND {} LIMIT 1",
            SELECT_COLUMNS, EXCLUDE_JOURNALS
        );
        Ok(!self.query_entries(&sql, params![])?.is_empty())
    }

    /// Regular files under DCIM or PhotoData
    pub fn photo_entries(&self) -> Result<Vec<FileIndexEntry>> {
        let sql = format!(
            "SELECT {} FROM Files WHERE flags = 1 \
             AND (relativePath LIKE '%DCIM/%' OR relativePath LIKE '%PhotoData/%') AND {} \
             ORDER BY relativePath",
            SELECT_COLUMNS, EXCLUDE_JOURNALS
        );
        self.query_entries(&sql, params![])
    }

    /// Every regular file (flags == 1) in the index
    pub fn regular_files(&self) -> Result<Vec<FileIndexEntry>> {
        let sql = format!(
            "SELECT {} FROM Files WHERE flags = 1 ORDER BY domain, relativePath",
            SELECT_COLUMNS
        );
        self.query_entries(&sql, params![])
    }

    /// Distinct domain names, sorted
    pub fn domains(&self) -> Result<Vec<String>> {
        if !self.has_files_table {
            return Ok(Vec::new());
        }
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT domain FROM Files WHERE domain IS NOT NULL ORDER BY domain")?;
        let domains = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(domains)
    }

    /// Map `DCIM/<dir>/<file>` to file id for every camera-roll file.
    ///
    /// Keys drop any prefix before `DCIM/` (usually `Media/`), so they line
    /// up with the catalog's `ZDIRECTORY/ZFILENAME`.
    pub fn dcim_file_map(&self) -> Result<HashMap<String, String>> {
        let mut map = HashMap::new();
        for entry in self.photo_entries()? {
            if let Some(pos) = entry.relative_path.find("DCIM/") {
                map.entry(entry.relative_path[pos..].to_string())
                    .or_insert(entry.file_id);
            }
        }
        debug!("Indexed {} camera-roll files", map.len());
        Ok(map)
    }
}
