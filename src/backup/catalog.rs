//! Photos.sqlite catalog reader
//!
//! The `ZASSET` table changes shape between iOS releases. Instead of one
//! query per release, each field the tool needs is resolved from an ordered
//! list of candidate columns (see [`COLUMN_RULES`]) and the chosen
//! expressions are assembled into a single `SELECT`.

use crate::assets::{Asset, AssetFlags};
use crate::core::cancel::CancellationToken;
use crate::core::error::{PhotosError, Result};
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, trace};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Seconds between the Unix epoch and 2001-01-01T00:00:00Z
pub const CORE_DATA_EPOCH_OFFSET: i64 = 978_307_200;

/// Rows between cancellation checks while scanning
const CANCEL_CHECK_INTERVAL: usize = 1000;

/// `ZKINDSUBTYPE` value marking a live photo
const LIVE_PHOTO_SUBTYPE: i64 = 2;

/// What to project when none of a rule's candidate columns exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// The catalog cannot be read
    Fatal,
    /// Use a constant SQL expression
    Literal(&'static str),
    /// Reuse the resolved creation-date column
    CreationColumn,
}

/// Candidate columns for one projected field, in priority order
#[derive(Debug, Clone, Copy)]
pub struct ColumnRule {
    pub field: &'static str,
    /// `(column that must exist, SQL expression to select)`
    pub candidates: &'static [(&'static str, &'static str)],
    pub fallback: Fallback,
}

pub const FIELD_CREATION: &str = "creation_date";
pub const FIELD_MODIFICATION: &str = "modification_date";
pub const FIELD_HIDDEN: &str = "hidden";
pub const FIELD_TRASHED: &str = "trashed";
pub const FIELD_KIND_SUBTYPE: &str = "kind_subtype";
pub const FIELD_BURST_ID: &str = "burst_id";
pub const FIELD_SCREENSHOT: &str = "is_screenshot";
pub const FIELD_ADJUSTMENTS: &str = "has_adjustments";

/// Column resolution table, in projection order after the fixed columns
pub const COLUMN_RULES: &[ColumnRule] = &[
    ColumnRule {
        field: FIELD_CREATION,
        candidates: &[
            ("ZCREATIONDATE", "ZCREATIONDATE"),
            ("ZDATECREATED", "ZDATECREATED"),
            ("ZADDEDDATE", "ZADDEDDATE"),
        ],
        fallback: Fallback::Fatal,
    },
    ColumnRule {
        field: FIELD_MODIFICATION,
        candidates: &[
            ("ZMODIFICATIONDATE", "ZMODIFICATIONDATE"),
            ("ZDATEMODIFIED", "ZDATEMODIFIED"),
            ("ZMODIFIEDDATE", "ZMODIFIEDDATE"),
        ],
        fallback: Fallback::CreationColumn,
    },
    ColumnRule {
        field: FIELD_HIDDEN,
        candidates: &[("ZHIDDEN", "ZHIDDEN")],
        fallback: Fallback::Literal("0"),
    },
    ColumnRule {
        field: FIELD_TRASHED,
        candidates: &[
            ("ZTRASHED", "ZTRASHED"),
            ("ZTRASHEDSTATE", "COALESCE(ZTRASHEDSTATE, 0)"),
        ],
        fallback: Fallback::Literal("0"),
    },
    ColumnRule {
        field: FIELD_KIND_SUBTYPE,
        candidates: &[("ZKINDSUBTYPE", "ZKINDSUBTYPE")],
        fallback: Fallback::Literal("0"),
    },
    ColumnRule {
        field: FIELD_BURST_ID,
        candidates: &[
            ("ZBURSTIDENTIFIER", "ZBURSTIDENTIFIER"),
            ("ZAVALANCHEUUID", "ZAVALANCHEUUID"),
        ],
        fallback: Fallback::Literal("NULL"),
    },
    ColumnRule {
        field: FIELD_SCREENSHOT,
        candidates: &[
            ("ZISSCREENSHOT", "ZISSCREENSHOT"),
            ("ZISDETECTEDSCREENSHOT", "ZISDETECTEDSCREENSHOT"),
        ],
        fallback: Fallback::Literal("0"),
    },
    ColumnRule {
        field: FIELD_ADJUSTMENTS,
        candidates: &[
            ("ZHASADJUSTMENTS", "ZHASADJUSTMENTS"),
            (
                "ZADJUSTMENTSSTATE",
                "CASE WHEN ZADJUSTMENTSSTATE > 0 THEN 1 ELSE 0 END",
            ),
        ],
        fallback: Fallback::Literal("0"),
    },
];

/// Columns every catalog must have
const FIXED_COLUMNS: &[&str] = &["Z_PK", "ZFILENAME", "ZDIRECTORY"];

/// Convert a Core Data timestamp (seconds since 2001-01-01 UTC) to UTC
pub fn core_data_to_utc(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    if whole < i64::MIN as f64 || whole >= i64::MAX as f64 {
        return None;
    }
    let nanos = ((seconds - whole) * 1e9).round() as u32;
    let secs = CORE_DATA_EPOCH_OFFSET.checked_add(whole as i64)?;
    Utc.timestamp_opt(secs, nanos.min(999_999_999)).single()
}

/// One field's resolved projection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumn {
    pub field: &'static str,
    /// Column the expression came from, if any
    pub column: Option<String>,
    /// SQL expression placed in the SELECT list
    pub expression: String,
}

impl ResolvedColumn {
    /// Name used in decode errors
    fn label(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.expression)
    }
}

/// The catalog query chosen for one database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSchema {
    pub columns: Vec<ResolvedColumn>,
}

impl CatalogSchema {
    /// Resolve every rule against the columns present in `ZASSET`
    pub fn resolve(available: &HashSet<String>) -> Result<Self> {
        for fixed in FIXED_COLUMNS {
            if !available.contains(*fixed) {
                return Err(PhotosError::CatalogSchema(format!(
                    "ZASSET has no {} column",
                    fixed
                )));
            }
        }

        let mut columns: Vec<ResolvedColumn> = Vec::with_capacity(COLUMN_RULES.len());
        for rule in COLUMN_RULES {
            let chosen = rule
                .candidates
                .iter()
                .find(|(column, _)| available.contains(*column));

            let resolved = match (chosen, rule.fallback) {
                (Some((column, expr)), _) => ResolvedColumn {
                    field: rule.field,
                    column: Some(column.to_string()),
                    expression: expr.to_string(),
                },
                (None, Fallback::Literal(literal)) => ResolvedColumn {
                    field: rule.field,
                    column: None,
                    expression: literal.to_string(),
                },
                (None, Fallback::CreationColumn) => {
                    let creation = columns
                        .iter()
                        .find(|c| c.field == FIELD_CREATION)
                        .cloned()
                        .ok_or_else(|| {
                            PhotosError::CatalogSchema(
                                "no suitable creation date column".to_string(),
                            )
                        })?;
                    ResolvedColumn {
                        field: rule.field,
                        ..creation
                    }
                }
                (None, Fallback::Fatal) => {
                    return Err(PhotosError::CatalogSchema(format!(
                        "no suitable {} column (tried {})",
                        rule.field.replace('_', " "),
                        rule.candidates
                            .iter()
                            .map(|(c, _)| *c)
                            .collect::<Vec<_>>()
                            .join(", ")
                    )));
                }
            };
            columns.push(resolved);
        }

        Ok(Self { columns })
    }

    /// The resolved projection for a field
    pub fn get(&self, field: &str) -> Option<&ResolvedColumn> {
        self.columns.iter().find(|c| c.field == field)
    }

    /// Column name (or expression) reported when a value fails to decode
    pub fn label<'a>(&'a self, field: &'a str) -> &'a str {
        self.get(field).map(ResolvedColumn::label).unwrap_or(field)
    }

    fn expression(&self, field: &str) -> &str {
        self.get(field).map(|c| c.expression.as_str()).unwrap_or("NULL")
    }

    /// Assemble the catalog query
    pub fn select_sql(&self) -> String {
        let projected: Vec<&str> = self.columns.iter().map(|c| c.expression.as_str()).collect();
        let creation = self.expression(FIELD_CREATION);
        format!(
            "SELECT {}, {} FROM ZASSET WHERE ZFILENAME IS NOT NULL AND ZFILENAME != '' ORDER BY {} ASC",
            FIXED_COLUMNS.join(", "),
            projected.join(", "),
            creation
        )
    }
}

/// One `ZASSET` row, with decoded values
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRecord {
    pub pk: i64,
    pub filename: String,
    pub directory: String,
    pub creation_date: DateTime<Utc>,
    pub modification_date: Option<DateTime<Utc>>,
    pub hidden: bool,
    pub trashed: bool,
    pub kind_subtype: i64,
    pub burst_id: Option<String>,
    pub is_screenshot: bool,
    pub has_adjustments: bool,
}

impl CatalogRecord {
    /// `ZDIRECTORY/ZFILENAME`, as stored under the media domain
    pub fn relative_path(&self) -> String {
        let dir = self.directory.trim_matches('/');
        if dir.is_empty() {
            self.filename.clone()
        } else {
            format!("{}/{}", dir, self.filename)
        }
    }

    pub fn flags(&self) -> AssetFlags {
        let burst_id = self.burst_id.clone().filter(|id| !id.is_empty());
        AssetFlags {
            hidden: self.hidden,
            recently_deleted: self.trashed,
            screenshot: self.is_screenshot,
            burst: burst_id.is_some(),
            live_photo: self.kind_subtype == LIVE_PHOTO_SUBTYPE,
            burst_id,
            live_photo_pair_id: None,
        }
    }

    /// Build the asset, given where its bytes live
    pub fn to_asset(&self, source_path: PathBuf) -> Asset {
        let mut asset = Asset::new(
            self.pk.to_string(),
            source_path,
            self.filename.clone(),
            self.creation_date,
            self.flags(),
        );
        asset.modification_date = self.modification_date;
        asset.has_adjustments = self.has_adjustments;
        asset
    }
}

/// True when `path` is a SQLite database with a `ZASSET` table
pub fn is_photo_catalog(path: &Path) -> bool {
    let conn = match Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY) {
        Ok(conn) => conn,
        Err(_) => return false,
    };
    has_asset_table(&conn).unwrap_or(false)
}

fn has_asset_table(conn: &Connection) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'ZASSET'",
        [],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Read-only handle on a photo catalog
pub struct PhotoCatalog {
    path: PathBuf,
    conn: Connection,
    schema: CatalogSchema,
}

impl PhotoCatalog {
    /// Open the catalog and resolve its schema
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(PhotosError::NotFound(format!(
                "Photo catalog not found: {}",
                path.display()
            )));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            PhotosError::CatalogSchema(format!("Cannot open '{}': {}", path.display(), e))
        })?;

        // Catches files that are not SQLite at all
        if !has_asset_table(&conn).map_err(|e| {
            PhotosError::CatalogSchema(format!("Cannot read '{}': {}", path.display(), e))
        })? {
            return Err(PhotosError::CatalogSchema(format!(
                "'{}' has no ZASSET table",
                path.display()
            )));
        }

        let available = asset_columns(&conn)?;
        let schema = CatalogSchema::resolve(&available)?;
        for column in &schema.columns {
            debug!("Catalog {} <- {}", column.field, column.expression);
        }

        Ok(Self {
            path: path.to_path_buf(),
            conn,
            schema,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &CatalogSchema {
        &self.schema
    }

    /// Number of rows with a filename
    pub fn asset_count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM ZASSET WHERE ZFILENAME IS NOT NULL AND ZFILENAME != ''",
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    /// Read every asset row, ordered by creation date.
    ///
    /// Rows without a creation timestamp are skipped.
    pub fn read_records(&self, cancel: &CancellationToken) -> Result<Vec<CatalogRecord>> {
        let sql = self.schema.select_sql();
        trace!("Catalog query: {}", sql);

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        let mut skipped = 0usize;
        let mut scanned = 0usize;

        let schema = &self.schema;
        while let Some(row) = rows.next()? {
            scanned += 1;
            if scanned % CANCEL_CHECK_INTERVAL == 0 {
                cancel.check()?;
            }

            let pk = decode_i64(row.get_ref(0)?, "Z_PK")?;
            let filename = decode_text(row.get_ref(1)?, "ZFILENAME")?.unwrap_or_default();
            let directory = decode_text(row.get_ref(2)?, "ZDIRECTORY")?.unwrap_or_default();

            let creation = decode_f64(row.get_ref(3)?, schema.label(FIELD_CREATION))?
                .and_then(core_data_to_utc);
            let Some(creation_date) = creation else {
                skipped += 1;
                trace!("Skipping asset {} ({}) without creation date", pk, filename);
                continue;
            };

            let modification_date = decode_f64(row.get_ref(4)?, schema.label(FIELD_MODIFICATION))?
                .and_then(core_data_to_utc);

            records.push(CatalogRecord {
                pk,
                filename,
                directory,
                creation_date,
                modification_date,
                hidden: decode_bool(row.get_ref(5)?, schema.label(FIELD_HIDDEN))?,
                trashed: decode_bool(row.get_ref(6)?, schema.label(FIELD_TRASHED))?,
                kind_subtype: decode_i64(row.get_ref(7)?, schema.label(FIELD_KIND_SUBTYPE))?,
                burst_id: decode_text(row.get_ref(8)?, schema.label(FIELD_BURST_ID))?,
                is_screenshot: decode_bool(row.get_ref(9)?, schema.label(FIELD_SCREENSHOT))?,
                has_adjustments: decode_bool(row.get_ref(10)?, schema.label(FIELD_ADJUSTMENTS))?,
            });
        }

        cancel.check()?;
        if skipped > 0 {
            debug!("Skipped {} catalog rows without a creation date", skipped);
        }
        debug!("Read {} assets from {}", records.len(), self.path.display());
        Ok(records)
    }
}

fn asset_columns(conn: &Connection) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("PRAGMA table_info(ZASSET)")?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<HashSet<_>>>()?;
    Ok(columns)
}

fn decode_error(column: &str, message: impl Into<String>) -> PhotosError {
    PhotosError::RowDecode {
        column: column.to_string(),
        message: message.into(),
    }
}

fn decode_f64(value: ValueRef<'_>, column: &str) -> Result<Option<f64>> {
    match value {
        ValueRef::Null => Ok(None),
        ValueRef::Integer(i) => Ok(Some(i as f64)),
        ValueRef::Real(f) => Ok(Some(f)),
        ValueRef::Text(text) => String::from_utf8_lossy(text)
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|e| decode_error(column, format!("expected a timestamp: {}", e))),
        ValueRef::Blob(_) => Err(decode_error(column, "expected a timestamp, found a blob")),
    }
}

fn decode_i64(value: ValueRef<'_>, column: &str) -> Result<i64> {
    match value {
        ValueRef::Null => Ok(0),
        ValueRef::Integer(i) => Ok(i),
        ValueRef::Real(f) => Ok(f as i64),
        ValueRef::Text(text) => String::from_utf8_lossy(text)
            .trim()
            .parse::<i64>()
            .map_err(|e| decode_error(column, format!("expected an integer: {}", e))),
        ValueRef::Blob(_) => Err(decode_error(column, "expected an integer, found a blob")),
    }
}

fn decode_bool(value: ValueRef<'_>, column: &str) -> Result<bool> {
    decode_i64(value, column).map(|v| v != 0)
}

fn decode_text(value: ValueRef<'_>, column: &str) -> Result<Option<String>> {
    match value {
        ValueRef::Null => Ok(None),
        ValueRef::Text(text) => Ok(Some(String::from_utf8_lossy(text).into_owned())),
        ValueRef::Integer(i) => Ok(Some(i.to_string())),
        ValueRef::Real(f) => Ok(Some(f.to_string())),
        ValueRef::Blob(_) => Err(decode_error(column, "expected text, found a blob")),
    }
}
