//! On-disk backup fixtures
//!
//! [`BackupFixture`] writes a real hashed backup into a temporary directory:
//! `Manifest.plist`, `Info.plist`, `Manifest.db`, a `Photos.sqlite` catalog
//! in one of several schema variants, and hashed media files whose ids are
//! derived the way iOS derives them (`sha1("<domain>-<relativePath>")`).

use crate::backup::catalog::CORE_DATA_EPOCH_OFFSET;
use crate::backup::manifest_index::{hashed_path, MANIFEST_DB, MANIFEST_PLIST};
use crate::core::checksum::sha1_hex;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// =============================================================================
// CONSTANTS
// =============================================================================

pub const CAMERA_ROLL_DOMAIN: &str = "CameraRollDomain";

/// Where the catalog lives inside the camera-roll domain
pub const CATALOG_RELATIVE_PATH: &str = "Media/PhotoData/Photos.sqlite";

/// Directory the fixture's media files are placed in
pub const DEFAULT_DIRECTORY: &str = "DCIM/100APPLE";

/// Size of generated media content
const MEDIA_SIZE: usize = 512;

/// `ZASSET` layouts seen across iOS versions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogVariant {
    /// `ZCREATIONDATE`, `ZTRASHEDSTATE`, `ZAVALANCHEUUID`, `ZISDETECTEDSCREENSHOT`,
    /// `ZADJUSTMENTSSTATE`
    Modern,
    /// `ZDATECREATED`, `ZTRASHED`, `ZBURSTIDENTIFIER`, no screenshot column
    Legacy,
    /// No creation-date column at all
    NoCreationDate,
}

impl CatalogVariant {
    fn create_sql(&self) -> &'static str {
        match self {
            CatalogVariant::Modern => {
                "CREATE TABLE ZASSET (Z_PK INTEGER PRIMARY KEY, ZFILENAME TEXT, ZDIRECTORY TEXT,
                    ZCREATIONDATE REAL, ZMODIFICATIONDATE REAL, ZHIDDEN INTEGER,
                    ZTRASHEDSTATE INTEGER, ZKINDSUBTYPE INTEGER, ZAVALANCHEUUID TEXT,
                    ZISDETECTEDSCREENSHOT INTEGER, ZADJUSTMENTSSTATE INTEGER);"
            }
            CatalogVariant::Legacy => {
                "CREATE TABLE ZASSET (Z_PK INTEGER PRIMARY KEY, ZFILENAME TEXT, ZDIRECTORY TEXT,
                    ZDATECREATED REAL, ZHIDDEN INTEGER, ZTRASHED INTEGER, ZKINDSUBTYPE INTEGER,
                    ZBURSTIDENTIFIER TEXT);"
            }
            CatalogVariant::NoCreationDate => {
                "CREATE TABLE ZASSET (Z_PK INTEGER PRIMARY KEY, ZFILENAME TEXT, ZDIRECTORY TEXT,
                    ZHIDDEN INTEGER);"
            }
        }
    }
}

/// One catalog row plus the bytes of its file
#[derive(Debug, Clone)]
pub struct FixtureAsset {
    pub pk: i64,
    pub filename: String,
    pub directory: String,
    pub created: DateTime<Utc>,
    pub hidden: bool,
    pub trashed: bool,
    pub kind_subtype: i64,
    pub burst_id: Option<String>,
    pub screenshot: bool,
    /// Write the media file into the backup
    pub with_file: bool,
}

impl FixtureAsset {
    pub fn new(pk: i64, filename: &str, created: DateTime<Utc>) -> Self {
        Self {
            pk,
            filename: filename.to_string(),
            directory: DEFAULT_DIRECTORY.to_string(),
            created,
            hidden: false,
            trashed: false,
            kind_subtype: 0,
            burst_id: None,
            screenshot: false,
            with_file: true,
        }
    }

    pub fn screenshot(mut self) -> Self {
        self.screenshot = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn trashed(mut self) -> Self {
        self.trashed = true;
        self
    }

    pub fn live_photo(mut self) -> Self {
        self.kind_subtype = 2;
        self
    }

    pub fn burst(mut self, id: &str) -> Self {
        self.burst_id = Some(id.to_string());
        self
    }

    pub fn without_file(mut self) -> Self {
        self.with_file = false;
        self
    }

    /// `Media/<directory>/<filename>` under the camera-roll domain
    pub fn relative_path(&self) -> String {
        format!("Media/{}/{}", self.directory.trim_matches('/'), self.filename)
    }
}

/// Seconds since 2001-01-01 UTC
pub fn core_data_seconds(date: DateTime<Utc>) -> f64 {
    (date.timestamp() - CORE_DATA_EPOCH_OFFSET) as f64
}

/// File id the way iOS derives it
pub fn file_id(domain: &str, relative_path: &str) -> String {
    sha1_hex(format!("{}-{}", domain, relative_path).as_bytes())
}

/// Media bytes with a plausible header for the extension
pub fn media_bytes(filename: &str, seed: u64) -> Vec<u8> {
    let ext = filename
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_lowercase();
    let mut data: Vec<u8> = match ext.as_str() {
        "jpg" | "jpeg" => vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00],
        "png" => vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A],
        "heic" => {
            let mut v = vec![0x00, 0x00, 0x00, 0x18];
            v.extend_from_slice(b"ftypheic");
            v
        }
        "mov" => {
            let mut v = vec![0x00, 0x00, 0x00, 0x14];
            v.extend_from_slice(b"ftypqt  ");
            v
        }
        "mp4" => {
            let mut v = vec![0x00, 0x00, 0x00, 0x18];
            v.extend_from_slice(b"ftypmp42");
            v
        }
        _ => Vec::new(),
    };

    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
    while data.len() < MEDIA_SIZE {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        data.push((state >> 33) as u8);
    }
    data
}

/// Builds a [`BackupFixture`]
#[derive(Debug, Clone)]
pub struct BackupFixtureBuilder {
    variant: CatalogVariant,
    assets: Vec<FixtureAsset>,
    device_name: Option<String>,
    encrypted: bool,
    with_catalog: bool,
    /// Extra `(domain, relativePath)` regular files
    extra_files: Vec<(String, String)>,
}

impl Default for BackupFixtureBuilder {
    fn default() -> Self {
        Self {
            variant: CatalogVariant::Modern,
            assets: Vec::new(),
            device_name: Some("Test iPhone".to_string()),
            encrypted: false,
            with_catalog: true,
            extra_files: Vec::new(),
        }
    }
}

impl BackupFixtureBuilder {
    pub fn variant(mut self, variant: CatalogVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn asset(mut self, asset: FixtureAsset) -> Self {
        self.assets.push(asset);
        self
    }

    pub fn assets(mut self, assets: impl IntoIterator<Item = FixtureAsset>) -> Self {
        self.assets.extend(assets);
        self
    }

    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }

    pub fn without_catalog(mut self) -> Self {
        self.with_catalog = false;
        self
    }

    pub fn extra_file(mut self, domain: &str, relative_path: &str) -> Self {
        self.extra_files
            .push((domain.to_string(), relative_path.to_string()));
        self
    }

    pub fn build(self) -> BackupFixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();

        write_manifest_plist(&root, self.encrypted);
        write_info_plist(&root, self.device_name.as_deref());

        let conn = Connection::open(root.join(MANIFEST_DB)).unwrap();
        conn.execute_batch(
            "CREATE TABLE Files (fileID TEXT PRIMARY KEY, domain TEXT, relativePath TEXT,
                flags INTEGER, file BLOB);
             CREATE TABLE Properties (key TEXT PRIMARY KEY, value BLOB);",
        )
        .unwrap();

        let insert = |domain: &str, rel: &str, flags: i64| -> String {
            let id = file_id(domain, rel);
            conn.execute(
                "INSERT INTO Files VALUES (?1, ?2, ?3, ?4, NULL)",
                params![id, domain, rel, flags],
            )
            .unwrap();
            id
        };

        insert(CAMERA_ROLL_DOMAIN, "Media", 2);
        insert(CAMERA_ROLL_DOMAIN, "Media/DCIM", 2);

        for (seed, asset) in self.assets.iter().enumerate() {
            if !asset.with_file {
                continue;
            }
            let id = insert(CAMERA_ROLL_DOMAIN, &asset.relative_path(), 1);
            write_hashed(&root, &id, &media_bytes(&asset.filename, seed as u64));
        }

        for (seed, (domain, rel)) in self.extra_files.iter().enumerate() {
            let id = insert(domain, rel, 1);
            write_hashed(&root, &id, &media_bytes(rel, 1000 + seed as u64));
        }

        if self.with_catalog {
            let id = insert(CAMERA_ROLL_DOMAIN, CATALOG_RELATIVE_PATH, 1);
            // journal files must never be picked as the catalog
            insert(
                CAMERA_ROLL_DOMAIN,
                &format!("{}-wal", CATALOG_RELATIVE_PATH),
                1,
            );
            let catalog = hashed_path(&root, &id);
            fs::create_dir_all(catalog.parent().unwrap()).unwrap();
            write_catalog(&catalog, self.variant, &self.assets);

            let wal_id = file_id(CAMERA_ROLL_DOMAIN, &format!("{}-wal", CATALOG_RELATIVE_PATH));
            write_hashed(&root, &wal_id, b"");
        }

        BackupFixture {
            dir,
            root,
            assets: self.assets,
        }
    }
}

fn write_hashed(root: &Path, id: &str, content: &[u8]) {
    let path = hashed_path(root, id);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn write_manifest_plist(root: &Path, encrypted: bool) {
    let flag = if encrypted { "<true/>" } else { "<false/>" };
    let text = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
	<key>IsEncrypted</key>
	{}
	<key>Version</key>
	<string>10.0</string>
	<key>WasPasscodeSet</key>
	<true/>
</dict>
</plist>
"#,
        flag
    );
    fs::write(root.join(MANIFEST_PLIST), text).unwrap();
}

fn write_info_plist(root: &Path, device_name: Option<&str>) {
    let Some(name) = device_name else {
        return;
    };
    let text = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
	<key>Device Name</key>
	<string>{}</string>
	<key>Last Backup Date</key>
	<date>2024-04-20T08:30:00Z</date>
	<key>Product Type</key>
	<string>iPhone15,2</string>
	<key>Product Version</key>
	<string>17.4.1</string>
	<key>Serial Number</key>
	<string>F2LXK0000000</string>
</dict>
</plist>
"#,
        name
    );
    fs::write(root.join("Info.plist"), text).unwrap();
}

fn write_catalog(path: &Path, variant: CatalogVariant, assets: &[FixtureAsset]) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(variant.create_sql()).unwrap();

    for asset in assets {
        let created = core_data_seconds(asset.created);
        match variant {
            CatalogVariant::Modern => {
                conn.execute(
                    "INSERT INTO ZASSET VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?6, ?7, ?8, ?9, 0)",
                    params![
                        asset.pk,
                        asset.filename,
                        asset.directory,
                        created,
                        asset.hidden as i64,
                        asset.trashed as i64,
                        asset.kind_subtype,
                        asset.burst_id,
                        asset.screenshot as i64
                    ],
                )
                .unwrap();
            }
            CatalogVariant::Legacy => {
                conn.execute(
                    "INSERT INTO ZASSET VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        asset.pk,
                        asset.filename,
                        asset.directory,
                        created,
                        asset.hidden as i64,
                        asset.trashed as i64,
                        asset.kind_subtype,
                        asset.burst_id
                    ],
                )
                .unwrap();
            }
            CatalogVariant::NoCreationDate => {
                conn.execute(
                    "INSERT INTO ZASSET VALUES (?1, ?2, ?3, ?4)",
                    params![asset.pk, asset.filename, asset.directory, asset.hidden as i64],
                )
                .unwrap();
            }
        }
    }
}

/// A hashed backup on disk, removed on drop
pub struct BackupFixture {
    dir: TempDir,
    root: PathBuf,
    assets: Vec<FixtureAsset>,
}

impl BackupFixture {
    pub fn builder() -> BackupFixtureBuilder {
        BackupFixtureBuilder::default()
    }

    /// Three assets: a photo and a video on 2024-04-15, a screenshot on 2024-04-16
    pub fn standard() -> Self {
        Self::builder().assets(standard_assets()).build()
    }

    /// `count` photos on consecutive minutes of 2024-04-15
    pub fn with_photos(count: usize) -> Self {
        let assets = (0..count).map(|i| {
            let created = Utc.with_ymd_and_hms(2024, 4, 15, 8, 0, 0).unwrap()
                + chrono::Duration::minutes(i as i64);
            FixtureAsset::new(i as i64 + 1, &format!("IMG_{:04}.JPG", i + 1), created)
        });
        Self::builder().assets(assets).build()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The temporary directory holding the backup
    pub fn temp_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn assets(&self) -> &[FixtureAsset] {
        &self.assets
    }

    /// Hashed path of a fixture asset's media file
    pub fn media_path(&self, filename: &str) -> Option<PathBuf> {
        self.assets
            .iter()
            .find(|a| a.filename == filename)
            .map(|a| hashed_path(&self.root, &file_id(CAMERA_ROLL_DOMAIN, &a.relative_path())))
    }

    /// Delete an asset's hashed file, keeping its index and catalog rows
    pub fn remove_media_file(&self, filename: &str) {
        if let Some(path) = self.media_path(filename) {
            fs::remove_file(path).unwrap();
        }
    }

    /// Rewrite `Manifest.plist` with `IsEncrypted` set
    pub fn mark_encrypted(&self) {
        write_manifest_plist(&self.root, true);
    }
}

/// Rows of the standard fixture
pub fn standard_assets() -> Vec<FixtureAsset> {
    vec![
        FixtureAsset::new(1, "IMG_001.HEIC", Utc.with_ymd_and_hms(2024, 4, 15, 10, 0, 0).unwrap()),
        FixtureAsset::new(2, "IMG_002.MOV", Utc.with_ymd_and_hms(2024, 4, 15, 11, 0, 0).unwrap()),
        FixtureAsset::new(3, "IMG_003.PNG", Utc.with_ymd_and_hms(2024, 4, 16, 9, 30, 0).unwrap())
            .screenshot(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{is_encrypted, is_photo_catalog, ManifestIndex};

    #[test]
    fn test_standard_fixture_is_a_backup() {
        let fixture = BackupFixture::standard();
        assert!(crate::backup::locator::is_backup_root(fixture.root()));
        assert!(!is_encrypted(fixture.root()).unwrap());

        let index = ManifestIndex::open(fixture.root()).unwrap();
        let catalog = index.find_photo_database().unwrap();
        assert_eq!(catalog.relative_path, CATALOG_RELATIVE_PATH);
        assert!(is_photo_catalog(&index.hashed_path(&catalog.file_id)));
        assert!(fixture.media_path("IMG_001.HEIC").unwrap().is_file());
    }

    #[test]
    fn test_media_bytes_have_headers() {
        assert_eq!(&media_bytes("a.jpg", 1)[..3], &[0xFF, 0xD8, 0xFF]);
        assert_eq!(&media_bytes("a.HEIC", 1)[4..12], b"ftypheic");
        assert_eq!(media_bytes("a.bin", 1).len(), MEDIA_SIZE);
        assert_ne!(media_bytes("a.jpg", 1), media_bytes("a.jpg", 2));
    }

    #[test]
    fn test_file_id_is_sha1_of_domain_path() {
        let id = file_id("CameraRollDomain", "Media/DCIM/100APPLE/IMG_0001.JPG");
        assert_eq!(id.len(), 40);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
