//! End-to-end runs against fixture backups and the in-memory sync tool
//!
//! These tests drive the real pipeline (locator, index, catalog, planner,
//! engine, audit writer) with no external binary and no network.

use super::fixtures::{core_data_seconds, BackupFixture, CatalogVariant, FixtureAsset};
use super::mock_sync::MockSyncTool;
use crate::assets::AssetType;
use crate::core::audit::{AuditTrail, Invocation, RunOutcome};
use crate::core::cancel::CancellationToken;
use crate::core::config::SyncOptions;
use crate::core::error::PhotosError;
use crate::core::extractor::{extract_backup, ExtractOptions};
use crate::core::pipeline::{run_list, run_sync, run_validate, ListRequest, SyncRequest};
use crate::planner::{EntryStatus, PlanAction};
use crate::upload::engine::NoopObserver;
use chrono::{TimeZone, Utc};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

// =============================================================================
// HELPERS
// =============================================================================

fn sync_request(backup: &Path, remote: &str, options: SyncOptions, audit: &Path) -> SyncRequest {
    SyncRequest {
        backup_path: backup.to_path_buf(),
        remote: remote.to_string(),
        options: options.clone(),
        save_manifest: None,
        audit_dir: Some(audit.join("gh-photos")),
        audit_copy: None,
        invocation: Invocation {
            command: "sync".to_string(),
            args: vec![backup.display().to_string(), remote.to_string()],
            flags: options.non_default_flags(),
        },
    }
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[test]
fn test_extract_then_list() {
    let fixture = BackupFixture::standard();
    let out = TempDir::new().unwrap();
    let cancel = CancellationToken::new();

    let extraction = extract_backup(
        fixture.root(),
        out.path(),
        &ExtractOptions::default(),
        &mut |_, _| {},
        &cancel,
    )
    .unwrap();
    assert_eq!(extraction.assets, 3);

    let report = run_list(
        &ListRequest {
            backup_path: out.path().to_path_buf(),
            options: SyncOptions::default(),
        },
        &cancel,
    )
    .unwrap();

    let listed: Vec<(AssetType, String)> = report
        .assets
        .iter()
        .map(|a| (a.asset_type, a.target_path.clone().unwrap()))
        .collect();
    assert_eq!(
        listed,
        vec![
            (AssetType::Photo, "2024/04/15/photos/IMG_001.HEIC".to_string()),
            (AssetType::Video, "2024/04/15/videos/IMG_002.MOV".to_string()),
            (AssetType::Screenshot, "2024/04/16/screenshots/IMG_003.PNG".to_string()),
        ]
    );
    assert!(report.assets.iter().all(|a| a.source_path.is_file()));
    assert_eq!(report.device.device_name.as_deref(), Some("Test iPhone"));
}

#[test]
fn test_list_hashed_backup_directly() {
    let fixture = BackupFixture::standard();
    let report = run_list(
        &ListRequest {
            backup_path: fixture.root().to_path_buf(),
            options: SyncOptions::default(),
        },
        &CancellationToken::new(),
    )
    .unwrap();

    assert_eq!(report.assets.len(), 3);
    assert_eq!(report.by_type.get(&AssetType::Screenshot), Some(&1));
    assert!(report.assets.iter().all(|a| a.file_size > 0));
}

#[test]
fn test_encrypted_backup_rejected() {
    let fixture = BackupFixture::builder().encrypted().build();
    let err = run_validate(fixture.root(), &CancellationToken::new()).unwrap_err();
    assert!(matches!(err, PhotosError::EncryptedBackup(_)));
    assert!(err
        .to_string()
        .to_lowercase()
        .contains("encrypted backups are not supported"));
}

#[test]
fn test_sync_prescan_skips_existing() {
    let fixture = BackupFixture::with_photos(5);
    let audit = TempDir::new().unwrap();
    let tool = MockSyncTool::new(&["gdrive"]);
    tool.seed_remote("photos/2024/04/15/photos/IMG_0002.JPG");
    tool.seed_remote("photos/2024/04/15/photos/IMG_0004.JPG");

    let options = SyncOptions {
        remote_prescan: true,
        ..SyncOptions::default()
    };
    let request = sync_request(fixture.root(), "gdrive:photos", options, audit.path());
    let outcome = run_sync(&request, &tool, &mut NoopObserver, &CancellationToken::new());

    assert!(outcome.is_success(), "{:?}", outcome.result);
    let manifest = outcome.manifest.as_ref().unwrap();
    assert_eq!(manifest.summary.to_upload, 3);
    assert_eq!(manifest.summary.to_skip, 2);
    assert_eq!(
        manifest
            .entries
            .iter()
            .filter(|e| e.action == PlanAction::Skip)
            .count(),
        2
    );
    assert_eq!(tool.copy_calls(), 1);
    assert_eq!(outcome.audit.summary.uploaded, 3);
    assert_eq!(outcome.audit.summary.skipped, 2);
}

#[test]
fn test_sync_batch_failure() {
    let fixture = BackupFixture::with_photos(104);
    let audit = TempDir::new().unwrap();
    let tool = MockSyncTool::new(&["gdrive"]);
    tool.fail_uploads_matching("IMG_0104.JPG");

    let request = sync_request(fixture.root(), "gdrive:", SyncOptions::default(), audit.path());
    let outcome = run_sync(&request, &tool, &mut NoopObserver, &CancellationToken::new());

    match &outcome.result {
        Err(PhotosError::UploadBatchFailed {
            failed_batches,
            failed_entries,
            ..
        }) => {
            assert_eq!(*failed_batches, 1);
            assert_eq!(*failed_entries, 4);
        }
        other => panic!("expected batch failure, got {:?}", other),
    }

    let manifest = outcome.manifest.as_ref().unwrap();
    let failed: Vec<_> = manifest
        .entries
        .iter()
        .filter(|e| e.status == EntryStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 4);
    let message = failed[0].error.clone().unwrap();
    assert!(failed.iter().all(|e| e.error.as_deref() == Some(message.as_str())));
    assert_eq!(manifest.summary.uploaded, 100);
    assert_eq!(outcome.audit.outcome, RunOutcome::Failed);
}

#[test]
fn test_sync_cancelled_mid_run() {
    let fixture = BackupFixture::with_photos(250);
    let audit = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let tool = MockSyncTool::new(&["gdrive"]);
    tool.cancel_after_uploads(1, cancel.clone());

    let request = sync_request(fixture.root(), "gdrive:", SyncOptions::default(), audit.path());
    let outcome = run_sync(&request, &tool, &mut NoopObserver, &cancel);

    assert!(outcome.is_cancelled());
    let manifest = outcome.manifest.as_ref().unwrap();
    assert_eq!(manifest.summary.uploaded, 100);
    assert_eq!(manifest.summary.pending, 150);
    assert_eq!(manifest.summary.failed, 0);

    let paths = outcome.audit_paths.as_ref().unwrap();
    let written = AuditTrail::load(&paths.latest).unwrap();
    assert_eq!(written.outcome, RunOutcome::Cancelled);
    assert_eq!(written.summary.pending, 150);
}

#[test]
fn test_schema_fallback_columns() {
    let fixture = BackupFixture::builder()
        .variant(CatalogVariant::Legacy)
        .asset(FixtureAsset::new(
            1,
            "IMG_0001.JPG",
            Utc.with_ymd_and_hms(2001, 1, 2, 0, 0, 0).unwrap(),
        ))
        .build();
    assert_eq!(core_data_seconds(fixture.assets()[0].created), 86400.0);

    let validate = run_validate(fixture.root(), &CancellationToken::new()).unwrap();
    let column = |field: &str| {
        validate
            .catalog_columns
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, c)| c.clone())
            .unwrap()
    };
    assert_eq!(column("creation_date"), "ZDATECREATED");
    assert_eq!(column("trashed"), "ZTRASHED");
    assert_eq!(column("burst_id"), "ZBURSTIDENTIFIER");
    assert_eq!(column("is_screenshot"), "0");

    let report = run_list(
        &ListRequest {
            backup_path: fixture.root().to_path_buf(),
            options: SyncOptions::default(),
        },
        &CancellationToken::new(),
    )
    .unwrap();
    assert_eq!(
        report.assets[0].creation_date,
        Utc.with_ymd_and_hms(2001, 1, 2, 0, 0, 0).unwrap()
    );
}

#[test]
fn test_catalog_without_creation_column() {
    let fixture = BackupFixture::builder()
        .variant(CatalogVariant::NoCreationDate)
        .asset(FixtureAsset::new(
            1,
            "IMG_0001.JPG",
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ))
        .build();
    let err = run_validate(fixture.root(), &CancellationToken::new()).unwrap_err();
    assert!(matches!(err, PhotosError::CatalogSchema(_)));
    assert!(err.to_string().contains("creation date"));
}

// =============================================================================
// PROPERTIES
// =============================================================================

#[test]
fn test_sync_twice_is_idempotent() {
    let fixture = BackupFixture::standard();
    let audit = TempDir::new().unwrap();
    let tool = MockSyncTool::new(&["gdrive"]);
    let request = sync_request(fixture.root(), "gdrive:backup", SyncOptions::default(), audit.path());

    let first = run_sync(&request, &tool, &mut NoopObserver, &CancellationToken::new());
    assert!(first.is_success());
    let second = run_sync(&request, &tool, &mut NoopObserver, &CancellationToken::new());
    assert!(second.is_success());

    assert_eq!(tool.remote_files().len(), 3);
    assert_eq!(tool.writes(), 3);
    assert!(tool.remote_contains("backup/2024/04/16/screenshots/IMG_003.PNG"));
}

#[test]
fn test_audit_files_persisted() {
    let fixture = BackupFixture::standard();
    let audit = TempDir::new().unwrap();
    let tool = MockSyncTool::new(&["gdrive"]);
    let request = sync_request(fixture.root(), "gdrive:", SyncOptions::default(), audit.path());

    let outcome = run_sync(&request, &tool, &mut NoopObserver, &CancellationToken::new());
    let paths = outcome.audit_paths.unwrap();
    assert_eq!(paths.latest, audit.path().join("gh-photos").join("manifest.json"));

    let historical: Vec<_> = fs::read_dir(audit.path().join("gh-photos"))
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with("manifest_"))
        .collect();
    assert_eq!(historical.len(), 1);

    let latest = AuditTrail::load(&paths.latest).unwrap();
    let stamped = AuditTrail::load(&historical[0].path()).unwrap();
    assert_eq!(latest, stamped);
    assert_eq!(latest.summary.uploaded, 3);
    assert_eq!(latest.device.unwrap().product_type.as_deref(), Some("iPhone15,2"));
}

#[test]
fn test_dry_run_touches_nothing() {
    let fixture = BackupFixture::standard();
    let audit = TempDir::new().unwrap();
    let tool = MockSyncTool::new(&["gdrive"]);
    let options = SyncOptions {
        dry_run: true,
        ..SyncOptions::default()
    };
    let request = sync_request(fixture.root(), "gdrive:", options, audit.path());

    let outcome = run_sync(&request, &tool, &mut NoopObserver, &CancellationToken::new());
    assert!(outcome.is_success());
    assert!(tool.calls().is_empty());
    assert_eq!(outcome.report.unwrap().would_upload, 3);
    assert_eq!(outcome.audit.summary.pending, 3);
}

#[test]
fn test_unknown_remote_fails_before_upload() {
    let fixture = BackupFixture::standard();
    let audit = TempDir::new().unwrap();
    let tool = MockSyncTool::new(&["gdrive"]);
    let request = sync_request(fixture.root(), "dropbox:", SyncOptions::default(), audit.path());

    let outcome = run_sync(&request, &tool, &mut NoopObserver, &CancellationToken::new());
    assert!(matches!(outcome.result, Err(PhotosError::RemoteUnknown(_))));
    assert!(outcome.manifest.is_none());
    assert_eq!(tool.copy_calls(), 0);
    assert!(outcome.audit_paths.is_some());
}

#[test]
fn test_hidden_and_trashed_excluded_by_default() {
    let day = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let fixture = BackupFixture::builder()
        .asset(FixtureAsset::new(1, "IMG_0001.JPG", day))
        .asset(FixtureAsset::new(2, "IMG_0002.JPG", day).hidden())
        .asset(FixtureAsset::new(3, "IMG_0003.JPG", day).trashed())
        .asset(FixtureAsset::new(4, "IMG_0004.HEIC", day).live_photo())
        .asset(FixtureAsset::new(5, "IMG_0005.JPG", day).burst("B1"))
        .asset(FixtureAsset::new(6, "IMG_0006.JPG", day).without_file())
        .build();

    let report = run_list(
        &ListRequest {
            backup_path: fixture.root().to_path_buf(),
            options: SyncOptions::default(),
        },
        &CancellationToken::new(),
    )
    .unwrap();

    assert_eq!(report.filter.excluded_hidden, 1);
    assert_eq!(report.filter.excluded_recently_deleted, 1);
    assert_eq!(report.dropped_missing, 1);
    assert_eq!(report.assets.len(), 3);
    assert_eq!(report.by_type.get(&AssetType::LivePhoto), Some(&1));
    assert_eq!(report.by_type.get(&AssetType::Burst), Some(&1));
}

#[test]
fn test_sync_verify_hashed_backup() {
    let fixture = BackupFixture::with_photos(3);
    let audit = TempDir::new().unwrap();
    let tool = MockSyncTool::new(&["gdrive"]);
    tool.fail_check_for("IMG_0003.JPG");

    let options = SyncOptions {
        verify: true,
        ..SyncOptions::default()
    };
    let request = sync_request(fixture.root(), "gdrive:photos", options, audit.path());
    let outcome = run_sync(&request, &tool, &mut NoopObserver, &CancellationToken::new());

    let manifest = outcome.manifest.as_ref().unwrap();
    for entry in &manifest.entries {
        // hashed sources are named by file id, never by the remote filename
        assert_ne!(
            entry.source_path.file_name().unwrap().to_string_lossy(),
            entry.filename
        );
        let expected = if entry.filename == "IMG_0003.JPG" {
            EntryStatus::Failed
        } else {
            EntryStatus::Verified
        };
        assert_eq!(entry.status, expected, "{}: {:?}", entry.target_path, entry.error);
    }
    assert_eq!(manifest.summary.verified, 2);
    assert_eq!(manifest.summary.failed, 1);
    assert!(outcome.is_success(), "{:?}", outcome.result);
}

#[test]
fn test_sync_verify_extracted_tree() {
    let fixture = BackupFixture::standard();
    let out = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    extract_backup(
        fixture.root(),
        out.path(),
        &ExtractOptions::default(),
        &mut |_, _| {},
        &cancel,
    )
    .unwrap();

    let audit = TempDir::new().unwrap();
    let tool = MockSyncTool::new(&["gdrive"]);
    let options = SyncOptions {
        verify: true,
        ..SyncOptions::default()
    };
    let request = sync_request(out.path(), "gdrive:", options, audit.path());
    let outcome = run_sync(&request, &tool, &mut NoopObserver, &cancel);

    assert!(outcome.is_success(), "{:?}", outcome.result);
    let manifest = outcome.manifest.as_ref().unwrap();
    assert_eq!(manifest.entries.len(), 3);
    assert!(manifest
        .entries
        .iter()
        .all(|e| e.status == EntryStatus::Verified));
    assert!(tool.remote_contains("2024/04/16/screenshots/IMG_003.PNG"));
}
