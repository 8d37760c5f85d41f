#[path = "../src/backup.rs"]
mod backup;
mod test_support;

use serde_json::json;
use std::fs::File;
use std::io::{Read, Write};
use test_support::{str_field, temp_dir, Session};
use zip::write::FileOptions;

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = temp_dir("schoold-backup-src");
    let workspace2 = temp_dir("schoold-backup-dst");
    let out_dir = temp_dir("schoold-backup-out");

    let bytes = b"sqlite-test-payload";
    std::fs::write(workspace.join("school.sqlite3"), bytes).expect("write source db");
    std::fs::write(workspace.join("schoold.json"), r#"{ "reminders": { "enabled": false } }"#)
        .expect("write config");

    let bundle_path = out_dir.join("workspace.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT);
    assert_eq!(export.entry_count, 4);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    let manifest: serde_json::Value = serde_json::from_str(&manifest).expect("manifest json");
    assert_eq!(manifest["format"], json!(backup::BUNDLE_FORMAT));
    assert_eq!(manifest["dbSha256"], json!(export.db_sha256));
    archive
        .by_name("db/school.sqlite3")
        .expect("database entry in bundle");

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT);
    assert_eq!(import.db_sha256, export.db_sha256);
    assert!(import.config_restored);

    let restored = std::fs::read(workspace2.join("school.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);
    assert!(workspace2.join("schoold.json").is_file());

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn tampered_database_is_rejected() {
    let workspace = temp_dir("schoold-backup-tamper");
    let bundle_path = workspace.join("tampered.zip");
    {
        let f = File::create(&bundle_path).expect("create bundle");
        let mut zip = zip::ZipWriter::new(f);
        let opts = FileOptions::default();
        zip.start_file("manifest.json", opts).expect("manifest");
        zip.write_all(
            json!({ "format": backup::BUNDLE_FORMAT, "dbSha256": "00".repeat(32) })
                .to_string()
                .as_bytes(),
        )
        .expect("write manifest");
        zip.start_file("db/school.sqlite3", opts).expect("db entry");
        zip.write_all(b"not the original").expect("write db");
        zip.finish().expect("finish");
    }
    std::fs::write(workspace.join("school.sqlite3"), b"keep me").expect("existing db");

    let err = backup::import_workspace_bundle(&bundle_path, &workspace).expect_err("must fail");
    assert!(format!("{err:#}").contains("checksum mismatch"));
    assert_eq!(
        std::fs::read(workspace.join("school.sqlite3")).expect("db"),
        b"keep me"
    );
    assert!(!workspace.join("school.sqlite3.importing").exists());

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn bare_sqlite_file_is_accepted() {
    let src_dir = temp_dir("schoold-backup-bare-src");
    let dst_dir = temp_dir("schoold-backup-bare-dst");
    let raw = src_dir.join("copy.sqlite3");
    let mut payload = b"SQLite format 3\0".to_vec();
    payload.extend_from_slice(&[0u8; 64]);
    std::fs::write(&raw, &payload).expect("write raw");

    let import = backup::import_workspace_bundle(&raw, &dst_dir).expect("import raw");
    assert_eq!(import.bundle_format_detected, "sqlite3");
    assert!(!import.config_restored);
    assert_eq!(std::fs::read(dst_dir.join("school.sqlite3")).expect("db"), payload);

    let _ = std::fs::remove_dir_all(src_dir);
    let _ = std::fs::remove_dir_all(dst_dir);
}

#[test]
fn ipc_backup_restores_previous_state() {
    let mut s = Session::open("schoold-backup-ipc");
    s.ok(
        "years.create",
        json!({ "name": "2025-26", "startDate": "2025-04-01", "endDate": "2026-03-31", "isActive": true }),
    );
    let bundle = temp_dir("schoold-backup-ipc-out").join("ws.zip");
    let exported = s.ok("backup.export", json!({ "outPath": bundle.to_string_lossy() }));
    assert_eq!(exported["bundleFormat"], json!(backup::BUNDLE_FORMAT));

    s.ok(
        "years.create",
        json!({ "name": "2026-27", "startDate": "2026-04-01", "endDate": "2027-03-31" }),
    );
    let imported = s.ok("backup.import", json!({ "inPath": bundle.to_string_lossy() }));
    assert_eq!(imported["dbSha256"], exported["dbSha256"]);

    let years = s.ok("years.list", json!({}));
    let names: Vec<_> = years["years"]
        .as_array()
        .expect("years")
        .iter()
        .map(|y| str_field(y, "/name"))
        .collect();
    assert_eq!(names, vec!["2025-26".to_string()]);

    assert_eq!(
        s.err_as(
            json!({ "userId": "t", "roles": ["Teacher"] }),
            "backup.export",
            json!({ "outPath": bundle.to_string_lossy() })
        ),
        "forbidden"
    );
    if let Some(dir) = bundle.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
    s.close();
}
