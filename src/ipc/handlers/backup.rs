use crate::backup;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::core::open_workspace;
use crate::ipc::helpers::{required_str, scoped};
use crate::ipc::types::{AppState, Request};
use log::{info, warn};
use serde_json::json;
use std::path::PathBuf;

/// Resolves the caller, requiring an admin and an open workspace.
fn admin_workspace(state: &AppState, req: &Request) -> Result<PathBuf, serde_json::Value> {
    let scope = scoped(state, req)
        .map(|(_, s)| s)
        .map_err(|e| err(&req.id, e.code(), e.to_string(), None))?;
    scope
        .require_admin()
        .map_err(|e| err(&req.id, e.code(), e.to_string(), None))?;
    state
        .workspace
        .clone()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn handle_backup_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace_path = match admin_workspace(state, req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let out_path = match required_str(&req.params, "outPath") {
        Ok(p) => p,
        Err(e) => return err(&req.id, e.code(), e.to_string(), None),
    };

    let export = match backup::export_workspace_bundle(&workspace_path, &PathBuf::from(&out_path)) {
        Ok(v) => v,
        Err(e) => {
            warn!("event=backup_export module=backup status=error error={e:#}");
            return err(
                &req.id,
                "io_error",
                format!("{e:#}"),
                Some(json!({ "path": out_path })),
            );
        }
    };
    info!(
        "event=backup_export module=backup status=ok path={} entries={}",
        out_path, export.entry_count
    );

    ok(
        &req.id,
        json!({
            "path": out_path,
            "bundleFormat": export.bundle_format,
            "entryCount": export.entry_count,
            "dbSha256": export.db_sha256,
        }),
    )
}

fn handle_backup_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace_path = match admin_workspace(state, req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let in_path = match required_str(&req.params, "inPath") {
        Ok(p) => p,
        Err(e) => return err(&req.id, e.code(), e.to_string(), None),
    };
    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path })),
        );
    }

    // The scheduler and the open handle must be gone before the file is swapped.
    state.close_workspace();

    let import = backup::import_workspace_bundle(&src, &workspace_path);
    let reopened = open_workspace(state, &workspace_path);
    let import = match import {
        Ok(v) => v,
        Err(e) => {
            warn!("event=backup_import module=backup status=error error={e:#}");
            return err(
                &req.id,
                "import_failed",
                format!("{e:#}"),
                Some(json!({ "path": in_path })),
            );
        }
    };
    info!(
        "event=backup_import module=backup status=ok format={} config_restored={}",
        import.bundle_format_detected, import.config_restored
    );

    match reopened {
        Ok(workspace) => ok(
            &req.id,
            json!({
                "workspace": workspace,
                "bundleFormatDetected": import.bundle_format_detected,
                "dbSha256": import.db_sha256,
                "configRestored": import.config_restored,
            }),
        ),
        Err((code, message)) => err(&req.id, code, message, None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.export" => Some(handle_backup_export(state, req)),
        "backup.import" => Some(handle_backup_import(state, req)),
        _ => None,
    }
}
