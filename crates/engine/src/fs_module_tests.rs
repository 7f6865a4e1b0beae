// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::module::ModuleHandler;
use serde_json::json;

#[tokio::test]
async fn read_and_write_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hello.txt");
    let module = FilesystemModule::new();
    let ctx = ActionContext::detached();

    module
        .handle("write_file", json!({"path": path, "content": "hi"}), &ctx)
        .await
        .unwrap();
    let out = module.handle("read_file", json!({"path": path}), &ctx).await.unwrap();
    assert_eq!(out["output"], "hi");
    assert_eq!(out["bytes"], 2);
}

#[tokio::test]
async fn write_creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a/b/c.txt");
    let module = FilesystemModule::new();

    module
        .handle("write_file", json!({"path": path, "content": "x"}), &ActionContext::detached())
        .await
        .unwrap();
    assert!(path.exists());
}

#[tokio::test]
async fn read_missing_file_fails() {
    let module = FilesystemModule::new();
    let err = module
        .handle("read_file", json!({"path": "/definitely/not/here"}), &ActionContext::detached())
        .await
        .unwrap_err();
    assert!(matches!(err, ModuleError::Failed(_)));
}

#[tokio::test]
async fn list_dir_sorts_entries() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("b.txt"), "").unwrap();
    std::fs::write(dir.path().join("a.txt"), "").unwrap();
    let module = FilesystemModule::new();

    let out = module
        .handle("list_dir", json!({"path": dir.path()}), &ActionContext::detached())
        .await
        .unwrap();
    assert_eq!(out["output"], json!(["a.txt", "b.txt"]));
    assert_eq!(out["count"], 2);
}

#[tokio::test]
async fn delete_file_removes_it() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gone.txt");
    std::fs::write(&path, "x").unwrap();
    let module = FilesystemModule::new();

    module.handle("delete_file", json!({"path": path}), &ActionContext::detached()).await.unwrap();
    assert!(!path.exists());
}

#[tokio::test]
async fn cancelled_context_short_circuits() {
    let ctx = ActionContext::detached();
    ctx.cancel.cancel();
    let err = FilesystemModule::new()
        .handle("read_file", json!({"path": "/tmp/x"}), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, ModuleError::Cancelled));
}
