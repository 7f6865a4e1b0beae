// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Built-in filesystem module.

use crate::module::{
    ActionContext, ActionDecl, ModuleError, ModuleHandler, ModuleManifest, ParamKind, ParamSpec,
    PermissionClass,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;

/// Local file operations: `read_file`, `write_file`, `list_dir`, `delete_file`.
#[derive(Debug, Clone, Default)]
pub struct FilesystemModule;

impl FilesystemModule {
    pub const MODULE_ID: &'static str = "filesystem";

    pub fn new() -> Self {
        Self
    }

    fn path_param(params: &Value) -> Result<PathBuf, ModuleError> {
        params["path"]
            .as_str()
            .map(PathBuf::from)
            .ok_or_else(|| ModuleError::InvalidParams("missing path".to_string()))
    }
}

#[async_trait]
impl ModuleHandler for FilesystemModule {
    fn manifest(&self) -> ModuleManifest {
        ModuleManifest {
            module_id: Self::MODULE_ID.to_string(),
            version: "1.0.0".to_string(),
            platform_support: vec!["linux".into(), "macos".into(), "windows".into()],
            actions: vec![
                ActionDecl {
                    name: "read_file".to_string(),
                    description: "Read a UTF-8 file".to_string(),
                    params: vec![ParamSpec::required("path", ParamKind::String)],
                    permission_class: PermissionClass::Read,
                },
                ActionDecl {
                    name: "write_file".to_string(),
                    description: "Write a UTF-8 file, creating parents".to_string(),
                    params: vec![
                        ParamSpec::required("path", ParamKind::String),
                        ParamSpec::required("content", ParamKind::String),
                    ],
                    permission_class: PermissionClass::Write,
                },
                ActionDecl {
                    name: "list_dir".to_string(),
                    description: "List directory entries".to_string(),
                    params: vec![ParamSpec::required("path", ParamKind::String)],
                    permission_class: PermissionClass::Read,
                },
                ActionDecl {
                    name: "delete_file".to_string(),
                    description: "Delete a file".to_string(),
                    params: vec![ParamSpec::required("path", ParamKind::String)],
                    permission_class: PermissionClass::Write,
                },
            ],
        }
    }

    async fn handle(
        &self,
        action: &str,
        params: Value,
        ctx: &ActionContext,
    ) -> Result<Value, ModuleError> {
        if ctx.cancel.is_cancelled() {
            return Err(ModuleError::Cancelled);
        }
        let path = Self::path_param(&params)?;
        match action {
            "read_file" => {
                let content = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| ModuleError::Failed(format!("read {}: {e}", path.display())))?;
                Ok(json!({"output": content, "bytes": content.len()}))
            }
            "write_file" => {
                let content = params["content"].as_str().unwrap_or_default();
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        ModuleError::Failed(format!("mkdir {}: {e}", parent.display()))
                    })?;
                }
                tokio::fs::write(&path, content)
                    .await
                    .map_err(|e| ModuleError::Failed(format!("write {}: {e}", path.display())))?;
                Ok(json!({"output": format!("wrote {}", path.display()), "bytes": content.len()}))
            }
            "list_dir" => {
                let mut entries = Vec::new();
                let mut dir = tokio::fs::read_dir(&path)
                    .await
                    .map_err(|e| ModuleError::Failed(format!("list {}: {e}", path.display())))?;
                while let Ok(Some(entry)) = dir.next_entry().await {
                    entries.push(entry.file_name().to_string_lossy().into_owned());
                }
                entries.sort();
                let count = entries.len();
                Ok(json!({"output": entries, "count": count}))
            }
            "delete_file" => {
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| ModuleError::Failed(format!("delete {}: {e}", path.display())))?;
                Ok(json!({"output": format!("deleted {}", path.display())}))
            }
            other => Err(ModuleError::UnknownAction {
                module: Self::MODULE_ID.to_string(),
                action: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
#[path = "fs_module_tests.rs"]
mod tests;
