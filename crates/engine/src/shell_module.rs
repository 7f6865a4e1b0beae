// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Built-in shell module.

use crate::module::{
    ActionContext, ActionDecl, ModuleError, ModuleHandler, ModuleManifest, ParamKind, ParamSpec,
    PermissionClass,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;

/// Ceiling on a single shell invocation.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Runs commands through `bash -c` with kill-on-cancel semantics.
#[derive(Debug, Clone, Default)]
pub struct ShellModule;

impl ShellModule {
    pub const MODULE_ID: &'static str = "shell";

    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ModuleHandler for ShellModule {
    fn manifest(&self) -> ModuleManifest {
        ModuleManifest {
            module_id: Self::MODULE_ID.to_string(),
            version: "1.0.0".to_string(),
            platform_support: vec!["linux".into(), "macos".into()],
            actions: vec![ActionDecl {
                name: "run".to_string(),
                description: "Run a shell command and capture its output".to_string(),
                params: vec![
                    ParamSpec::required("command", ParamKind::String),
                    ParamSpec::optional("cwd", ParamKind::String),
                    ParamSpec::optional("env", ParamKind::Object),
                ],
                permission_class: PermissionClass::Execute,
            }],
        }
    }

    async fn handle(
        &self,
        action: &str,
        params: Value,
        ctx: &ActionContext,
    ) -> Result<Value, ModuleError> {
        if action != "run" {
            return Err(ModuleError::UnknownAction {
                module: Self::MODULE_ID.to_string(),
                action: action.to_string(),
            });
        }
        let command = params["command"].as_str().unwrap_or_default().to_string();

        let wrapped = format!("set -euo pipefail\n{command}");
        let mut cmd = tokio::process::Command::new("bash");
        cmd.arg("-c").arg(&wrapped).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(cwd) = params["cwd"].as_str() {
            cmd.current_dir(cwd);
        }
        if let Some(env) = params["env"].as_object() {
            for (key, value) in env {
                if let Some(v) = value.as_str() {
                    cmd.env(key, v);
                }
            }
        }
        cmd.kill_on_drop(true);

        let child =
            cmd.spawn().map_err(|e| ModuleError::Failed(format!("spawn bash: {e}")))?;

        let output = tokio::select! {
            result = child.wait_with_output() => {
                result.map_err(|e| ModuleError::Failed(format!("wait: {e}")))?
            }
            _ = ctx.cancel.cancelled() => {
                // kill_on_drop reaps the child when the future is dropped.
                return Err(ModuleError::Cancelled);
            }
            _ = tokio::time::sleep(COMMAND_TIMEOUT) => {
                return Err(ModuleError::Failed(format!(
                    "command timed out after {}s", COMMAND_TIMEOUT.as_secs()
                )));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            tracing::warn!(%command, exit_code, %stderr, "shell command failed");
            return Err(ModuleError::Failed(format!(
                "exit code {exit_code}: {}",
                stderr.trim()
            )));
        }

        Ok(json!({"output": stdout, "stderr": stderr, "exit_code": exit_code}))
    }
}

#[cfg(test)]
#[path = "shell_module_tests.rs"]
mod tests;
