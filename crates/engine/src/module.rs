// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Module registry and dispatch.
//!
//! A module is a named collection of action handlers behind one uniform
//! signature. Dispatch goes through declarative param validation, so
//! handlers can assume well-typed input. Handlers may do async work but
//! must honour the cancellation token in [`ActionContext`].

use async_trait::async_trait;
use iml_core::SessionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Declared type of one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl ParamKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Object => value.is_object(),
            ParamKind::Array => value.is_array(),
            ParamKind::Any => true,
        }
    }
}

/// Declarative spec for one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, kind: ParamKind) -> Self {
        Self { name: name.into(), kind, required: true, default: None }
    }

    pub fn optional(name: impl Into<String>, kind: ParamKind) -> Self {
        Self { name: name.into(), kind, required: false, default: None }
    }

    pub fn with_default(name: impl Into<String>, kind: ParamKind, default: Value) -> Self {
        Self { name: name.into(), kind, required: false, default: Some(default) }
    }
}

/// Capability class a module declares per action; the permission guard
/// profiles key off these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionClass {
    Read,
    Write,
    Execute,
    Network,
}

/// One action a module exposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDecl {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    pub permission_class: PermissionClass,
}

/// Capability manifest a module publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub module_id: String,
    pub version: String,
    #[serde(default)]
    pub platform_support: Vec<String>,
    pub actions: Vec<ActionDecl>,
}

impl ModuleManifest {
    pub fn action(&self, name: &str) -> Option<&ActionDecl> {
        self.actions.iter().find(|a| a.name == name)
    }
}

/// Module-side failures surfaced to the executor.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("unknown module {0:?}")]
    UnknownModule(String),
    #[error("module {module:?} has no action {action:?}")]
    UnknownAction { module: String, action: String },
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}

/// Per-dispatch context handed to handlers.
#[derive(Clone)]
pub struct ActionContext {
    pub cancel: CancellationToken,
    pub session_id: Option<SessionId>,
}

impl ActionContext {
    pub fn detached() -> Self {
        Self { cancel: CancellationToken::new(), session_id: None }
    }
}

/// A module implementation: one manifest, one handler entrypoint.
#[async_trait]
pub trait ModuleHandler: Send + Sync {
    fn manifest(&self) -> ModuleManifest;

    async fn handle(
        &self,
        action: &str,
        params: Value,
        ctx: &ActionContext,
    ) -> Result<Value, ModuleError>;
}

/// Dispatch table keyed by `(module_id, action)`.
pub struct ModuleRegistry {
    modules: HashMap<String, Arc<dyn ModuleHandler>>,
    manifests: HashMap<String, ModuleManifest>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self { modules: HashMap::new(), manifests: HashMap::new() }
    }

    /// Register a module under its manifest id. Last registration wins.
    pub fn register(&mut self, handler: Arc<dyn ModuleHandler>) {
        let manifest = handler.manifest();
        let id = manifest.module_id.clone();
        tracing::info!(module = %id, actions = manifest.actions.len(), "module registered");
        self.manifests.insert(id.clone(), manifest);
        self.modules.insert(id, handler);
    }

    pub fn manifests(&self) -> Vec<&ModuleManifest> {
        let mut out: Vec<&ModuleManifest> = self.manifests.values().collect();
        out.sort_by(|a, b| a.module_id.cmp(&b.module_id));
        out
    }

    pub fn manifest(&self, module_id: &str) -> Option<&ModuleManifest> {
        self.manifests.get(module_id)
    }

    pub fn action_schema(&self, module_id: &str, action: &str) -> Option<&ActionDecl> {
        self.manifests.get(module_id)?.action(action)
    }

    /// Validate params against the declared spec, applying defaults.
    fn coerce_params(decl: &ActionDecl, params: Value) -> Result<Value, ModuleError> {
        let mut map = match params {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(ModuleError::InvalidParams(format!(
                    "params must be an object, got {other}"
                )))
            }
        };

        for spec in &decl.params {
            match map.get(&spec.name) {
                Some(value) => {
                    if !spec.kind.accepts(value) {
                        return Err(ModuleError::InvalidParams(format!(
                            "param {:?} must be a {:?}",
                            spec.name, spec.kind
                        )));
                    }
                }
                None => {
                    if let Some(default) = &spec.default {
                        map.insert(spec.name.clone(), default.clone());
                    } else if spec.required {
                        return Err(ModuleError::InvalidParams(format!(
                            "missing required param {:?}",
                            spec.name
                        )));
                    }
                }
            }
        }

        Ok(Value::Object(map))
    }

    /// Dispatch by `(module_id, action)` with typed params.
    pub async fn dispatch(
        &self,
        module_id: &str,
        action: &str,
        params: Value,
        ctx: &ActionContext,
    ) -> Result<Value, ModuleError> {
        let handler = self
            .modules
            .get(module_id)
            .ok_or_else(|| ModuleError::UnknownModule(module_id.to_string()))?;
        let decl = self
            .manifests
            .get(module_id)
            .and_then(|m| m.action(action))
            .ok_or_else(|| ModuleError::UnknownAction {
                module: module_id.to_string(),
                action: action.to_string(),
            })?;

        let params = Self::coerce_params(decl, params)?;
        handler.handle(action, params, ctx).await
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "module_tests.rs"]
mod tests;
