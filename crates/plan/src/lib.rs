// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! iml-plan: parsing, structural validation, and template resolution for
//! IML v2 plans.
//!
//! The parser coerces raw JSON into the [`iml_core::Plan`] shape and rejects
//! schema-level problems. The validator enforces the structural invariants a
//! well-formed plan must satisfy (acyclic dependencies, resolvable template
//! references, compiler-trace evidence). The resolver late-binds template
//! sigils immediately before each action dispatch.

mod parse;
mod template;
mod validate;

pub use parse::{parse_plan, parse_plan_json, SchemaError};
pub use template::{
    lookup_path, resolve_params, MemoryReader, NoMemory, ResolveInputs, TemplateError,
    TEMPLATE_PATTERN,
};
pub use validate::{validate, ValidationError, Violation};
