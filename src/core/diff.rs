//! Structural document diffing
//!
//! The patch chain only depends on the [`DiffEngine`] contract:
//! `apply(new, diff(new, old)) == old`. [`JsonPatchEngine`] satisfies it
//! with RFC 6902 JSON Patch.

use serde_json::Value;

/// Patch operations produced by a [`DiffEngine`]
pub type PatchOps = json_patch::Patch;

/// Computes and applies structural patches between documents
pub trait DiffEngine: Send + Sync {
    /// Patch that turns `from` into `to`
    fn diff(&self, from: &Value, to: &Value) -> PatchOps;

    /// Apply `ops` to a copy of `doc`
    fn apply(&self, doc: &Value, ops: &PatchOps) -> Result<Value, String>;
}

/// RFC 6902 JSON Patch engine
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPatchEngine;

impl DiffEngine for JsonPatchEngine {
    fn diff(&self, from: &Value, to: &Value) -> PatchOps {
        json_patch::diff(from, to)
    }

    fn apply(&self, doc: &Value, ops: &PatchOps) -> Result<Value, String> {
        let mut out = doc.clone();
        json_patch::patch(&mut out, &ops.0).map_err(|e| e.to_string())?;
        Ok(out)
    }
}
