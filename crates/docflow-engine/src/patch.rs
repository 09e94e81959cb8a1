//! Pointer resolution and atomic patch application.

use docflow_types::{JsonPatch, Node, PatchOp, pointer};

use crate::error::PatchError;

/// Result of a committed patch: deep clones of the touched subtree before and after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedPatch {
    pub op: PatchOp,
    /// Absolute, normalized path.
    pub path: String,
    pub before: Option<Node>,
    pub after: Option<Node>,
}

pub struct PatchEngine;

impl PatchEngine {
    /// Resolves a scope-relative pointer to an absolute, normalized one.
    pub fn resolve_pointer(scope: &str, raw: &str) -> Result<String, PatchError> {
        Ok(pointer::resolve(scope, raw)?)
    }

    pub fn document_contains(document: &Node, ptr: &str) -> bool {
        document.get(ptr).is_some()
    }

    /// Canonical size of the subtree a patch writes (ADD/REPLACE) or removes (REMOVE).
    ///
    /// Fails on the same conditions as [`PatchEngine::apply_patch`], without touching the document.
    pub fn snapshot_size(document: &Node, patch: &JsonPatch) -> Result<usize, PatchError> {
        patch.validate()?;
        let path = pointer::normalize(&patch.path)?;
        match (&patch.op, &patch.val) {
            (PatchOp::Remove, _) => {
                let target = document
                    .get(&path)
                    .ok_or_else(|| PatchError::MissingTarget(path.clone()))?;
                Ok(target.canonical_size()?)
            }
            (_, Some(val)) => {
                check_target(document, patch.op, &path)?;
                Ok(val.canonical_size()?)
            }
            (_, None) => Err(PatchError::MissingTarget(path)),
        }
    }

    /// Applies one patch with an absolute path. Validation happens before any mutation, so an
    /// error leaves `document` exactly as it was.
    pub fn apply_patch(document: &mut Node, patch: &JsonPatch) -> Result<AppliedPatch, PatchError> {
        patch.validate()?;
        let path = pointer::normalize(&patch.path)?;
        check_target(document, patch.op, &path)?;

        let Some((parent_path, last)) = pointer::split_last(&path)? else {
            let before = std::mem::take(document);
            let after = patch.val.clone().unwrap_or_default();
            *document = after.clone();
            return Ok(AppliedPatch {
                op: patch.op,
                path,
                before: Some(before),
                after: Some(after),
            });
        };
        let parent = document
            .get_mut(&parent_path)
            .ok_or_else(|| PatchError::MissingParent(path.clone()))?;

        let (before, after) = match patch.op {
            PatchOp::Add => {
                let val = patch.val.clone().unwrap_or_default();
                let before = insert_child(parent, &last, val.clone(), &path)?;
                (before, Some(val))
            }
            PatchOp::Replace => {
                let val = patch.val.clone().unwrap_or_default();
                let slot = parent
                    .child_mut(&last)
                    .ok_or_else(|| PatchError::MissingTarget(path.clone()))?;
                let before = std::mem::replace(slot, val.clone());
                (Some(before), Some(val))
            }
            PatchOp::Remove => (Some(remove_child(parent, &last, &path)?), None),
        };
        Ok(AppliedPatch {
            op: patch.op,
            path,
            before,
            after,
        })
    }
}

/// Existence checks: ADD needs the parent, REPLACE and REMOVE need the target.
fn check_target(document: &Node, op: PatchOp, path: &str) -> Result<(), PatchError> {
    match pointer::split_last(path)? {
        None if op == PatchOp::Remove => Err(PatchError::CannotRemoveRoot),
        None => Ok(()),
        Some((parent_path, last)) => {
            let parent = document
                .get(&parent_path)
                .ok_or_else(|| PatchError::MissingParent(path.to_string()))?;
            match op {
                PatchOp::Add => match &parent.items {
                    Some(_) if last == "-" => Ok(()),
                    Some(items) => match last.parse::<usize>() {
                        Ok(index) if index <= items.len() => Ok(()),
                        Ok(_) => Err(PatchError::InvalidIndex(path.to_string())),
                        Err(_) => Ok(()),
                    },
                    None => Ok(()),
                },
                PatchOp::Replace | PatchOp::Remove => parent
                    .child(&last)
                    .map(|_| ())
                    .ok_or_else(|| PatchError::MissingTarget(path.to_string())),
            }
        }
    }
}

fn insert_child(
    parent: &mut Node,
    segment: &str,
    val: Node,
    path: &str,
) -> Result<Option<Node>, PatchError> {
    if let Some(items) = parent.items.as_mut() {
        if segment == "-" {
            items.push(val);
            return Ok(None);
        }
        if let Ok(index) = segment.parse::<usize>() {
            if index > items.len() {
                return Err(PatchError::InvalidIndex(path.to_string()));
            }
            items.insert(index, val);
            return Ok(None);
        }
    }
    Ok(parent.set_property(segment, val))
}

fn remove_child(parent: &mut Node, segment: &str, path: &str) -> Result<Node, PatchError> {
    if let Some(items) = parent.items.as_mut() {
        if let Ok(index) = segment.parse::<usize>() {
            if index >= items.len() {
                return Err(PatchError::InvalidIndex(path.to_string()));
            }
            return Ok(items.remove(index));
        }
    }
    parent
        .remove_property(segment)
        .ok_or_else(|| PatchError::MissingTarget(path.to_string()))
}
