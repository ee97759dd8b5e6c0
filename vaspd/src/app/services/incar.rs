// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! INCAR patching: typed tag -> value patches applied as line rewrites.
//!
//! Each patched tag replaces every line that sets it; a tag with no such line is appended.

use serde_json::Value;

use crate::app::types::{PatchSet, PatchValue};

/// Returns `incar` with every tag in `patch` applied.
pub fn apply_patch(incar: &str, patch: &PatchSet) -> String {
    let mut lines: Vec<String> = incar.lines().map(str::to_string).collect();
    for (tag, value) in patch.iter() {
        let rendered = format!("{tag} = {value}");
        let mut replaced = false;
        for line in lines.iter_mut() {
            if line_sets_tag(line, tag) {
                *line = rendered.clone();
                replaced = true;
            }
        }
        if !replaced {
            lines.push(rendered);
        }
    }
    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

/// True when `line` starts with `tag` (after indentation) followed by whitespace, `=` or nothing.
pub fn line_sets_tag(line: &str, tag: &str) -> bool {
    let Some(rest) = line.trim_start().strip_prefix(tag) else {
        return false;
    };
    match rest.chars().next() {
        None => true,
        Some(c) => c == '=' || c.is_whitespace(),
    }
}

/// Converts an advisor JSON object into a patch set. Non-objects yield `None`.
/// Arrays become space-separated lists (e.g. MAGMOM); nulls and nested objects are dropped.
pub fn patch_from_json(value: &Value) -> Option<PatchSet> {
    let object = value.as_object()?;
    let mut patch = PatchSet::new();
    for (tag, raw) in object {
        let tag = tag.trim();
        if tag.is_empty() {
            continue;
        }
        match json_to_patch_value(raw) {
            Some(value) => patch.insert(tag.to_ascii_uppercase(), value),
            None => log::debug!("dropping unsupported value for INCAR tag {tag}: {raw}"),
        }
    }
    Some(patch)
}

fn json_to_patch_value(raw: &Value) -> Option<PatchValue> {
    match raw {
        Value::String(text) => Some(PatchValue::Text(text.trim().to_string())),
        Value::Bool(flag) => Some(PatchValue::Bool(*flag)),
        Value::Number(number) => match number.as_i64() {
            Some(int) => Some(PatchValue::Integer(int)),
            None => number.as_f64().map(PatchValue::Float),
        },
        Value::Array(items) => {
            let parts: Option<Vec<String>> = items
                .iter()
                .map(|item| match json_to_patch_value(item)? {
                    PatchValue::Text(text) => Some(text),
                    other => Some(other.to_string()),
                })
                .collect();
            parts.map(|parts| PatchValue::Text(parts.join(" ")))
        }
        Value::Null | Value::Object(_) => None,
    }
}
