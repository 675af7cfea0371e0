//! Closure "affected areas" normalization.
//!
//! Closures arrive with the affected resources encoded several ways:
//! `entire_facility`, `all_bays`, a single `bay_<n>` token, a comma list of
//! tokens and bare ids, or a JSON array literal. Everything funnels through
//! [`normalize_affected_areas`] into a concrete id set. Unparseable input
//! yields an empty set: a malformed closure blocks nothing rather than
//! everything.

use std::collections::BTreeSet;

use crate::model::{AffectedAreas, Resource, ResourceId, ResourceKind};

const ENTIRE_FACILITY: &str = "entire_facility";
const ALL_BAYS: &str = "all_bays";
const BAY_PREFIX: &str = "bay_";

pub fn normalize_affected_areas(raw: &AffectedAreas, resources: &[Resource]) -> BTreeSet<ResourceId> {
    let raw = raw.as_str().trim();
    if raw.is_empty() {
        return BTreeSet::new();
    }
    if raw.starts_with('[') {
        return parse_json_list(raw);
    }
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .flat_map(|token| expand_token(token, resources))
        .collect()
}

fn expand_token(token: &str, resources: &[Resource]) -> Vec<ResourceId> {
    match token {
        ENTIRE_FACILITY => resources.iter().map(|r| r.id).collect(),
        ALL_BAYS => resources
            .iter()
            .filter(|r| r.kind == ResourceKind::SimulatorBay)
            .map(|r| r.id)
            .collect(),
        other => parse_id(other).into_iter().collect(),
    }
}

/// `bay_3` or `3`.
fn parse_id(token: &str) -> Option<ResourceId> {
    token
        .strip_prefix(BAY_PREFIX)
        .unwrap_or(token)
        .trim()
        .parse()
        .ok()
}

fn parse_json_list(raw: &str) -> BTreeSet<ResourceId> {
    let Ok(serde_json::Value::Array(items)) = serde_json::from_str::<serde_json::Value>(raw) else {
        tracing::debug!(raw, "unparseable closure area list; treating as no resources");
        return BTreeSet::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => parse_id(s.trim()),
            _ => None,
        })
        .collect()
}
