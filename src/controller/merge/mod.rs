//! Field-selective merge of required objects into live objects
//!
//! Every `ensure_*` function compares a required object with an existing one,
//! rewrites `existing` in place and sets `*modified = true` whenever a field changed.
//! `modified` is only ever OR-ed, so callers can thread one flag through a whole
//! object tree. No I/O happens here.
//!
//! Field rules:
//! - optional scalars are set-if-set: `None` in required leaves existing alone
//! - maps are merged key by key, required wins, existing-only keys stay
//! - named lists marked exhaustive (containers, ports, volumes, mounts) are
//!   recomputed: required entries are upserted by name, the rest are dropped
//! - composite fields (security contexts, selectors, certificates) are replaced
//!   as a whole when required sets them

mod config;
mod meta;
mod objects;
mod pod;

use std::collections::BTreeMap;

pub use config::MergeFrom;
pub use meta::ensure_object_meta;
pub use objects::{
    ensure_cluster_role_binding, ensure_config_map, ensure_custom_resource_definition,
    ensure_daemon_set, ensure_deployment, ensure_namespace, ensure_secret, ensure_service,
    ensure_service_account, DEFAULT_SECRET_TYPE,
};
pub use pod::{ensure_container, ensure_pod_spec, ensure_pod_template_spec};

/// Overwrite a bare string when required is non-empty
pub fn set_string_if_set(modified: &mut bool, existing: &mut String, required: &str) {
    if !required.is_empty() && existing != required {
        *existing = required.to_string();
        *modified = true;
    }
}

/// Overwrite a bare integer when required is non-zero
pub fn set_i32_if_set(modified: &mut bool, existing: &mut i32, required: i32) {
    if required != 0 && *existing != required {
        *existing = required;
        *modified = true;
    }
}

/// Overwrite an optional field (scalar or whole composite) when required sets it
pub fn set_if_set<T>(modified: &mut bool, existing: &mut Option<T>, required: &Option<T>)
where
    T: Clone + PartialEq,
{
    if let Some(required) = required {
        if existing.as_ref() != Some(required) {
            *existing = Some(required.clone());
            *modified = true;
        }
    }
}

/// Replace a non-optional composite when it differs and required is not empty
pub fn replace_if_set<T>(modified: &mut bool, existing: &mut T, required: &T)
where
    T: Clone + PartialEq + Default,
{
    if *required != T::default() && existing != required {
        *existing = required.clone();
        *modified = true;
    }
}

/// Key-wise union of two maps, required wins
pub fn merge_map<V>(
    modified: &mut bool,
    existing: &mut Option<BTreeMap<String, V>>,
    required: &Option<BTreeMap<String, V>>,
) where
    V: Clone + PartialEq,
{
    let Some(required) = required else {
        return;
    };
    if required.is_empty() {
        return;
    }

    let existing = existing.get_or_insert_with(BTreeMap::new);
    for (key, value) in required {
        if existing.get(key) != Some(value) {
            existing.insert(key.clone(), value.clone());
            *modified = true;
        }
    }
}

/// Recompute an exhaustive named list
///
/// Entries whose name is absent from `required` are removed, matched entries are
/// merged with `upsert`, missing required entries are appended in required order.
pub fn merge_named<T, N>(
    modified: &mut bool,
    existing: &mut Vec<T>,
    required: &[T],
    name: impl Fn(&T) -> N,
    upsert: impl Fn(&mut bool, &mut T, &T),
) where
    T: Clone,
    N: PartialEq,
{
    let before = existing.len();
    existing.retain(|e| required.iter().any(|r| name(r) == name(e)));
    if existing.len() != before {
        *modified = true;
    }

    for required in required {
        match existing.iter_mut().find(|e| name(e) == name(required)) {
            Some(existing) => upsert(modified, existing, required),
            None => {
                existing.push(required.clone());
                *modified = true;
            }
        }
    }
}

/// [`merge_named`] over optional lists; an unset required list counts as empty
pub fn merge_named_opt<T, N>(
    modified: &mut bool,
    existing: &mut Option<Vec<T>>,
    required: &Option<Vec<T>>,
    name: impl Fn(&T) -> N,
    upsert: impl Fn(&mut bool, &mut T, &T),
) where
    T: Clone,
    N: PartialEq,
{
    let required = required.as_deref().unwrap_or_default();
    if existing.is_none() && required.is_empty() {
        return;
    }
    merge_named(
        modified,
        existing.get_or_insert_with(Vec::new),
        required,
        name,
        upsert,
    );
}

/// Upsert that replaces the whole entry when it differs
pub fn replace_entry<T: Clone + PartialEq>(modified: &mut bool, existing: &mut T, required: &T) {
    if existing != required {
        *existing = required.clone();
        *modified = true;
    }
}
