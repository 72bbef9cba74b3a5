//! Object metadata merge

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use super::{merge_map, replace_entry, set_if_set};

/// Merge required metadata into existing metadata
///
/// Server-owned fields (uid, resourceVersion, generation, timestamps) are never
/// touched.
pub fn ensure_object_meta(modified: &mut bool, existing: &mut ObjectMeta, required: &ObjectMeta) {
    set_if_set(modified, &mut existing.name, &non_empty(&required.name));
    set_if_set(modified, &mut existing.namespace, &non_empty(&required.namespace));
    merge_map(modified, &mut existing.labels, &required.labels);
    merge_map(modified, &mut existing.annotations, &required.annotations);
    merge_owner_references(
        modified,
        &mut existing.owner_references,
        &required.owner_references,
    );
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.is_empty())
}

/// Upsert owner references by uid; references not named in required are kept
fn merge_owner_references(
    modified: &mut bool,
    existing: &mut Option<Vec<OwnerReference>>,
    required: &Option<Vec<OwnerReference>>,
) {
    let Some(required) = required.as_ref().filter(|r| !r.is_empty()) else {
        return;
    };

    let existing = existing.get_or_insert_with(Vec::new);
    for required in required {
        match existing.iter_mut().find(|e| e.uid == required.uid) {
            Some(existing) => replace_entry(modified, existing, required),
            None => {
                existing.push(required.clone());
                *modified = true;
            }
        }
    }
}
