//! Semantic equality between the current and desired object.
//!
//! Bookkeeping written by the store (resourceVersion, managedFields,
//! generation) and the status block are ignored, and `null`, `{}` and `[]`
//! are treated as absent, so two objects that serialize differently but
//! mean the same thing compare equal.

use serde::Serialize;
use serde_json::Value;

const IGNORED_METADATA: [&str; 3] = ["resourceVersion", "managedFields", "generation"];

/// True when no observable field differs. Objects that cannot be
/// serialized never compare equal, so the write path surfaces the error.
pub fn semantically_equal<K: Serialize>(current: &K, desired: &K) -> bool {
    match (serde_json::to_value(current), serde_json::to_value(desired)) {
        (Ok(current), Ok(desired)) => normalize(current) == normalize(desired),
        _ => false,
    }
}

fn normalize(mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        map.remove("status");
        if let Some(Value::Object(metadata)) = map.get_mut("metadata") {
            for key in IGNORED_METADATA {
                metadata.remove(key);
            }
        }
    }
    prune(value).unwrap_or(Value::Null)
}

fn prune(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let pruned: serde_json::Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| prune(v).map(|v| (k, v)))
                .collect();
            (!pruned.is_empty()).then_some(Value::Object(pruned))
        }
        Value::Array(items) => {
            let pruned: Vec<Value> = items
                .into_iter()
                .map(|v| prune(v).unwrap_or(Value::Null))
                .collect();
            (!pruned.is_empty()).then_some(Value::Array(pruned))
        }
        other => Some(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn cm(version: &str, labels: Option<BTreeMap<String, String>>) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("cloud-config".to_string()),
                resource_version: Some(version.to_string()),
                labels,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_resource_version_is_ignored() {
        assert!(semantically_equal(&cm("1", None), &cm("7", None)));
    }

    #[test]
    fn test_empty_map_equals_absent() {
        assert!(semantically_equal(&cm("1", None), &cm("1", Some(BTreeMap::new()))));
    }

    #[test]
    fn test_label_change_is_detected() {
        let labels = BTreeMap::from([("app".to_string(), "etcd".to_string())]);
        assert!(!semantically_equal(&cm("1", None), &cm("1", Some(labels))));
    }
}
