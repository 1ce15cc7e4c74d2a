use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::entity::EntityId;

/// Serialized field values of one entity, keyed by field name
pub type PropertyBag = Map<String, JsonValue>;

/// One entity whose stored version no longer matches the one it was loaded with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictEntry {
    pub entity_type: String,
    pub entity_id: EntityId,
    /// Values as loaded
    pub original: PropertyBag,
    /// Values as the caller left them
    pub current: PropertyBag,
    /// Values in storage now; `None` when another writer deleted the row
    pub stored: Option<PropertyBag>,
}

impl ConflictEntry {
    /// Field-level merge where the stored value wins only for untouched fields
    ///
    /// For every stored field that another writer changed (stored differs
    /// from original) and the caller did not (current equals original),
    /// current takes the stored value. Original then becomes the stored
    /// snapshot so the next save sees a matching version.
    #[must_use]
    pub fn merge(mut self) -> Self {
        let Some(stored) = self.stored.as_ref() else {
            return self;
        };

        for (key, stored_value) in stored {
            let original = self.original.get(key);
            if original != Some(stored_value) && self.current.get(key) == original {
                self.current.insert(key.clone(), stored_value.clone());
            }
        }
        self.original = stored.clone();
        self
    }

    /// Field names whose current value differs from the original
    pub fn touched_fields(&self) -> Vec<&str> {
        self.current
            .iter()
            .filter(|(key, value)| self.original.get(key.as_str()) != Some(value))
            .map(|(key, _)| key.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bag(value: JsonValue) -> PropertyBag {
        match value {
            JsonValue::Object(map) => map,
            _ => PropertyBag::new(),
        }
    }

    #[test]
    fn test_merge_takes_stored_value_for_untouched_fields() {
        let entry = ConflictEntry {
            entity_type: "Device".into(),
            entity_id: 1,
            original: bag(json!({"name": "a", "temperature": 1.0, "version": "v1"})),
            current: bag(json!({"name": "mine", "temperature": 1.0, "version": "v1"})),
            stored: Some(bag(json!({"name": "theirs", "temperature": 9.0, "version": "v2"}))),
        };

        let merged = entry.merge();
        assert_eq!(merged.current["name"], json!("mine"));
        assert_eq!(merged.current["temperature"], json!(9.0));
        assert_eq!(merged.current["version"], json!("v2"));
        assert_eq!(merged.original["name"], json!("theirs"));
        assert_eq!(merged.touched_fields(), vec!["name"]);
    }

    #[test]
    fn test_merge_without_stored_row_is_unchanged() {
        let entry = ConflictEntry {
            entity_type: "Device".into(),
            entity_id: 1,
            original: bag(json!({"name": "a"})),
            current: bag(json!({"name": "b"})),
            stored: None,
        };
        assert_eq!(entry.clone().merge(), entry);
    }
}
