use serde_json::{Map, Value};

/// A server-side entity as returned by the API. Only a handful of fields are
/// inspected; everything else is round-tripped untouched.
pub type MetadataObject = Map<String, Value>;

pub const ATTRIBUTE_VALUES: &str = "attributeValues";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeValue {
    pub value: String,
    pub attribute: AttributeRef,
}

impl AttributeValue {
    pub fn new(attribute_uid: &str, value: &str) -> Self {
        Self {
            value: value.to_string(),
            attribute: AttributeRef {
                id: attribute_uid.to_string(),
            },
        }
    }

    fn to_json(&self) -> Value {
        serde_json::json!({
            "value": self.value,
            "attribute": { "id": self.attribute.id },
        })
    }
}

/// Attribute id of a raw `attributeValues` entry, if it has one.
pub fn attribute_id(entry: &Value) -> Option<&str> {
    entry.get("attribute")?.get("id")?.as_str()
}

/// Return a copy of `obj` whose `attributeValues` hold exactly one entry for
/// `attribute_uid` (set to `new_value`). Entries for other attributes keep
/// their order and any extra fields; the updated entry goes last.
pub fn merge_attribute_value(
    obj: &MetadataObject,
    attribute_uid: &str,
    new_value: &str,
) -> MetadataObject {
    let mut updated = obj.clone();
    let mut entries = obj
        .get(ATTRIBUTE_VALUES)
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter(|entry| attribute_id(entry) != Some(attribute_uid))
                .cloned()
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    entries.push(AttributeValue::new(attribute_uid, new_value).to_json());
    updated.insert(ATTRIBUTE_VALUES.to_string(), Value::Array(entries));
    updated
}
