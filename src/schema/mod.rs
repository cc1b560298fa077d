//! Record schema validation.
//!
//! A collection schema lists the fields a record value may carry, their JSON
//! type, and which of them are required. Values must be JSON objects. Fields
//! not named by the schema are accepted as-is.

use crate::error::{PearError, PearResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Validates record values before they are stored.
pub trait RecordValidator: Send + Sync {
    fn validate(&self, collection: &str, value: &Value) -> PearResult<()>;
}

/// JSON type a schema field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl FieldType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
            FieldType::Any => true,
        }
    }
}

/// Field definition for one field in a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
}

/// Schema for every record of one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub collection: String,
    #[serde(default)]
    pub fields: HashMap<String, FieldDefinition>,
}

impl CollectionSchema {
    pub fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, field_type: FieldType, required: bool) -> Self {
        self.fields.insert(
            name.to_string(),
            FieldDefinition {
                field_type,
                required,
            },
        );
        self
    }

    pub fn check(&self, value: &Value) -> PearResult<()> {
        let object = value.as_object().ok_or_else(|| {
            PearError::ValidationFailed(format!(
                "{} record value must be a JSON object",
                self.collection
            ))
        })?;
        let mut names: Vec<&String> = self.fields.keys().collect();
        names.sort();
        for name in names {
            let definition = &self.fields[name];
            match object.get(name.as_str()) {
                None | Some(Value::Null) if definition.required => {
                    return Err(PearError::ValidationFailed(format!(
                        "{}: missing required field '{}'",
                        self.collection, name
                    )));
                }
                Some(field) if !field.is_null() && !definition.field_type.accepts(field) => {
                    return Err(PearError::ValidationFailed(format!(
                        "{}: field '{}' must be {:?}",
                        self.collection, name, definition.field_type
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Validator over a fixed set of collection schemas. Validating a record of a
/// collection with no registered schema fails.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, CollectionSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_schemas(schemas: impl IntoIterator<Item = CollectionSchema>) -> Self {
        let mut registry = Self::new();
        for schema in schemas {
            registry.register(schema);
        }
        registry
    }

    pub fn register(&mut self, schema: CollectionSchema) {
        self.schemas.insert(schema.collection.clone(), schema);
    }

    pub fn get(&self, collection: &str) -> Option<&CollectionSchema> {
        self.schemas.get(collection)
    }
}

impl RecordValidator for SchemaRegistry {
    fn validate(&self, collection: &str, value: &Value) -> PearResult<()> {
        match self.schemas.get(collection) {
            Some(schema) => schema.check(value),
            None => Err(PearError::ValidationFailed(format!(
                "no schema registered for collection '{}'",
                collection
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::from_schemas([CollectionSchema::new("app.posts")
            .with_field("text", FieldType::String, true)
            .with_field("likes", FieldType::Integer, false)])
    }

    #[test]
    fn accepts_conforming_values() {
        let registry = registry();
        assert!(registry
            .validate("app.posts", &json!({"text": "hi", "likes": 3, "extra": true}))
            .is_ok());
        assert!(registry.validate("app.posts", &json!({"text": "hi"})).is_ok());
    }

    #[test]
    fn rejects_missing_and_mistyped_fields() {
        let registry = registry();
        assert!(matches!(
            registry.validate("app.posts", &json!({"likes": 1})),
            Err(PearError::ValidationFailed(_))
        ));
        assert!(matches!(
            registry.validate("app.posts", &json!({"text": 5})),
            Err(PearError::ValidationFailed(_))
        ));
        assert!(matches!(
            registry.validate("app.posts", &json!("text")),
            Err(PearError::ValidationFailed(_))
        ));
    }

    #[test]
    fn unknown_collection_fails_validation() {
        assert!(matches!(
            registry().validate("app.other", &json!({})),
            Err(PearError::ValidationFailed(_))
        ));
    }

    #[test]
    fn schema_parses_from_json() {
        let schema: CollectionSchema = serde_json::from_value(json!({
            "collection": "app.notes",
            "fields": {"body": {"type": "string", "required": true}}
        }))
        .unwrap();
        assert_eq!(schema.fields["body"].field_type, FieldType::String);
        assert!(schema.fields["body"].required);
    }
}
