//! Property schema types and payload validation

use crate::core::error::{FieldValidationError, ValidationError};
use chrono::DateTime;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Primitive type of a model property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Number,
    Boolean,
    Date,
    Object,
    Array,
    Any,
}

impl PropertyType {
    /// Check whether a (non-null) JSON value conforms to this type
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            PropertyType::String => value.is_string(),
            PropertyType::Number => value.is_number(),
            PropertyType::Boolean => value.is_boolean(),
            PropertyType::Date => match value {
                Value::String(s) => DateTime::parse_from_rfc3339(s).is_ok(),
                Value::Number(_) => true,
                _ => false,
            },
            PropertyType::Object => value.is_object(),
            PropertyType::Array => value.is_array(),
            PropertyType::Any => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::String => "string",
            PropertyType::Number => "number",
            PropertyType::Boolean => "boolean",
            PropertyType::Date => "date",
            PropertyType::Object => "object",
            PropertyType::Array => "array",
            PropertyType::Any => "any",
        }
    }
}

/// String formats checked on top of the property type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldFormat {
    Email,
}

impl FieldFormat {
    /// Validate a value against this format; non-strings never match
    pub fn validate(&self, value: &Value) -> bool {
        let Some(s) = value.as_str() else {
            return false;
        };

        match self {
            FieldFormat::Email => Self::is_valid_email(s),
        }
    }

    fn is_valid_email(email: &str) -> bool {
        static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = EMAIL_REGEX.get_or_init(|| {
            Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap()
        });
        regex.is_match(email)
    }
}

/// Definition of a single property
///
/// In YAML a property can be written either as a bare type (`name: string`)
/// or as a map (`name: { type: string, required: true }`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "PropertyDefRepr")]
pub struct PropertyDef {
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<FieldFormat>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PropertyDefRepr {
    Short(PropertyType),
    Full {
        #[serde(rename = "type")]
        property_type: PropertyType,
        #[serde(default)]
        required: bool,
        #[serde(default)]
        format: Option<FieldFormat>,
    },
}

impl From<PropertyDefRepr> for PropertyDef {
    fn from(repr: PropertyDefRepr) -> Self {
        match repr {
            PropertyDefRepr::Short(property_type) => PropertyDef::optional(property_type),
            PropertyDefRepr::Full {
                property_type,
                required,
                format,
            } => PropertyDef {
                property_type,
                required,
                format,
            },
        }
    }
}

impl PropertyDef {
    pub fn optional(property_type: PropertyType) -> Self {
        Self {
            property_type,
            required: false,
            format: None,
        }
    }

    pub fn required(property_type: PropertyType) -> Self {
        Self {
            property_type,
            required: true,
            format: None,
        }
    }

    pub fn with_format(mut self, format: FieldFormat) -> Self {
        self.format = Some(format);
        self
    }
}

/// Ordered property schema of a model
pub type PropertySchema = IndexMap<String, PropertyDef>;

/// Whether a payload is a full create or a partial update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Create,
    Update,
}

/// Check a payload against a schema
///
/// On create every required property must be present and non-null. On
/// update only the supplied properties are checked, but a required property
/// may not be set to null. Properties that are not declared are accepted.
pub fn validate_fields(
    schema: &PropertySchema,
    fields: &Map<String, Value>,
    mode: ValidationMode,
) -> Result<(), ValidationError> {
    let mut errors = Vec::new();

    for (name, def) in schema {
        match fields.get(name) {
            None if def.required && mode == ValidationMode::Create => {
                errors.push(FieldValidationError::new(name, "is required"));
            }
            None => {}
            Some(Value::Null) if def.required => {
                errors.push(FieldValidationError::new(name, "can't be blank"));
            }
            Some(Value::Null) => {}
            Some(value) => {
                if !def.property_type.accepts(value) {
                    errors.push(FieldValidationError::new(
                        name,
                        format!("must be of type {}", def.property_type.as_str()),
                    ));
                } else if def.format.is_some_and(|format| !format.validate(value)) {
                    errors.push(FieldValidationError::new(name, "is invalid"));
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::from_fields(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> PropertySchema {
        let mut schema = PropertySchema::new();
        schema.insert("name".into(), PropertyDef::required(PropertyType::String));
        schema.insert("age".into(), PropertyDef::optional(PropertyType::Number));
        schema.insert(
            "email".into(),
            PropertyDef::optional(PropertyType::String).with_format(FieldFormat::Email),
        );
        schema
    }

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_create_requires_required_fields() {
        let err = validate_fields(&schema(), &obj(json!({"age": 3})), ValidationMode::Create)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error for field 'name': is required"
        );
    }

    #[test]
    fn test_update_allows_missing_required_fields() {
        assert!(validate_fields(&schema(), &obj(json!({"age": 3})), ValidationMode::Update).is_ok());
    }

    #[test]
    fn test_update_rejects_null_required_field() {
        assert!(
            validate_fields(&schema(), &obj(json!({"name": null})), ValidationMode::Update)
                .is_err()
        );
    }

    #[test]
    fn test_type_mismatch_reported() {
        let err = validate_fields(
            &schema(),
            &obj(json!({"name": 12, "age": "old"})),
            ValidationMode::Create,
        )
        .unwrap_err();
        match err {
            ValidationError::FieldErrors(errors) => {
                assert_eq!(errors.len(), 2);
                assert_eq!(errors[0].message, "must be of type string");
            }
            other => panic!("Expected FieldErrors, got {:?}", other),
        }
    }

    #[test]
    fn test_undeclared_properties_are_accepted() {
        assert!(
            validate_fields(
                &schema(),
                &obj(json!({"name": "a", "nickname": true})),
                ValidationMode::Create
            )
            .is_ok()
        );
    }

    #[test]
    fn test_email_format() {
        assert!(FieldFormat::Email.validate(&json!("user@example.com")));
        assert!(!FieldFormat::Email.validate(&json!("invalid-email")));
        assert!(!FieldFormat::Email.validate(&json!(42)));

        let err = validate_fields(
            &schema(),
            &obj(json!({"name": "a", "email": "nope"})),
            ValidationMode::Create,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_date_accepts_rfc3339_and_numbers() {
        assert!(PropertyType::Date.accepts(&json!("2024-01-01T00:00:00Z")));
        assert!(PropertyType::Date.accepts(&json!(1700000000)));
        assert!(!PropertyType::Date.accepts(&json!("yesterday")));
    }

    #[test]
    fn test_property_def_short_and_full_forms() {
        let short: PropertyDef = serde_yaml::from_str("string").unwrap();
        assert_eq!(short, PropertyDef::optional(PropertyType::String));

        let full: PropertyDef =
            serde_yaml::from_str("{ type: string, required: true, format: email }").unwrap();
        assert!(full.required);
        assert_eq!(full.format, Some(FieldFormat::Email));
    }

    #[test]
    fn test_only_email_format_is_accepted() {
        let unknown = serde_yaml::from_str::<PropertyDef>("{ type: string, format: url }");
        assert!(unknown.is_err());
    }
}
