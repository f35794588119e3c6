//! Payload schema checking shared by the fact and intent kernels.

use serde_json::{Map, Value};

/// Declared JSON type for a payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Str,
    /// Any JSON number (integer or float).
    Num,
    /// Integer-valued number. Booleans never qualify.
    Int,
    Object,
    List,
}

impl FieldKind {
    /// Check whether a JSON value conforms to this kind.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::Bool => value.is_boolean(),
            Self::Str => value.is_string(),
            Self::Num => value.is_number(),
            Self::Int => value.is_i64() || value.is_u64(),
            Self::Object => value.is_object(),
            Self::List => value.is_array(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Str => "string",
            Self::Num => "number",
            Self::Int => "integer",
            Self::Object => "object",
            Self::List => "list",
        }
    }
}

/// One field in a payload schema.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldSpec {
    pub const fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }
}

/// A payload field that failed schema validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaViolation {
    MissingField { field: String },
    WrongType { field: String, expected: &'static str },
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField { field } => write!(f, "missing required field '{field}'"),
            Self::WrongType { field, expected } => {
                write!(f, "field '{field}' is not a {expected}")
            }
        }
    }
}

/// Validate a payload map against a schema.
///
/// Required fields must be present with the declared type; optional fields
/// are type-checked only when present. Extra fields are allowed - schemas
/// declare the minimum contract, adapters may carry more.
pub(crate) fn check_payload(
    schema: &[FieldSpec],
    data: &Map<String, Value>,
) -> Result<(), SchemaViolation> {
    for spec in schema {
        match data.get(spec.name) {
            Some(value) => {
                if !spec.kind.matches(value) {
                    return Err(SchemaViolation::WrongType {
                        field: spec.name.to_string(),
                        expected: spec.kind.name(),
                    });
                }
            }
            None if spec.required => {
                return Err(SchemaViolation::MissingField {
                    field: spec.name.to_string(),
                });
            }
            None => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    const SCHEMA: &[FieldSpec] = &[
        FieldSpec::required("present", FieldKind::Bool),
        FieldSpec::optional("zone_id", FieldKind::Str),
    ];

    #[test]
    fn accepts_required_field() {
        let data = as_map(json!({"present": true}));
        assert!(check_payload(SCHEMA, &data).is_ok());
    }

    #[test]
    fn rejects_missing_required_field() {
        let data = as_map(json!({"zone_id": "kitchen"}));
        assert_eq!(
            check_payload(SCHEMA, &data),
            Err(SchemaViolation::MissingField {
                field: "present".to_string()
            })
        );
    }

    #[test]
    fn rejects_wrong_type_for_optional_field() {
        let data = as_map(json!({"present": true, "zone_id": 7}));
        assert!(matches!(
            check_payload(SCHEMA, &data),
            Err(SchemaViolation::WrongType { .. })
        ));
    }

    #[test]
    fn ignores_extra_fields() {
        let data = as_map(json!({"present": false, "battery": 0.4}));
        assert!(check_payload(SCHEMA, &data).is_ok());
    }

    #[test]
    fn int_kind_rejects_bool_and_float() {
        assert!(!FieldKind::Int.matches(&json!(true)));
        assert!(!FieldKind::Int.matches(&json!(1.5)));
        assert!(FieldKind::Int.matches(&json!(42)));
    }
}
