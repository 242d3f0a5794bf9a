use thiserror::Error;

/// A wire payload or draft that does not conform to a resource schema.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("expected a JSON object for a {resource} record")]
    NotAnObject { resource: String },
    #[error("{resource} record is missing its id")]
    MissingId { resource: String },
    #[error("field `{field}` expected {expected}, received {received}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        received: String,
    },
    #[error("field `{field}` does not allow `{value}`")]
    InvalidChoice { field: String, value: String },
    #[error("unknown field `{field}`")]
    UnknownField { field: String },
}

impl SchemaError {
    pub fn field(&self) -> Option<&str> {
        match self {
            SchemaError::TypeMismatch { field, .. }
            | SchemaError::InvalidChoice { field, .. }
            | SchemaError::UnknownField { field } => Some(field),
            SchemaError::NotAnObject { .. }
            | SchemaError::MissingId { .. } => None,
        }
    }
}
