//! Field-rule evaluation for drafts and patches. Pure: no store, remote or
//! notification interaction happens here.

use std::{collections::BTreeMap, fmt};

use shared::{
    domain::{FieldValue, Fields, Record},
    schema::{FieldKind, FieldSpec, ResourceSchema, Rule},
};

#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    pub rule: Rule,
    pub message: String,
}

/// Errors keyed by field name; empty means the draft is valid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationErrors(BTreeMap<String, FieldError>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: &str) -> Option<&FieldError> {
        self.0.get(field)
    }

    pub fn rule_of(&self, field: &str) -> Option<Rule> {
        self.0.get(field).map(|e| e.rule)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldError)> {
        self.0.iter().map(|(field, err)| (field.as_str(), err))
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, err) in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{field}: {}", err.message)?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

pub fn check(rule: Rule, value: &FieldValue) -> bool {
    match rule {
        Rule::Required => !value.is_blank(),
        Rule::PositiveNumber => {
            value.is_blank() || value.as_number().is_some_and(|n| n > 0.0)
        }
        Rule::ValidDate => value.is_blank() || value.as_date().is_some(),
        // Needs the field's kind; `validate` applies it per field.
        Rule::MatchesKind => true,
    }
}

fn message(rule: Rule, spec: &FieldSpec) -> String {
    let label = &spec.label;
    match rule {
        Rule::Required => format!("{label} is required"),
        Rule::PositiveNumber => format!("{label} must be greater than 0"),
        Rule::ValidDate => format!("{label} must be a valid date"),
        Rule::MatchesKind => match &spec.kind {
            FieldKind::Text => format!("{label} must be text"),
            FieldKind::Number => format!("{label} must be a number"),
            FieldKind::Date => format!("{label} must be a valid date"),
            FieldKind::Bool => format!("{label} must be true or false"),
            FieldKind::Choice(options) => {
                format!("{label} must be one of: {}", options.join(", "))
            }
        },
    }
}

fn first_failure(spec: &FieldSpec, value: &FieldValue) -> Option<Rule> {
    spec.rules
        .iter()
        .copied()
        .find(|rule| !check(*rule, value))
        .or_else(|| spec.conform(value.clone()).is_err().then_some(Rule::MatchesKind))
}

/// Evaluates every declared rule against `draft`, then checks the value fits
/// the field's kind. Reports the first failure of each field.
pub fn validate(schema: &ResourceSchema, draft: &Fields) -> ValidationErrors {
    static NULL: FieldValue = FieldValue::Null;

    let mut errors = BTreeMap::new();
    for spec in &schema.fields {
        let value = draft.get(&spec.name).unwrap_or(&NULL);
        if let Some(rule) = first_failure(spec, value) {
            errors.insert(
                spec.name.clone(),
                FieldError {
                    rule,
                    message: message(rule, spec),
                },
            );
        }
    }
    ValidationErrors(errors)
}

/// Validates the record as it would look after `patch` is applied.
pub fn validate_patch(schema: &ResourceSchema, current: &Record, patch: &Fields) -> ValidationErrors {
    validate(schema, &current.patched(patch).fields)
}

#[cfg(test)]
#[path = "tests/validation_tests.rs"]
mod tests;
