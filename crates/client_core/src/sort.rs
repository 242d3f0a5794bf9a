//! Stable, type-aware ordering of records by a single field.

use std::cmp::Ordering;

use chrono::NaiveDateTime;
use shared::{
    domain::{FieldValue, Record},
    schema::{FieldKind, ResourceSchema},
};

pub use shared::schema::SortDirection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortState {
    pub field: String,
    pub direction: SortDirection,
}

impl SortState {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }

    pub fn ascending(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Ascending)
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Descending)
    }

    pub fn for_schema(schema: &ResourceSchema) -> Self {
        let (field, direction) = &schema.default_sort;
        Self::new(field.clone(), *direction)
    }

    /// Header-click behaviour: the active field flips direction, any other
    /// field becomes active in ascending order.
    pub fn toggle(&mut self, field: &str) {
        if self.field == field {
            self.direction = self.direction.flipped();
        } else {
            self.field = field.to_string();
            self.direction = SortDirection::Ascending;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Numeric,
    Temporal,
    Ordinal,
}

impl Comparison {
    fn for_field(schema: &ResourceSchema, field: &str) -> Self {
        match schema.kind_of(field) {
            Some(FieldKind::Number) => Comparison::Numeric,
            Some(FieldKind::Date) => Comparison::Temporal,
            _ => Comparison::Ordinal,
        }
    }

    fn compare(self, a: &FieldValue, b: &FieldValue) -> Ordering {
        match self {
            Comparison::Numeric => {
                let a = a.as_number().unwrap_or(0.0);
                let b = b.as_number().unwrap_or(0.0);
                a.partial_cmp(&b).unwrap_or(Ordering::Equal)
            }
            Comparison::Temporal => {
                let a = a.as_date().unwrap_or(NaiveDateTime::MIN);
                let b = b.as_date().unwrap_or(NaiveDateTime::MIN);
                a.cmp(&b)
            }
            Comparison::Ordinal => a.display().cmp(&b.display()),
        }
    }
}

/// Sorts `rows` in place. `sort_by` is stable, and descending order reverses
/// the comparator rather than the output, so ties keep their input order in
/// both directions.
pub fn apply<T: AsRef<Record>>(schema: &ResourceSchema, sort: &SortState, rows: &mut [&T]) {
    let comparison = Comparison::for_field(schema, &sort.field);
    let mut keyed: Vec<(FieldValue, &T)> = rows
        .iter()
        .map(|row| (schema.value_of(&row.as_ref().fields, &sort.field), *row))
        .collect();

    keyed.sort_by(|(a, _), (b, _)| {
        let ordering = comparison.compare(a, b);
        match sort.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    });

    for (slot, (_, row)) in rows.iter_mut().zip(keyed) {
        *slot = row;
    }
}

#[cfg(test)]
#[path = "tests/sort_tests.rs"]
mod tests;
