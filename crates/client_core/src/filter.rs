//! Compound record filtering: free-text search, exact categorical matches and
//! an inclusive date range, AND-combined. Output order is input order.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use shared::{domain::Record, schema::ResourceSchema};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterCriteria {
    pub search: String,
    /// Field name to required value; empty values are ignored.
    pub categories: BTreeMap<String, String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl FilterCriteria {
    pub fn with_search(mut self, term: impl Into<String>) -> Self {
        self.search = term.into();
        self
    }

    pub fn with_category(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.categories.insert(field.into(), value.into());
        self
    }

    pub fn with_date_range(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.search.trim().is_empty()
            && self.categories.values().all(|v| v.is_empty())
            && self.date_from.is_none()
            && self.date_to.is_none()
    }

    pub fn reset(&mut self) {
        *self = FilterCriteria::default();
    }
}

pub fn matches(schema: &ResourceSchema, criteria: &FilterCriteria, record: &Record) -> bool {
    matches_search(schema, criteria.search.trim(), record)
        && matches_categories(schema, &criteria.categories, record)
        && matches_date_range(schema, criteria.date_from, criteria.date_to, record)
}

fn matches_search(schema: &ResourceSchema, term: &str, record: &Record) -> bool {
    if term.is_empty() {
        return true;
    }
    let term = term.to_lowercase();
    schema.search_fields.iter().any(|field| {
        schema
            .value_of(&record.fields, field)
            .display()
            .to_lowercase()
            .contains(&term)
    })
}

fn matches_categories(
    schema: &ResourceSchema,
    categories: &BTreeMap<String, String>,
    record: &Record,
) -> bool {
    categories
        .iter()
        .filter(|(_, wanted)| !wanted.is_empty())
        .all(|(field, wanted)| schema.value_of(&record.fields, field).display() == *wanted)
}

fn matches_date_range(
    schema: &ResourceSchema,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    record: &Record,
) -> bool {
    if from.is_none() && to.is_none() {
        return true;
    }
    let Some(field) = schema.date_field.as_deref() else {
        return true;
    };
    let Some(day) = record.get(field).as_date().map(|dt| dt.date()) else {
        return false;
    };
    from.map_or(true, |from| day >= from) && to.map_or(true, |to| day <= to)
}

/// Rows of `rows` that satisfy `criteria`, in their original order.
pub fn apply<'a, T: AsRef<Record>>(
    schema: &ResourceSchema,
    criteria: &FilterCriteria,
    rows: &'a [T],
) -> Vec<&'a T> {
    rows.iter()
        .filter(|row| matches(schema, criteria, row.as_ref()))
        .collect()
}

#[cfg(test)]
#[path = "tests/filter_tests.rs"]
mod tests;
