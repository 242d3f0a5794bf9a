//! Resource schemas: the declared shape of each managed collection, and the
//! normalization every wire payload and draft passes through.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    domain::{FieldValue, Fields, Record, RecordId},
    error::SchemaError,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "options", rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Number,
    Date,
    Bool,
    Choice(Vec<String>),
}

impl FieldKind {
    fn expected(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Number => "a number",
            FieldKind::Date => "an ISO-8601 date",
            FieldKind::Bool => "a boolean",
            FieldKind::Choice(_) => "one of the listed options",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    Required,
    PositiveNumber,
    ValidDate,
    /// Implicit on every field: the value fits the field's kind.
    MatchesKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }
}

/// Initial value a blank form offers for a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldDefault {
    Today,
    Text(String),
    Number(f64),
}

impl FieldDefault {
    pub fn value(&self, today: NaiveDate) -> FieldValue {
        match self {
            FieldDefault::Today => FieldValue::from(today),
            FieldDefault::Text(text) => FieldValue::Text(text.clone()),
            FieldDefault::Number(n) => FieldValue::Number(*n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub label: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub default: Option<FieldDefault>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, label: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            kind,
            rules: Vec::new(),
            default: None,
        }
    }

    pub fn text(name: &str, label: &str) -> Self {
        Self::new(name, label, FieldKind::Text)
    }

    pub fn number(name: &str, label: &str) -> Self {
        Self::new(name, label, FieldKind::Number)
    }

    pub fn date(name: &str, label: &str) -> Self {
        Self::new(name, label, FieldKind::Date).rule(Rule::ValidDate)
    }

    pub fn choice(name: &str, label: &str, options: &[&str]) -> Self {
        Self::new(
            name,
            label,
            FieldKind::Choice(options.iter().map(|o| o.to_string()).collect()),
        )
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        if !self.rules.contains(&rule) {
            self.rules.push(rule);
        }
        self
    }

    pub fn required(self) -> Self {
        self.rule(Rule::Required)
    }

    pub fn positive(self) -> Self {
        self.rule(Rule::PositiveNumber)
    }

    pub fn defaulting(mut self, default: FieldDefault) -> Self {
        self.default = Some(default);
        self
    }

    pub fn is_required(&self) -> bool {
        self.rules.contains(&Rule::Required)
    }

    /// Coerces `value` to this field's kind, as the wire boundary does.
    pub fn conform(&self, value: FieldValue) -> Result<FieldValue, SchemaError> {
        conform_value(self, value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Derivation {
    Product(String, String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedField {
    pub name: String,
    pub label: String,
    pub derivation: Derivation,
}

static NUMBER_KIND: FieldKind = FieldKind::Number;

impl DerivedField {
    pub fn kind(&self) -> &FieldKind {
        match self.derivation {
            Derivation::Product(..) => &NUMBER_KIND,
        }
    }

    pub fn compute(&self, fields: &Fields) -> FieldValue {
        match &self.derivation {
            Derivation::Product(left, right) => {
                let left = fields.get(left).and_then(FieldValue::as_number);
                let right = fields.get(right).and_then(FieldValue::as_number);
                match (left, right) {
                    (Some(l), Some(r)) => FieldValue::Number(l * r),
                    _ => FieldValue::Null,
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSchema {
    /// Path of the collection below the API base url.
    pub resource: String,
    /// Singular noun used in user-facing messages.
    pub entity: String,
    /// Plural noun used in user-facing messages.
    pub entity_plural: String,
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub derived: Vec<DerivedField>,
    #[serde(default)]
    pub search_fields: Vec<String>,
    #[serde(default)]
    pub category_fields: Vec<String>,
    pub date_field: Option<String>,
    pub status_field: Option<String>,
    pub amount_field: Option<String>,
    pub default_sort: (String, SortDirection),
}

impl ResourceSchema {
    pub fn new(resource: &str, entity: &str, entity_plural: &str) -> Self {
        Self {
            resource: resource.to_string(),
            entity: entity.to_string(),
            entity_plural: entity_plural.to_string(),
            fields: Vec::new(),
            derived: Vec::new(),
            search_fields: Vec::new(),
            category_fields: Vec::new(),
            date_field: None,
            status_field: None,
            amount_field: None,
            default_sort: ("id".to_string(), SortDirection::Ascending),
        }
    }

    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_product(mut self, name: &str, label: &str, left: &str, right: &str) -> Self {
        self.derived.push(DerivedField {
            name: name.to_string(),
            label: label.to_string(),
            derivation: Derivation::Product(left.to_string(), right.to_string()),
        });
        self
    }

    pub fn searching(mut self, names: &[&str]) -> Self {
        self.search_fields = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn categorized_by(mut self, names: &[&str]) -> Self {
        self.category_fields = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn dated_by(mut self, name: &str) -> Self {
        self.date_field = Some(name.to_string());
        self
    }

    pub fn status_by(mut self, name: &str) -> Self {
        self.status_field = Some(name.to_string());
        self
    }

    pub fn amount_by(mut self, name: &str) -> Self {
        self.amount_field = Some(name.to_string());
        self
    }

    pub fn sorted_by(mut self, name: &str, direction: SortDirection) -> Self {
        self.default_sort = (name.to_string(), direction);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn derived_field(&self, name: &str) -> Option<&DerivedField> {
        self.derived.iter().find(|d| d.name == name)
    }

    /// Declared kind of a stored or derived field.
    pub fn kind_of(&self, name: &str) -> Option<&FieldKind> {
        self.field(name)
            .map(|f| &f.kind)
            .or_else(|| self.derived_field(name).map(DerivedField::kind))
    }

    pub fn label(&self, name: &str) -> String {
        self.field(name)
            .map(|f| f.label.clone())
            .or_else(|| self.derived_field(name).map(|d| d.label.clone()))
            .unwrap_or_else(|| name.to_string())
    }

    /// Value of `name` for a record's fields, computing derived fields on read.
    pub fn value_of(&self, fields: &Fields, name: &str) -> FieldValue {
        if let Some(derived) = self.derived_field(name) {
            return derived.compute(fields);
        }
        fields.get(name).cloned().unwrap_or_default()
    }

    /// Fresh form values: every field with a declared default, as of `today`.
    pub fn blank_draft(&self, today: NaiveDate) -> Fields {
        self.fields
            .iter()
            .filter_map(|spec| {
                spec.default
                    .as_ref()
                    .map(|default| (spec.name.clone(), default.value(today)))
            })
            .collect()
    }

    /// `draft` with declared defaults filled in for keys it does not mention.
    pub fn with_defaults(&self, draft: &Fields, today: NaiveDate) -> Fields {
        let mut filled = self.blank_draft(today);
        for (name, value) in draft {
            filled.insert(name.clone(), value.clone());
        }
        filled
    }

    pub fn entity_title(&self) -> String {
        capitalize(&self.entity)
    }

    /// Normalizes a full record field map: every declared field is present
    /// (missing ones become null), undeclared and derived keys are dropped.
    pub fn conform(&self, fields: &Fields) -> Result<Fields, SchemaError> {
        let mut conformed = Fields::new();
        for spec in &self.fields {
            let raw = fields.get(&spec.name).cloned().unwrap_or_default();
            conformed.insert(spec.name.clone(), conform_value(spec, raw)?);
        }
        Ok(conformed)
    }

    /// Normalizes a partial field map. Unlike [`ResourceSchema::conform`],
    /// absent fields stay absent and undeclared keys are rejected, since a
    /// patch naming an unknown field is a caller mistake.
    pub fn conform_patch(&self, patch: &Fields) -> Result<Fields, SchemaError> {
        let mut conformed = Fields::new();
        for (name, value) in patch {
            let spec = self.field(name).ok_or_else(|| SchemaError::UnknownField {
                field: name.clone(),
            })?;
            conformed.insert(name.clone(), conform_value(spec, value.clone())?);
        }
        Ok(conformed)
    }

    pub fn record_from_json(&self, value: &Value) -> Result<Record, SchemaError> {
        let object = value.as_object().ok_or_else(|| SchemaError::NotAnObject {
            resource: self.resource.clone(),
        })?;

        let id = object
            .get("id")
            .filter(|id| !id.is_null())
            .and_then(|id| serde_json::from_value::<RecordId>(id.clone()).ok())
            .ok_or_else(|| SchemaError::MissingId {
                resource: self.resource.clone(),
            })?;

        let mut raw = Fields::new();
        for spec in &self.fields {
            let Some(value) = object.get(&spec.name) else {
                continue;
            };
            let value = FieldValue::from_json(value).ok_or_else(|| SchemaError::TypeMismatch {
                field: spec.name.clone(),
                expected: spec.kind.expected(),
                received: "a nested value".to_string(),
            })?;
            raw.insert(spec.name.clone(), value);
        }

        Ok(Record::new(id, self.conform(&raw)?))
    }

    /// Wire body for create/update: declared fields only, derived ones never.
    pub fn to_wire(&self, fields: &Fields) -> Map<String, Value> {
        self.fields
            .iter()
            .filter_map(|spec| {
                fields
                    .get(&spec.name)
                    .map(|value| (spec.name.clone(), value.to_json()))
            })
            .collect()
    }

    pub fn record_to_json(&self, record: &Record) -> Value {
        let mut body = self.to_wire(&record.fields);
        body.insert("id".to_string(), Value::String(record.id.0.clone()));
        Value::Object(body)
    }
}

fn conform_value(spec: &FieldSpec, value: FieldValue) -> Result<FieldValue, SchemaError> {
    let mismatch = |value: &FieldValue| SchemaError::TypeMismatch {
        field: spec.name.clone(),
        expected: spec.kind.expected(),
        received: format!("{} `{}`", value.type_name(), value.display()),
    };

    if value.is_blank() && !matches!(spec.kind, FieldKind::Text) {
        return Ok(FieldValue::Null);
    }

    match &spec.kind {
        FieldKind::Text => match value {
            FieldValue::Null | FieldValue::Text(_) => Ok(value),
            FieldValue::Number(_) | FieldValue::Bool(_) | FieldValue::Date(_) => {
                Ok(FieldValue::Text(value.display()))
            }
        },
        FieldKind::Number => value
            .as_number()
            .map(FieldValue::Number)
            .ok_or_else(|| mismatch(&value)),
        FieldKind::Date => value
            .as_date()
            .map(FieldValue::Date)
            .ok_or_else(|| mismatch(&value)),
        FieldKind::Bool => match &value {
            FieldValue::Bool(_) => Ok(value),
            FieldValue::Text(text) => match text.trim() {
                "true" => Ok(FieldValue::Bool(true)),
                "false" => Ok(FieldValue::Bool(false)),
                _ => Err(mismatch(&value)),
            },
            _ => Err(mismatch(&value)),
        },
        FieldKind::Choice(options) => match &value {
            FieldValue::Text(text) if options.iter().any(|o| o == text) => Ok(value),
            _ => Err(SchemaError::InvalidChoice {
                field: spec.name.clone(),
                value: value.display(),
            }),
        },
    }
}

fn capitalize(raw: &str) -> String {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn house_purchases() -> ResourceSchema {
    ResourceSchema::new("house-purchases", "purchase", "purchases")
        .with_field(FieldSpec::text("item", "Item name").required())
        .with_field(FieldSpec::text("vendor", "Vendor").required())
        .with_field(
            FieldSpec::number("quantity", "Quantity")
                .required()
                .positive()
                .defaulting(FieldDefault::Number(1.0)),
        )
        .with_field(FieldSpec::number("price", "Price").required().positive())
        .with_field(
            FieldSpec::date("date", "Date")
                .required()
                .defaulting(FieldDefault::Today),
        )
        .with_field(
            FieldSpec::choice("paymentStatus", "Payment status", &["Pending", "Paid", "Partial"])
                .defaulting(FieldDefault::Text("Pending".to_string())),
        )
        .with_field(FieldSpec::choice(
            "status",
            "Status",
            &["Pending", "Ordered", "Delivered", "Cancelled"],
        ))
        .with_field(FieldSpec::choice(
            "category",
            "Category",
            &[
                "Furniture",
                "Appliances",
                "Security",
                "Maintenance",
                "Decor",
                "Electronics",
            ],
        ))
        .with_field(FieldSpec::text("notes", "Notes"))
        .with_product("total", "Total", "price", "quantity")
        .searching(&["item", "vendor", "category"])
        .categorized_by(&["status", "category", "vendor", "paymentStatus"])
        .dated_by("date")
        .status_by("paymentStatus")
        .amount_by("total")
        .sorted_by("date", SortDirection::Descending)
}

pub fn service_providers() -> ResourceSchema {
    ResourceSchema::new("service-providers", "service provider", "service providers")
        .with_field(FieldSpec::text("name", "Provider name").required())
        .with_field(FieldSpec::text("category", "Category").required())
        .with_field(FieldSpec::text("location", "Location"))
        .with_field(FieldSpec::choice(
            "status",
            "Status",
            &["Active", "Inactive", "Pending"],
        ))
        .with_field(FieldSpec::number("contracts", "Contracts"))
        .with_field(FieldSpec::text("monthlySpend", "Monthly spend"))
        .with_field(FieldSpec::date("lastService", "Last service"))
        .with_field(FieldSpec::number("rating", "Rating").positive())
        .with_field(FieldSpec::text("contact", "Contact"))
        .with_field(FieldSpec::text("phone", "Phone"))
        .with_field(FieldSpec::text("email", "Email"))
        .searching(&["name", "category", "location", "contact"])
        .categorized_by(&["category", "status", "location"])
        .dated_by("lastService")
        .status_by("status")
        .sorted_by("name", SortDirection::Ascending)
}

pub fn maintenance_alerts() -> ResourceSchema {
    ResourceSchema::new("maintenance-alerts/alerts", "maintenance alert", "maintenance alerts")
        .with_field(FieldSpec::text("assetId", "Asset id"))
        .with_field(FieldSpec::text("assetName", "Asset").required())
        .with_field(FieldSpec::text("title", "Title").required())
        .with_field(FieldSpec::text("description", "Description"))
        .with_field(
            FieldSpec::choice(
                "severity",
                "Severity",
                &["critical", "high", "medium", "low"],
            )
            .required(),
        )
        .with_field(FieldSpec::choice(
            "status",
            "Status",
            &["active", "acknowledged", "resolved"],
        ))
        .with_field(FieldSpec::date("predictedFailureDate", "Predicted failure"))
        .with_field(FieldSpec::date("createdAt", "Created"))
        .searching(&["title", "assetName", "description"])
        .categorized_by(&["severity", "status", "assetId"])
        .dated_by("createdAt")
        .status_by("severity")
        .sorted_by("createdAt", SortDirection::Descending)
}

pub fn journal_batches() -> ResourceSchema {
    ResourceSchema::new("payroll-journal/journal-batches", "journal batch", "journal batches")
        .with_field(FieldSpec::text("batchNumber", "Batch number").required())
        .with_field(FieldSpec::text("description", "Description"))
        .with_field(FieldSpec::choice(
            "status",
            "Status",
            &["Draft", "Pending", "Posted", "Reversed"],
        ))
        .with_field(FieldSpec::number("totalEntries", "Entries"))
        .with_field(FieldSpec::number("totalAmount", "Total amount").positive())
        .with_field(FieldSpec::text("payrollPeriodId", "Payroll period"))
        .with_field(FieldSpec::date("createdAt", "Created"))
        .searching(&["batchNumber", "description", "payrollPeriodId"])
        .categorized_by(&["status", "payrollPeriodId"])
        .dated_by("createdAt")
        .status_by("status")
        .amount_by("totalAmount")
        .sorted_by("createdAt", SortDirection::Descending)
}

/// Looks up a preset by its short name (`purchases`, `service-providers`,
/// `maintenance-alerts`, `journal-batches`).
pub fn preset(name: &str) -> Option<ResourceSchema> {
    match name {
        "purchases" | "house-purchases" => Some(house_purchases()),
        "service-providers" => Some(service_providers()),
        "maintenance-alerts" => Some(maintenance_alerts()),
        "journal-batches" => Some(journal_batches()),
        _ => None,
    }
}

pub const PRESET_NAMES: &[&str] = &[
    "purchases",
    "service-providers",
    "maintenance-alerts",
    "journal-batches",
];
