use super::*;
use chrono::NaiveDate;
use shared::{
    domain::{fields, RecordId},
    schema::{house_purchases, service_providers},
};

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).expect("date")
}

#[test]
fn sofa_draft_without_vendor_fails_only_on_vendor() {
    let schema = house_purchases();
    let draft = schema.with_defaults(
        &fields([
            ("item", FieldValue::from("Sofa")),
            ("vendor", FieldValue::from("")),
            ("quantity", FieldValue::from(2)),
            ("price", FieldValue::from("150.00")),
        ]),
        today(),
    );

    let errors = validate(&schema, &draft);
    assert_eq!(errors.len(), 1, "unexpected errors: {errors}");
    assert_eq!(errors.rule_of("vendor"), Some(Rule::Required));
    assert_eq!(
        errors.get("vendor").map(|e| e.message.as_str()),
        Some("Vendor is required")
    );

    let mut fixed = draft.clone();
    fixed.insert("vendor".to_string(), FieldValue::from("Acme"));
    assert!(validate(&schema, &fixed).is_empty());
}

#[test]
fn required_trims_whitespace() {
    assert!(!check(Rule::Required, &FieldValue::from("   ")));
    assert!(!check(Rule::Required, &FieldValue::Null));
    assert!(check(Rule::Required, &FieldValue::from(" x ")));
    assert!(check(Rule::Required, &FieldValue::Number(0.0)));
}

#[test]
fn positive_number_rejects_zero_negative_and_garbage() {
    assert!(!check(Rule::PositiveNumber, &FieldValue::Number(0.0)));
    assert!(!check(Rule::PositiveNumber, &FieldValue::from("-3")));
    assert!(!check(Rule::PositiveNumber, &FieldValue::from("twelve")));
    assert!(check(Rule::PositiveNumber, &FieldValue::from("150.00")));
    assert!(check(Rule::PositiveNumber, &FieldValue::Number(0.5)));
    assert!(check(Rule::PositiveNumber, &FieldValue::Null));
}

#[test]
fn valid_date_accepts_iso_and_rejects_other_shapes() {
    assert!(check(Rule::ValidDate, &FieldValue::from("2024-02-29")));
    assert!(check(Rule::ValidDate, &FieldValue::from("2024-02-29T08:15:00Z")));
    assert!(!check(Rule::ValidDate, &FieldValue::from("2023-02-29")));
    assert!(!check(Rule::ValidDate, &FieldValue::from("29/02/2024")));
    assert!(check(Rule::ValidDate, &FieldValue::from("")));
}

#[test]
fn reports_first_failing_rule_per_field() {
    let schema = house_purchases();
    let errors = validate(&schema, &fields([("quantity", FieldValue::from(""))]));
    assert_eq!(errors.rule_of("quantity"), Some(Rule::Required));

    let errors = validate(&schema, &fields([("quantity", FieldValue::from("0"))]));
    assert_eq!(errors.rule_of("quantity"), Some(Rule::PositiveNumber));
    assert_eq!(
        errors.get("quantity").map(|e| e.message.as_str()),
        Some("Quantity must be greater than 0")
    );
}

#[test]
fn empty_draft_reports_every_required_field() {
    let schema = house_purchases();
    let errors = validate(&schema, &Fields::new());
    let mut failing: Vec<&str> = errors.iter().map(|(field, _)| field).collect();
    failing.sort_unstable();
    assert_eq!(failing, vec!["date", "item", "price", "quantity", "vendor"]);
    assert!(errors.clone().into_result().is_err());
}

#[test]
fn patch_is_validated_against_the_merged_record() {
    let schema = house_purchases();
    let current = Record::new(
        RecordId::new("9"),
        schema
            .conform(&fields([
                ("item", FieldValue::from("Lamp")),
                ("vendor", FieldValue::from("Ikea")),
                ("quantity", FieldValue::from(1)),
                ("price", FieldValue::from(20)),
                ("date", FieldValue::from("2024-01-10")),
            ]))
            .expect("conform"),
    );

    assert!(validate_patch(&schema, &current, &fields([("price", 25)])).is_empty());

    let errors = validate_patch(&schema, &current, &fields([("item", "  ")]));
    assert_eq!(errors.rule_of("item"), Some(Rule::Required));
}

#[test]
fn values_must_fit_the_field_kind() {
    let schema = house_purchases();
    let mut draft = schema.with_defaults(
        &fields([
            ("item", FieldValue::from("Sofa")),
            ("vendor", FieldValue::from("Acme")),
            ("price", FieldValue::from(150)),
        ]),
        today(),
    );
    draft.insert("category".to_string(), FieldValue::from("Toys"));

    let errors = validate(&schema, &draft);
    assert_eq!(errors.len(), 1, "unexpected errors: {errors}");
    assert_eq!(errors.rule_of("category"), Some(Rule::MatchesKind));
    assert_eq!(
        errors.get("category").map(|e| e.message.as_str()),
        Some("Category must be one of: Furniture, Appliances, Security, Maintenance, Decor, Electronics")
    );

    draft.insert("category".to_string(), FieldValue::from(""));
    assert!(validate(&schema, &draft).is_empty());

    let providers = service_providers();
    let errors = validate(
        &providers,
        &fields([
            ("name", FieldValue::from("Sparky")),
            ("category", FieldValue::from("Electrical")),
            ("contracts", FieldValue::from("many")),
        ]),
    );
    assert_eq!(errors.rule_of("contracts"), Some(Rule::MatchesKind));
    assert_eq!(
        errors.get("contracts").map(|e| e.message.as_str()),
        Some("Contracts must be a number")
    );
}
