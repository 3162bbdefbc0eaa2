//! Compares the previous and new state of an entity, decides whether the
//! difference is meaningful, and classifies it by severity
//! (`spec.md` §4.6). Owns `ChangeEvent` and `Version` creation.

use regex::Regex;
use serde_json::Value;

use crate::types::{EntityKind, EventType, FieldDiff, Severity};

/// A noise field varies between equivalent page loads and must never
/// produce a `ChangeEvent` (`spec.md` GLOSSARY).
fn is_noise_field(field: &str) -> bool {
    let lower = field.to_lowercase();
    const NOISE_PREFIXES: &[&str] = &["utm_", "gclid", "fbclid"];
    const NOISE_SUBSTRINGS: &[&str] = &[
        "session",
        "token",
        "copyright",
        "experiment",
        "variant_id",
        "analytics",
        "tracking",
        "class_hash",
        "comment_count",
        "share_count",
        "cookie_consent",
    ];
    NOISE_PREFIXES.iter().any(|p| lower.starts_with(p))
        || NOISE_SUBSTRINGS.iter().any(|s| lower.contains(s))
        || is_bare_year(&lower)
}

fn is_bare_year(value: &str) -> bool {
    let re = Regex::new(r"^\d{4}$").unwrap();
    re.is_match(value)
}

/// Deep, order-sensitive value equality. Null-ish values (`Null`, empty
/// string, empty array) are treated as equal to each other.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    if is_nullish(a) && is_nullish(b) {
        return true;
    }
    a == b
}

fn is_nullish(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(arr) => arr.is_empty(),
        _ => false,
    }
}

/// Whether a field name is an image reference (`spec.md` §4.6 "Image
/// fields are meaningful only if the fingerprint changed").
fn is_image_field(field: &str) -> bool {
    field.contains("image") || field.contains("fingerprint") || field.contains("screenshot")
}

pub fn is_meaningful_change(field: &str, old_value: &Value, new_value: &Value) -> bool {
    if is_noise_field(field) {
        return false;
    }
    if values_equal(old_value, new_value) {
        return false;
    }
    if field.to_lowercase().contains("price") {
        return true;
    }
    if field == "availability" {
        return true;
    }
    if is_image_field(field) {
        // Caller supplies the stored fingerprint as the value; a changed
        // fingerprint is by definition a meaningful change here.
        return true;
    }
    if is_nullish(old_value) != is_nullish(new_value) {
        return true;
    }
    true
}

pub fn derive_event_type(diffs: &[FieldDiff], previous_existed: bool, new_exists: bool) -> EventType {
    if !previous_existed {
        return EventType::Created;
    }
    if !new_exists {
        return EventType::Removed;
    }
    if diffs.iter().any(|d| d.is_meaningful && d.field.to_lowercase().contains("price")) {
        return EventType::PriceChanged;
    }
    if diffs.iter().any(|d| d.is_meaningful && d.field == "disclaimer") {
        return EventType::DisclaimerChanged;
    }
    if diffs.iter().any(|d| d.is_meaningful && d.field == "availability") {
        return EventType::AvailabilityChanged;
    }
    if diffs.iter().any(|d| d.is_meaningful && is_image_field(&d.field)) {
        return EventType::ImageChanged;
    }
    EventType::Updated
}

/// Severity derivation per `spec.md` §4.6 and the Open-Question
/// resolution in §9: `created`/`removed` is critical for products, high
/// for offers and banners.
pub fn derive_severity(entity_kind: EntityKind, event_type: EventType, diffs: &[FieldDiff]) -> Severity {
    let meaningful_fields: Vec<&str> = diffs
        .iter()
        .filter(|d| d.is_meaningful)
        .map(|d| d.field.as_str())
        .collect();

    if meaningful_fields.is_empty() {
        return Severity::Low;
    }

    if matches!(event_type, EventType::Created | EventType::Removed) {
        return match entity_kind {
            EntityKind::Product => Severity::Critical,
            EntityKind::Offer | EntityKind::Banner => Severity::High,
        };
    }

    const CRITICAL_FIELDS: &[&str] = &["title", "price_amount", "availability"];
    const HIGH_FIELDS: &[&str] = &["variants", "offer_type", "saving_amount", "valid_to", "end_date"];

    if meaningful_fields.iter().any(|f| CRITICAL_FIELDS.contains(f)) {
        Severity::Critical
    } else if meaningful_fields.iter().any(|f| HIGH_FIELDS.contains(f)) {
        Severity::High
    } else {
        Severity::Medium
    }
}

/// Human-readable one-line summary, entity-prefixed.
pub fn summarize(entity_label: &str, title: &str, diffs: &[FieldDiff]) -> String {
    let prefix = format!("{entity_label} {title}: ");
    let meaningful = diffs.iter().find(|d| d.is_meaningful);
    let body = match meaningful {
        None => "no meaningful change".to_string(),
        Some(diff) if diff.field.to_lowercase().contains("price") => format!(
            "price changed from {} to {}",
            format_money(&diff.old_value),
            format_money(&diff.new_value)
        ),
        Some(diff) if diff.field == "availability" => format!(
            "availability changed from {} to {}",
            format_plain(&diff.old_value),
            format_plain(&diff.new_value)
        ),
        Some(diff) => format!("{} changed", diff.field),
    };
    format!("{prefix}{body}")
}

fn format_money(value: &Value) -> String {
    match value {
        Value::Number(n) => format!("${n}"),
        Value::Null => "—".to_string(),
        other => other.to_string(),
    }
}

fn format_plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "—".to_string(),
        other => other.to_string(),
    }
}

/// Top-level comparison entry point: diffs every top-level field of the
/// entity's JSON snapshot and returns `None` if only noise changed.
/// `detect(a, b) == detect(a, b)` holds because this function is pure.
pub fn detect(
    entity_label: &str,
    title: &str,
    entity_kind: EntityKind,
    previous: Option<&Value>,
    current: Option<&Value>,
) -> Option<(EventType, Severity, String, Vec<FieldDiff>)> {
    let diffs = diff_snapshots(previous, current);
    let any_meaningful = diffs.iter().any(|d| d.is_meaningful);
    let previous_existed = previous.is_some();
    let new_exists = current.is_some();

    if !any_meaningful && previous_existed && new_exists {
        return None;
    }

    let event_type = derive_event_type(&diffs, previous_existed, new_exists);
    let severity = derive_severity(entity_kind, event_type, &diffs);
    let summary = summarize(entity_label, title, &diffs);
    Some((event_type, severity, summary, diffs))
}

fn diff_snapshots(previous: Option<&Value>, current: Option<&Value>) -> Vec<FieldDiff> {
    let empty = serde_json::Map::new();
    let prev_obj = previous.and_then(Value::as_object).unwrap_or(&empty);
    let curr_obj = current.and_then(Value::as_object).unwrap_or(&empty);

    let mut fields: Vec<&String> = prev_obj.keys().chain(curr_obj.keys()).collect();
    fields.sort();
    fields.dedup();

    fields
        .into_iter()
        .filter_map(|field| {
            let old_value = prev_obj.get(field).cloned().unwrap_or(Value::Null);
            let new_value = curr_obj.get(field).cloned().unwrap_or(Value::Null);
            if values_equal(&old_value, &new_value) {
                return None;
            }
            let is_meaningful = is_meaningful_change(field, &old_value, &new_value);
            Some(FieldDiff {
                field: field.clone(),
                old_value,
                new_value,
                is_meaningful,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn noise_field_never_meaningful() {
        assert!(!is_meaningful_change("utm_source", &json!("a"), &json!("b")));
        assert!(!is_meaningful_change("session_id", &json!("a"), &json!("b")));
        assert!(!is_meaningful_change("copyright_year", &json!(2024), &json!(2025)));
    }

    #[test]
    fn price_field_always_meaningful() {
        assert!(is_meaningful_change("price_amount", &json!(30000), &json!(29990)));
    }

    #[test]
    fn availability_always_meaningful() {
        assert!(is_meaningful_change("availability", &json!("in_stock"), &json!("sold_out")));
    }

    #[test]
    fn identical_snapshots_detect_to_none() {
        let snapshot = json!({"title": "X5", "price_amount": 50000});
        assert!(detect("product", "X5", EntityKind::Product, Some(&snapshot), Some(&snapshot)).is_none());
    }

    #[test]
    fn detect_is_deterministic() {
        let a = json!({"title": "X5", "price_amount": 50000});
        let b = json!({"title": "X5", "price_amount": 49000});
        let first = detect("product", "X5", EntityKind::Product, Some(&a), Some(&b));
        let second = detect("product", "X5", EntityKind::Product, Some(&a), Some(&b));
        assert_eq!(first.map(|r| (r.0, r.1)), second.map(|r| (r.0, r.1)));
    }

    #[test]
    fn price_change_is_critical_and_price_changed() {
        let a = json!({"title": "X5", "price_amount": 30000});
        let b = json!({"title": "X5", "price_amount": 29990});
        let (event_type, severity, summary, _) =
            detect("product", "X5", EntityKind::Product, Some(&a), Some(&b)).unwrap();
        assert_eq!(event_type, EventType::PriceChanged);
        assert_eq!(severity, Severity::Critical);
        assert!(summary.contains("price changed from"));
    }

    #[test]
    fn created_is_critical_for_product_and_high_for_offer() {
        let b = json!({"title": "New Offer"});
        let (event_type, severity, _, _) =
            detect("product", "New Offer", EntityKind::Product, None, Some(&b)).unwrap();
        assert_eq!(event_type, EventType::Created);
        assert_eq!(severity, Severity::Critical);

        let (_, severity, _, _) =
            detect("offer", "New Offer", EntityKind::Offer, None, Some(&b)).unwrap();
        assert_eq!(severity, Severity::High);
    }

    #[test]
    fn noise_only_mutation_yields_no_change() {
        let a = json!({"title": "X5", "utm_source": "a"});
        let b = json!({"title": "X5", "utm_source": "b"});
        assert!(detect("product", "X5", EntityKind::Product, Some(&a), Some(&b)).is_none());
    }
}
