//! Normalization of raw submitted values into stored JSON values.
//!
//! Values are bound as query parameters, never spliced into SQL, so
//! "escaping" here means cleaning the text a form element can legitimately
//! carry: control characters go, markup goes where the element is plain
//! text, numbers and dates become canonical.

use chrono::{DateTime, NaiveDate};
use roster_types::{FormElementKind, RawValue};
use serde_json::Value;

/// Canonical stored date format.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Accepted input date formats, besides RFC 3339.
const INPUT_DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];

/// Why a value could not be normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizeError {
    /// Not a whole number.
    NotInteger,
    /// Not a finite number.
    NotNumber,
    /// Not a recognizable date.
    NotDate,
}

impl NormalizeError {
    /// Message for a field with the given label.
    pub fn message(self, label: &str) -> String {
        match self {
            Self::NotInteger => format!("{label} must be a whole number."),
            Self::NotNumber => format!("{label} must be a number."),
            Self::NotDate => format!("{label} must be a date (YYYY-MM-DD)."),
        }
    }
}

/// Normalize a non-blank raw value for a field of `kind`.
pub fn normalize(kind: FormElementKind, raw: &RawValue) -> Result<Value, NormalizeError> {
    match kind {
        FormElementKind::TextLine
        | FormElementKind::Checkbox
        | FormElementKind::Radio
        | FormElementKind::Dropdown
        | FormElementKind::Link
        | FormElementKind::Hidden => Ok(Value::String(plain_line(&raw.to_text()))),
        FormElementKind::TextArea => Ok(Value::String(plain_block(&raw.to_text()))),
        FormElementKind::RichText
        | FormElementKind::Captcha
        | FormElementKind::Timestamp
        | FormElementKind::Placeholder => Ok(Value::String(
            strip_control(&raw.to_text(), true).trim().to_owned(),
        )),
        FormElementKind::MultiCheckbox | FormElementKind::MultiSelect => Ok(Value::Array(
            raw.items()
                .into_iter()
                .map(plain_line)
                .filter(|item| !item.is_empty())
                .map(Value::String)
                .collect(),
        )),
        FormElementKind::Numeric => raw
            .to_text()
            .trim()
            .parse::<i64>()
            .ok()
            .map(Value::from)
            .ok_or(NormalizeError::NotInteger),
        FormElementKind::Decimal => raw
            .to_text()
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or(NormalizeError::NotNumber),
        FormElementKind::Date => parse_date(raw.to_text().trim())
            .map(|date| Value::String(date.format(DATE_FORMAT).to_string()))
            .ok_or(NormalizeError::NotDate),
    }
}

/// The value stored when a field is submitted blank.
pub const fn empty_value(kind: FormElementKind) -> Value {
    match kind {
        FormElementKind::MultiCheckbox | FormElementKind::MultiSelect => Value::Array(Vec::new()),
        FormElementKind::Numeric | FormElementKind::Decimal | FormElementKind::Date => Value::Null,
        _ => Value::String(String::new()),
    }
}

/// Whether a normalized value carries nothing worth storing on insert.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// The text the store compares a value as (`data->>field`).
pub fn comparable_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse `YYYY-MM-DD`, `MM/DD/YYYY`, or an RFC 3339 timestamp.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    INPUT_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

/// One line of plain text: no markup, no control characters, single spaces.
fn plain_line(text: &str) -> String {
    strip_tags(&strip_control(text, false))
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Multi-line plain text: line breaks kept, markup and control characters
/// removed.
fn plain_block(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    strip_tags(&strip_control(&unified, true)).trim().to_owned()
}

fn strip_control(text: &str, keep_breaks: bool) -> String {
    text.chars()
        .filter(|&c| !c.is_control() || (keep_breaks && (c == '\n' || c == '\t')))
        .collect()
}

/// Remove `<...>` tags. An unclosed `<` drops the rest of the text.
fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn single(text: &str) -> RawValue {
        RawValue::from(text)
    }

    #[test]
    fn text_lines_lose_markup_and_extra_space() {
        let value = normalize(
            FormElementKind::TextLine,
            &single("  Ada <b>Lovelace</b>\u{7}\n  Jr "),
        )
        .unwrap();
        assert_eq!(value, json!("Ada Lovelace Jr"));
    }

    #[test]
    fn text_areas_keep_line_breaks() {
        let value = normalize(FormElementKind::TextArea, &single("line one\r\n<i>line</i> two\n")).unwrap();
        assert_eq!(value, json!("line one\nline two"));
    }

    #[test]
    fn rich_text_keeps_markup() {
        let value = normalize(FormElementKind::RichText, &single(" <p>hi</p> ")).unwrap();
        assert_eq!(value, json!("<p>hi</p>"));
    }

    #[test]
    fn numbers_become_json_numbers() {
        assert_eq!(normalize(FormElementKind::Numeric, &single(" 42 ")).unwrap(), json!(42));
        assert_eq!(
            normalize(FormElementKind::Numeric, &single("4.5")),
            Err(NormalizeError::NotInteger)
        );
        assert_eq!(normalize(FormElementKind::Decimal, &single("4.5")).unwrap(), json!(4.5));
        assert_eq!(
            normalize(FormElementKind::Decimal, &single("NaN")),
            Err(NormalizeError::NotNumber)
        );
    }

    #[test]
    fn dates_are_canonicalized() {
        for input in ["2026-03-01", "03/01/2026", "2026-03-01T10:00:00Z"] {
            assert_eq!(
                normalize(FormElementKind::Date, &single(input)).unwrap(),
                json!("2026-03-01"),
                "input {input}"
            );
        }
        assert_eq!(
            normalize(FormElementKind::Date, &single("next tuesday")),
            Err(NormalizeError::NotDate)
        );
    }

    #[test]
    fn multi_values_become_arrays_without_blanks() {
        let raw = RawValue::Multi(vec!["music".to_owned(), "  ".to_owned(), " film ".to_owned()]);
        assert_eq!(
            normalize(FormElementKind::MultiCheckbox, &raw).unwrap(),
            json!(["music", "film"])
        );
    }

    #[test]
    fn empty_values_by_kind() {
        assert!(is_empty_value(&empty_value(FormElementKind::TextLine)));
        assert!(is_empty_value(&empty_value(FormElementKind::MultiSelect)));
        assert!(is_empty_value(&empty_value(FormElementKind::Numeric)));
        assert!(!is_empty_value(&json!(0)));
    }

    #[test]
    fn comparable_text_matches_store_rendering() {
        assert_eq!(comparable_text(&json!("a@x.com")), "a@x.com");
        assert_eq!(comparable_text(&json!(12)), "12");
    }
}
