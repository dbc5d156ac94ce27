//! Lookup operators and the comparison logic behind them.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use drip_core::{DripError, DripResult};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Whether a rule narrows the audience or removes users from it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    #[default]
    Filter,
    Exclude,
}

impl Method {
    /// Unknown modes behave as `filter`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "exclude" => Method::Exclude,
            _ => Method::Filter,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Filter => "filter",
            Method::Exclude => "exclude",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lookup {
    #[default]
    Exact,
    IExact,
    Contains,
    IContains,
    Regex,
    IRegex,
    Gt,
    Gte,
    Lt,
    Lte,
    StartsWith,
    EndsWith,
    IStartsWith,
    IEndsWith,
}

impl Lookup {
    pub const ALL: [Lookup; 14] = [
        Lookup::Exact,
        Lookup::IExact,
        Lookup::Contains,
        Lookup::IContains,
        Lookup::Regex,
        Lookup::IRegex,
        Lookup::Gt,
        Lookup::Gte,
        Lookup::Lt,
        Lookup::Lte,
        Lookup::StartsWith,
        Lookup::EndsWith,
        Lookup::IStartsWith,
        Lookup::IEndsWith,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Lookup::Exact => "exact",
            Lookup::IExact => "iexact",
            Lookup::Contains => "contains",
            Lookup::IContains => "icontains",
            Lookup::Regex => "regex",
            Lookup::IRegex => "iregex",
            Lookup::Gt => "gt",
            Lookup::Gte => "gte",
            Lookup::Lt => "lt",
            Lookup::Lte => "lte",
            Lookup::StartsWith => "startswith",
            Lookup::EndsWith => "endswith",
            Lookup::IStartsWith => "istartswith",
            Lookup::IEndsWith => "iendswith",
        }
    }

    pub fn is_case_insensitive(&self) -> bool {
        matches!(
            self,
            Lookup::IExact
                | Lookup::IContains
                | Lookup::IRegex
                | Lookup::IStartsWith
                | Lookup::IEndsWith
        )
    }

    pub fn is_regex(&self) -> bool {
        matches!(self, Lookup::Regex | Lookup::IRegex)
    }

    /// Compile a pattern for the regex lookups.
    pub fn compile(&self, pattern: &str) -> DripResult<Regex> {
        RegexBuilder::new(pattern)
            .case_insensitive(self.is_case_insensitive())
            .build()
            .map_err(|e| DripError::InvalidRule(format!("bad pattern '{pattern}': {e}")))
    }
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lookup {
    type Err = DripError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Lookup::ALL
            .iter()
            .copied()
            .find(|l| l.as_str() == wanted)
            .ok_or_else(|| DripError::InvalidRule(format!("unknown lookup type '{s}'")))
    }
}

/// A value reduced to something comparable.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
}

impl Scalar {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Scalar::Null,
            Value::Bool(b) => Scalar::Bool(*b),
            Value::Number(n) => n.as_f64().map_or(Scalar::Null, Scalar::Number),
            Value::String(s) => Scalar::Text(s.clone()),
            other => Scalar::Text(other.to_string()),
        }
    }

    fn as_text(&self) -> Option<String> {
        match self {
            Scalar::Null => None,
            Scalar::Bool(b) => Some(if *b { "True" } else { "False" }.to_string()),
            Scalar::Number(n) => Some(format_number(*n)),
            Scalar::Text(s) => Some(s.clone()),
            Scalar::Timestamp(ts) => Some(ts.to_rfc3339()),
            Scalar::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        }
    }

    fn partial_cmp_same(&self, other: &Scalar) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Bool(a), Scalar::Bool(b)) => a.partial_cmp(b),
            (Scalar::Number(a), Scalar::Number(b)) => a.partial_cmp(b),
            (Scalar::Text(a), Scalar::Text(b)) => a.partial_cmp(b),
            (Scalar::Timestamp(a), Scalar::Timestamp(b)) => a.partial_cmp(b),
            (Scalar::Date(a), Scalar::Date(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    parse_date(raw).and_then(|d| d.and_hms_opt(0, 0, 0)).map(|dt| dt.and_utc())
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|ts| ts.date_naive()))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "t" => Some(true),
        "false" | "0" | "f" => Some(false),
        _ => None,
    }
}

/// Coerce the stored value and the rule value into a shared representation,
/// the way a typed column would coerce its query argument.
fn align(actual: Scalar, expected: Scalar) -> Option<(Scalar, Scalar)> {
    match (actual, expected) {
        (Scalar::Null, _) | (_, Scalar::Null) => None,
        (Scalar::Text(s), e @ Scalar::Timestamp(_)) => Some((Scalar::Timestamp(parse_timestamp(&s)?), e)),
        (Scalar::Text(s), e @ Scalar::Date(_)) => Some((Scalar::Date(parse_date(&s)?), e)),
        (Scalar::Timestamp(ts), e @ Scalar::Date(_)) => Some((Scalar::Date(ts.date_naive()), e)),
        (a @ Scalar::Timestamp(_), Scalar::Text(s)) => Some((a, Scalar::Timestamp(parse_timestamp(&s)?))),
        (a @ Scalar::Date(_), Scalar::Text(s)) => Some((a, Scalar::Date(parse_date(&s)?))),
        (a @ Scalar::Number(_), Scalar::Text(s)) => match s.trim().parse::<f64>() {
            Ok(n) => Some((a, Scalar::Number(n))),
            Err(_) => Some((Scalar::Text(a.as_text()?), Scalar::Text(s))),
        },
        (Scalar::Text(s), e @ Scalar::Number(_)) => Some((Scalar::Number(s.trim().parse().ok()?), e)),
        (a @ Scalar::Bool(_), Scalar::Text(s)) => Some((a, Scalar::Bool(parse_bool(&s)?))),
        (Scalar::Text(s), e @ Scalar::Bool(_)) => Some((Scalar::Bool(parse_bool(&s)?), e)),
        (Scalar::Number(n), e @ Scalar::Bool(_)) => Some((Scalar::Bool(n != 0.0), e)),
        (a, e) => Some((a, e)),
    }
}

/// Evaluate one lookup. `pattern` carries a precompiled regex when the rule
/// value is a literal; field-reference patterns are compiled per row.
pub fn compare(actual: &Value, lookup: Lookup, expected: &Scalar, pattern: Option<&Regex>) -> bool {
    let actual = Scalar::from_json(actual);

    match lookup {
        Lookup::Exact | Lookup::IExact => {
            let Some((a, e)) = align(actual, expected.clone()) else {
                return false;
            };
            match (lookup, &a, &e) {
                (Lookup::IExact, Scalar::Text(a), Scalar::Text(e)) => a.to_lowercase() == e.to_lowercase(),
                _ => a == e,
            }
        }
        Lookup::Gt | Lookup::Gte | Lookup::Lt | Lookup::Lte => {
            let Some((a, e)) = align(actual, expected.clone()) else {
                return false;
            };
            let Some(order) = a.partial_cmp_same(&e) else {
                return false;
            };
            match lookup {
                Lookup::Gt => order == Ordering::Greater,
                Lookup::Gte => order != Ordering::Less,
                Lookup::Lt => order == Ordering::Less,
                _ => order != Ordering::Greater,
            }
        }
        Lookup::Regex | Lookup::IRegex => {
            let Some(text) = actual.as_text() else {
                return false;
            };
            match pattern {
                Some(re) => re.is_match(&text),
                None => expected
                    .as_text()
                    .and_then(|p| lookup.compile(&p).ok())
                    .is_some_and(|re| re.is_match(&text)),
            }
        }
        Lookup::Contains
        | Lookup::IContains
        | Lookup::StartsWith
        | Lookup::IStartsWith
        | Lookup::EndsWith
        | Lookup::IEndsWith => {
            let (Some(mut a), Some(mut e)) = (actual.as_text(), expected.as_text()) else {
                return false;
            };
            if lookup.is_case_insensitive() {
                a = a.to_lowercase();
                e = e.to_lowercase();
            }
            match lookup {
                Lookup::Contains | Lookup::IContains => a.contains(&e),
                Lookup::StartsWith | Lookup::IStartsWith => a.starts_with(&e),
                _ => a.ends_with(&e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn text(s: &str) -> Scalar {
        Scalar::Text(s.to_string())
    }

    #[test]
    fn test_lookup_names_round_trip() {
        for lookup in Lookup::ALL {
            assert_eq!(lookup.as_str().parse::<Lookup>().unwrap(), lookup);
        }
        assert!("between".parse::<Lookup>().is_err());
    }

    #[test]
    fn test_unknown_method_defaults_to_filter() {
        assert_eq!(Method::parse_lenient("exclude"), Method::Exclude);
        assert_eq!(Method::parse_lenient("whatever"), Method::Filter);
    }

    #[test]
    fn test_numeric_text_coerces_against_number_fields() {
        assert!(compare(&json!(18), Lookup::Gte, &text("18"), None));
        assert!(compare(&json!(30), Lookup::Gt, &text("18"), None));
        assert!(!compare(&json!(17), Lookup::Gte, &text("18"), None));
        assert!(compare(&json!(18.0), Lookup::Exact, &text("18"), None));
    }

    #[test]
    fn test_case_insensitive_variants() {
        assert!(compare(&json!("France"), Lookup::IExact, &text("FRANCE"), None));
        assert!(!compare(&json!("France"), Lookup::Exact, &text("FRANCE"), None));
        assert!(compare(&json!("Hello World"), Lookup::IContains, &text("WORLD"), None));
        assert!(compare(&json!("Hello"), Lookup::IStartsWith, &text("he"), None));
        assert!(compare(&json!("Hello"), Lookup::IEndsWith, &text("LO"), None));
        assert!(!compare(&json!("Hello"), Lookup::EndsWith, &text("LO"), None));
    }

    #[test]
    fn test_regex_lookups() {
        let re = Lookup::Regex.compile("^a.+@example\\.com$").unwrap();
        assert!(compare(&json!("ada@example.com"), Lookup::Regex, &text("unused"), Some(&re)));
        assert!(compare(&json!("ADA"), Lookup::IRegex, &text("^ada$"), None));
        assert!(Lookup::Regex.compile("(").is_err());
    }

    #[test]
    fn test_timestamps_compare_against_rfc3339_strings() {
        let cutoff = Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap();
        let expected = Scalar::Timestamp(cutoff);
        assert!(compare(&json!("2024-01-01T10:00:00Z"), Lookup::Lt, &expected, None));
        assert!(!compare(&json!("2024-01-09T00:00:00+00:00"), Lookup::Lt, &expected, None));
        assert!(!compare(&json!("not a date"), Lookup::Lt, &expected, None));
    }

    #[test]
    fn test_dates_compare_against_date_and_datetime_strings() {
        let day = Scalar::Date(NaiveDate::from_ymd_opt(2024, 1, 18).unwrap());
        assert!(compare(&json!("2024-01-18"), Lookup::Exact, &day, None));
        assert!(compare(&json!("2024-01-18T23:00:00Z"), Lookup::Exact, &day, None));
        assert!(compare(&json!("2024-01-17"), Lookup::Lt, &day, None));
    }

    #[test]
    fn test_booleans_compare_against_bool_fields() {
        assert!(compare(&json!(true), Lookup::Exact, &Scalar::Bool(true), None));
        assert!(!compare(&json!(false), Lookup::Exact, &Scalar::Bool(true), None));
        assert!(compare(&json!(1), Lookup::Exact, &Scalar::Bool(true), None));
    }

    #[test]
    fn test_null_never_matches() {
        assert!(!compare(&Value::Null, Lookup::Exact, &text("x"), None));
        assert!(!compare(&Value::Null, Lookup::Contains, &text("x"), None));
    }
}
