//! Turns a rule's raw value string into a typed value as of a given moment.
//!
//! Dispatch is by prefix, first match wins:
//! `now-`/`now+` yield a timestamp, `today-`/`today+` a calendar date,
//! `F_<field>` a reference to another field on the same row, `True`/`False`
//! a boolean, and anything else passes through as text.

use chrono::{DateTime, Duration, FixedOffset, Months, NaiveDate, Offset, Utc};
use drip_core::{DripError, DripResult};
use serde::{Deserialize, Serialize};

use crate::field::FieldPath;

/// The moment rules are evaluated at. Always supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationTime {
    pub now: DateTime<Utc>,
    /// Offset used to decide which calendar day `today` is.
    pub offset: FixedOffset,
}

impl EvaluationTime {
    pub fn utc(now: DateTime<Utc>) -> Self {
        Self {
            now,
            offset: Utc.fix(),
        }
    }

    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum RuleValue {
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    /// Compared per row against another field of the same user.
    Field(FieldPath),
    Bool(bool),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sign {
    Plus,
    Minus,
}

pub fn resolve(raw: &str, at: &EvaluationTime) -> DripResult<RuleValue> {
    if let Some(expr) = raw.strip_prefix("now-") {
        return shift(at.now, expr, Sign::Minus).map(RuleValue::Timestamp);
    }
    if let Some(expr) = raw.strip_prefix("now+") {
        return shift(at.now, expr, Sign::Plus).map(RuleValue::Timestamp);
    }
    if let Some(expr) = raw.strip_prefix("today-") {
        return shift(at.now, expr, Sign::Minus)
            .map(|ts| RuleValue::Date(ts.with_timezone(&at.offset).date_naive()));
    }
    if let Some(expr) = raw.strip_prefix("today+") {
        return shift(at.now, expr, Sign::Plus)
            .map(|ts| RuleValue::Date(ts.with_timezone(&at.offset).date_naive()));
    }
    if let Some(field) = raw.strip_prefix("F_") {
        return FieldPath::parse(field)
            .map(RuleValue::Field)
            .map_err(|_| DripError::RuleResolution(format!("malformed field reference '{raw}'")));
    }
    match raw {
        "True" => Ok(RuleValue::Bool(true)),
        "False" => Ok(RuleValue::Bool(false)),
        _ => Ok(RuleValue::Text(raw.to_string())),
    }
}

fn shift(now: DateTime<Utc>, expr: &str, sign: Sign) -> DripResult<DateTime<Utc>> {
    let span = RelativeSpan::parse(expr)?;
    span.apply(now, sign)
        .ok_or_else(|| DripError::RuleResolution(format!("'{expr}' is out of range")))
}

/// A parsed relative-time phrase such as `7 days` or `1 month 2 weeks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelativeSpan {
    pub months: u32,
    pub duration: Duration,
}

impl RelativeSpan {
    pub fn parse(expr: &str) -> DripResult<Self> {
        let normalized = expr.trim().to_ascii_lowercase();
        let mut tokens: Vec<&str> = normalized
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty() && *t != "and")
            .collect();
        if tokens.last() == Some(&"ago") {
            tokens.pop();
        }
        if tokens.first() == Some(&"in") {
            tokens.remove(0);
        }
        if tokens.is_empty() {
            return Err(bad_phrase(expr));
        }

        let mut span = RelativeSpan {
            months: 0,
            duration: Duration::zero(),
        };
        let mut iter = tokens.into_iter();
        while let Some(token) = iter.next() {
            let (amount, unit) = match split_amount(token) {
                Some((amount, "")) => (amount, iter.next().ok_or_else(|| bad_phrase(expr))?),
                Some((amount, unit)) => (amount, unit),
                None => (1, token),
            };
            span.add(amount, unit).ok_or_else(|| bad_phrase(expr))?;
        }
        Ok(span)
    }

    fn add(&mut self, amount: i64, unit: &str) -> Option<()> {
        let months = |n: i64| u32::try_from(n).ok();
        match unit {
            "s" | "sec" | "secs" | "second" | "seconds" => {
                self.duration = self.duration.checked_add(&Duration::try_seconds(amount)?)?;
            }
            "m" | "min" | "mins" | "minute" | "minutes" => {
                self.duration = self.duration.checked_add(&Duration::try_minutes(amount)?)?;
            }
            "h" | "hr" | "hrs" | "hour" | "hours" => {
                self.duration = self.duration.checked_add(&Duration::try_hours(amount)?)?;
            }
            "d" | "day" | "days" => {
                self.duration = self.duration.checked_add(&Duration::try_days(amount)?)?;
            }
            "w" | "week" | "weeks" => {
                self.duration = self.duration.checked_add(&Duration::try_weeks(amount)?)?;
            }
            "month" | "months" => {
                self.months = self.months.checked_add(months(amount)?)?;
            }
            "y" | "yr" | "yrs" | "year" | "years" => {
                self.months = self.months.checked_add(months(amount.checked_mul(12)?)?)?;
            }
            _ => return None,
        }
        Some(())
    }

    fn apply(&self, now: DateTime<Utc>, sign: Sign) -> Option<DateTime<Utc>> {
        match sign {
            Sign::Minus => now
                .checked_sub_months(Months::new(self.months))?
                .checked_sub_signed(self.duration),
            Sign::Plus => now
                .checked_add_months(Months::new(self.months))?
                .checked_add_signed(self.duration),
        }
    }
}

/// `7` -> (7, ""), `7days` -> (7, "days"), `a`/`an` -> (1, "").
fn split_amount(token: &str) -> Option<(i64, &str)> {
    if token == "a" || token == "an" {
        return Some((1, ""));
    }
    let digits = token.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let amount = token[..digits].parse().ok()?;
    Some((amount, &token[digits..]))
}

fn bad_phrase(expr: &str) -> DripError {
    DripError::RuleResolution(format!("could not parse relative time '{expr}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn jan_15() -> EvaluationTime {
        EvaluationTime::utc(Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_now_minus_days_is_a_timestamp() {
        let value = resolve("now-7 days", &jan_15()).unwrap();
        assert_eq!(
            value,
            RuleValue::Timestamp(Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_now_plus_adds() {
        let value = resolve("now+2 hours", &jan_15()).unwrap();
        assert_eq!(
            value,
            RuleValue::Timestamp(Utc.with_ymd_and_hms(2024, 1, 15, 2, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_today_plus_days_is_a_date() {
        let value = resolve("today+3 days", &jan_15()).unwrap();
        assert_eq!(value, RuleValue::Date(NaiveDate::from_ymd_opt(2024, 1, 18).unwrap()));
    }

    #[test]
    fn test_today_uses_the_configured_offset() {
        let at = EvaluationTime::utc(Utc.with_ymd_and_hms(2024, 1, 15, 22, 0, 0).unwrap())
            .with_offset(FixedOffset::east_opt(3 * 3600).unwrap());
        let value = resolve("today-1 day", &at).unwrap();
        assert_eq!(value, RuleValue::Date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()));
    }

    #[test]
    fn test_months_and_years_are_calendar_aware() {
        let value = resolve("now-1 month", &jan_15()).unwrap();
        assert_eq!(
            value,
            RuleValue::Timestamp(Utc.with_ymd_and_hms(2023, 12, 15, 0, 0, 0).unwrap())
        );
        let value = resolve("today+1 year", &jan_15()).unwrap();
        assert_eq!(value, RuleValue::Date(NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()));
    }

    #[test]
    fn test_compound_and_informal_phrases() {
        let span = RelativeSpan::parse("1 week, 2 days ago").unwrap();
        assert_eq!(span.duration, Duration::days(9));
        let span = RelativeSpan::parse("an hour").unwrap();
        assert_eq!(span.duration, Duration::hours(1));
        let span = RelativeSpan::parse("30min").unwrap();
        assert_eq!(span.duration, Duration::minutes(30));
    }

    #[test]
    fn test_unparseable_phrases_are_errors() {
        for raw in ["now-", "now-soon", "today+3 fortnights", "now-7"] {
            let err = resolve(raw, &jan_15()).unwrap_err();
            assert!(matches!(err, DripError::RuleResolution(_)), "{raw}: {err}");
        }
    }

    #[test]
    fn test_field_references() {
        assert_eq!(
            resolve("F_last_login", &jan_15()).unwrap(),
            RuleValue::Field(FieldPath::single("last_login"))
        );
        assert!(matches!(
            resolve("F_", &jan_15()),
            Err(DripError::RuleResolution(_))
        ));
        assert!(resolve("F_bad name", &jan_15()).is_err());
    }

    #[test]
    fn test_boolean_literals_and_passthrough() {
        assert_eq!(resolve("True", &jan_15()).unwrap(), RuleValue::Bool(true));
        assert_eq!(resolve("False", &jan_15()).unwrap(), RuleValue::Bool(false));
        assert_eq!(resolve("true", &jan_15()).unwrap(), RuleValue::Text("true".into()));
        assert_eq!(resolve("18", &jan_15()).unwrap(), RuleValue::Text("18".into()));
    }

    #[test]
    fn test_later_now_gives_later_cutoff() {
        let earlier = resolve("now-1 day", &jan_15()).unwrap();
        let later_at =
            EvaluationTime::utc(Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap());
        let later = resolve("now-1 day", &later_at).unwrap();
        assert_ne!(earlier, later);
    }
}
