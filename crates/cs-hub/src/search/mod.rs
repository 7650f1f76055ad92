//! # Search Filter Builder
//!
//! Translates `/search` query parameters into a [`Filter`] and [`Options`].
//! Date parse failures abort the search; an unusable `limit` silently falls
//! back to [`DEFAULT_LIMIT`].

use chrono::{DateTime, Utc};
use cs_core::{Field, FieldParseError, Filter, Options, SortKey};
use std::collections::HashMap;

pub const DEFAULT_LIMIT: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("invalid {param} '{value}': {source}")]
    InvalidDate {
        param: &'static str,
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("invalid orderby: {0}")]
    UnknownField(#[from] FieldParseError),
}

/// Multi-valued query parameters, in arrival order per key.
#[derive(Debug, Clone, Default)]
pub struct QueryParams(HashMap<String, Vec<String>>);

impl QueryParams {
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut params: HashMap<String, Vec<String>> = HashMap::new();
        for (key, value) in pairs {
            params.entry(key).or_default().push(value);
        }
        Self(params)
    }

    /// First sanitized, non-empty value of `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.0
            .get(key)
            .and_then(|values| values.first())
            .map(|v| sanitize(v))
            .filter(|v| !v.is_empty())
    }

    /// Every sanitized, non-empty value of `key`.
    pub fn get_all(&self, key: &str) -> Vec<String> {
        self.0
            .get(key)
            .map(|values| {
                values
                    .iter()
                    .map(|v| sanitize(v))
                    .filter(|v| !v.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Trim and drop control characters.
pub fn sanitize(value: &str) -> String {
    value.trim().chars().filter(|c| !c.is_control()).collect()
}

/// Escape like-pattern operators so the value matches literally.
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub fn build_filter(params: &QueryParams) -> Result<(Filter, Options), FilterError> {
    let mut filter = Filter::new();

    if let Some(value) = params.get("startdate") {
        filter.start_date = Some(parse_request_date("startdate", value)?);
    }
    if let Some(value) = params.get("enddate") {
        filter.end_date = Some(parse_request_date("enddate", value)?);
    }

    if let Some(touser) = params.get("touser") {
        filter.like.insert(Field::ToUser, escape_like(&touser));
    }
    if let Some(fromuser) = params.get("fromuser") {
        filter.like.insert(Field::FromUser, escape_like(&fromuser));
    }
    if let Some(sourceip) = params.get("sourceip") {
        filter.equals.insert(Field::SourceIp, sourceip);
    }
    if let Some(destip) = params.get("destip") {
        filter.equals.insert(Field::DestinationIp, destip);
    }

    let limit = params
        .get("limit")
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_LIMIT);

    let order = params.get_all("orderby");
    let sort = if order.is_empty() {
        vec![SortKey::desc(Field::DateTime)]
    } else {
        order
            .iter()
            .map(|o| o.parse::<SortKey>())
            .collect::<Result<Vec<_>, _>>()?
    };

    let options = Options {
        limit: Some(limit),
        sort,
        unique_call_id: true,
    };

    Ok((filter, options))
}

fn parse_request_date(param: &'static str, value: String) -> Result<DateTime<Utc>, FilterError> {
    match DateTime::parse_from_rfc3339(&value) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(source) => Err(FilterError::InvalidDate {
            param,
            value,
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn params(pairs: &[(&str, &str)]) -> QueryParams {
        QueryParams::from_pairs(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        )
    }

    #[test]
    fn test_defaults() {
        let (filter, options) = build_filter(&params(&[])).unwrap();
        assert_eq!(filter, Filter::new());
        assert_eq!(options.limit, Some(50));
        assert_eq!(options.sort, vec![SortKey::desc(Field::DateTime)]);
        assert!(options.unique_call_id);
    }

    #[test]
    fn test_unparsable_limit_falls_back() {
        let (_, options) = build_filter(&params(&[("limit", "notanumber")])).unwrap();
        assert_eq!(options.limit, Some(50));

        let (_, options) = build_filter(&params(&[("limit", "0")])).unwrap();
        assert_eq!(options.limit, Some(50));

        let (_, options) = build_filter(&params(&[("limit", " 10 ")])).unwrap();
        assert_eq!(options.limit, Some(10));
    }

    #[test]
    fn test_bad_date_is_reported() {
        let err = build_filter(&params(&[("startdate", "not-a-date")])).unwrap_err();
        assert!(matches!(
            err,
            FilterError::InvalidDate {
                param: "startdate",
                ..
            }
        ));

        let err = build_filter(&params(&[("enddate", "2024-13-01")])).unwrap_err();
        assert!(matches!(err, FilterError::InvalidDate { param: "enddate", .. }));
    }

    #[test]
    fn test_dates_normalized_to_utc() {
        let (filter, _) = build_filter(&params(&[
            ("startdate", "2024-03-01T10:00:00+02:00"),
            ("enddate", "2024-03-01T12:00:00Z"),
        ]))
        .unwrap();
        assert_eq!(
            filter.start_date,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap())
        );
        assert_eq!(
            filter.end_date,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_clause_mapping() {
        let (filter, _) = build_filter(&params(&[
            ("touser", "bob"),
            ("fromuser", "alice"),
            ("sourceip", "10.0.0.1"),
            ("destip", "10.0.0.2"),
            ("unknown", "ignored"),
        ]))
        .unwrap();
        assert_eq!(filter.like.get(&Field::ToUser).map(String::as_str), Some("bob"));
        assert_eq!(filter.like.get(&Field::FromUser).map(String::as_str), Some("alice"));
        assert_eq!(
            filter.equals.get(&Field::SourceIp).map(String::as_str),
            Some("10.0.0.1")
        );
        assert_eq!(
            filter.equals.get(&Field::DestinationIp).map(String::as_str),
            Some("10.0.0.2")
        );
        assert_eq!(filter.equals.len(), 2);
        assert!(filter.or.is_empty());
    }

    #[test]
    fn test_like_values_are_escaped() {
        let (filter, _) = build_filter(&params(&[("touser", " 100%_b\\ob\n")])).unwrap();
        assert_eq!(
            filter.like.get(&Field::ToUser).map(String::as_str),
            Some(r"100\%\_b\\ob")
        );
    }

    #[test]
    fn test_blank_values_are_absent() {
        let (filter, _) = build_filter(&params(&[("sourceip", "   "), ("startdate", "")])).unwrap();
        assert!(filter.equals.is_empty());
        assert!(filter.start_date.is_none());
    }

    #[test]
    fn test_orderby_overrides_default() {
        let (_, options) = build_filter(&params(&[
            ("orderby", "callid"),
            ("orderby", "-microseconds"),
        ]))
        .unwrap();
        assert_eq!(
            options.sort,
            vec![SortKey::asc(Field::CallId), SortKey::desc(Field::Microseconds)]
        );

        let err = build_filter(&params(&[("orderby", "-bogus")])).unwrap_err();
        assert!(matches!(err, FilterError::UnknownField(_)));
    }
}
