//! Pagination and filter query parameters for list endpoints
//!
//! Parameters are always emitted in the order `date_from`, `date_to`,
//! `offset`, `limit`, and absent fields produce no parameter at all.

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use url::form_urlencoded;

pub const DATE_FROM: &str = "date_from";
pub const DATE_TO: &str = "date_to";
pub const OFFSET: &str = "offset";
pub const LIMIT: &str = "limit";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Invalid timestamp for '{0}': {1}")]
    InvalidTimestamp(&'static str, String),

    #[error("Invalid number for '{0}': {1}")]
    InvalidNumber(&'static str, String),
}

/// Optional time window and paging for list operations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl ListFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_from(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_to(mut self, to: DateTime<Utc>) -> Self {
        self.to = Some(to);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Canonical query string without the leading `?`
    pub fn to_query_string(&self) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());

        if let Some(from) = self.from {
            query.append_pair(DATE_FROM, &from.to_rfc3339_opts(SecondsFormat::AutoSi, true));
        }
        if let Some(to) = self.to {
            query.append_pair(DATE_TO, &to.to_rfc3339_opts(SecondsFormat::AutoSi, true));
        }
        if let Some(offset) = self.offset {
            query.append_pair(OFFSET, &offset.to_string());
        }
        if let Some(limit) = self.limit {
            query.append_pair(LIMIT, &limit.to_string());
        }

        query.finish()
    }

    /// Append the filter to a URL that may already carry a query
    pub fn apply_to(&self, url: &str) -> String {
        let query = self.to_query_string();
        if query.is_empty() {
            url.to_string()
        } else if url.contains('?') {
            format!("{}&{}", url, query)
        } else {
            format!("{}?{}", url, query)
        }
    }

    /// Parse a query string (with or without leading `?`); unknown keys are ignored
    pub fn parse(query: &str) -> Result<Self, QueryError> {
        let mut filter = Self::default();
        let query = query.strip_prefix('?').unwrap_or(query);

        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                DATE_FROM => filter.from = Some(parse_timestamp(DATE_FROM, &value)?),
                DATE_TO => filter.to = Some(parse_timestamp(DATE_TO, &value)?),
                OFFSET => filter.offset = Some(parse_number(OFFSET, &value)?),
                LIMIT => filter.limit = Some(parse_number(LIMIT, &value)?),
                _ => {}
            }
        }

        Ok(filter)
    }
}

fn parse_timestamp(key: &'static str, value: &str) -> Result<DateTime<Utc>, QueryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| QueryError::InvalidTimestamp(key, value.to_string()))
}

fn parse_number(key: &'static str, value: &str) -> Result<u64, QueryError> {
    value
        .parse()
        .map_err(|_| QueryError::InvalidNumber(key, value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_empty_filter_encodes_to_nothing() {
        assert_eq!(ListFilter::new().to_query_string(), "");
        assert_eq!(ListFilter::new().apply_to("https://a/sessions"), "https://a/sessions");
    }

    #[test]
    fn test_full_filter_round_trip() {
        let from = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap();
        let filter = ListFilter::new()
            .with_from(from)
            .with_to(to)
            .with_offset(5)
            .with_limit(10);

        let query = filter.to_query_string();
        assert_eq!(
            query,
            "date_from=2024-03-01T08%3A00%3A00Z&date_to=2024-03-02T08%3A00%3A00Z&offset=5&limit=10"
        );
        assert_eq!(ListFilter::parse(&query).unwrap(), filter);
    }

    #[test]
    fn test_field_order_is_stable() {
        let filter = ListFilter::new().with_limit(10).with_offset(20);
        assert_eq!(filter.to_query_string(), "offset=20&limit=10");
    }

    #[test]
    fn test_apply_to_existing_query() {
        let filter = ListFilter::new().with_limit(1);
        assert_eq!(
            filter.apply_to("https://a/tokens?type=RFID"),
            "https://a/tokens?type=RFID&limit=1"
        );
        assert_eq!(filter.apply_to("https://a/tokens"), "https://a/tokens?limit=1");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            ListFilter::parse("?offset=abc"),
            Err(QueryError::InvalidNumber(OFFSET, _))
        ));
        assert!(matches!(
            ListFilter::parse("date_from=yesterday"),
            Err(QueryError::InvalidTimestamp(DATE_FROM, _))
        ));
    }
}
