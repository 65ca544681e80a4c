//! Query builder for Banner course searches.
//!
//! A `SearchQuery` is a bag of all-optional filters. Calling [`SearchQuery::build`]
//! validates the combination (ranges must not be inverted, pagination must be
//! sane) and yields a [`ValidatedQuery`]; the wire-parameter mapping is a
//! pure function of that validated value. Encoding rules the upstream
//! requires: multi-valued fields are comma-joined, keywords are space-joined,
//! times expand to 12-hour (hour, minute, meridiem) triples, and
//! offset/max_results are always present.

use std::collections::HashMap;

use chrono::{NaiveTime, Timelike};

/// A query combination the upstream would reject or misinterpret.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum QueryBuildError {
    #[error("start time {start} is after end time {end}")]
    InvertedTimeRange { start: NaiveTime, end: NaiveTime },
    #[error("credit range {low}..{high} is inverted")]
    InvertedCreditRange { low: i32, high: i32 },
    #[error("course number range {low}..{high} is inverted")]
    InvertedCourseNumberRange { low: i32, high: i32 },
    #[error("page offset {0} is negative")]
    NegativeOffset(i32),
}

/// Builder for course search queries.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    subject: Option<String>,
    title: Option<String>,
    keywords: Option<Vec<String>>,
    course_reference_number: Option<String>,
    open_only: Option<bool>,
    term_part: Option<Vec<String>>,
    campus: Option<Vec<String>>,
    instructional_method: Option<Vec<String>>,
    attributes: Option<Vec<String>>,
    instructor: Option<Vec<u64>>,
    start_time: Option<NaiveTime>,
    end_time: Option<NaiveTime>,
    min_credits: Option<i32>,
    max_credits: Option<i32>,
    course_number_low: Option<i32>,
    course_number_high: Option<i32>,
    offset: i32,
    max_results: i32,
}

impl SearchQuery {
    /// Creates a new query with the upstream's defaults (offset 0, 8 results).
    pub fn new() -> Self {
        Self {
            offset: 0,
            max_results: 8,
            ..Default::default()
        }
    }

    pub fn subject<S: Into<String>>(mut self, subject: S) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn title<S: Into<String>>(mut self, title: S) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the course reference number (CRN) to search for.
    pub fn course_reference_number<S: Into<String>>(mut self, crn: S) -> Self {
        self.course_reference_number = Some(crn.into());
        self
    }

    pub fn keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = Some(keywords);
        self
    }

    /// Adds a single keyword to the query.
    pub fn keyword<S: Into<String>>(mut self, keyword: S) -> Self {
        self.keywords
            .get_or_insert_with(Vec::new)
            .push(keyword.into());
        self
    }

    pub fn open_only(mut self, open_only: bool) -> Self {
        self.open_only = Some(open_only);
        self
    }

    pub fn term_part(mut self, term_part: Vec<String>) -> Self {
        self.term_part = Some(term_part);
        self
    }

    pub fn campus(mut self, campus: Vec<String>) -> Self {
        self.campus = Some(campus);
        self
    }

    pub fn instructional_method(mut self, instructional_method: Vec<String>) -> Self {
        self.instructional_method = Some(instructional_method);
        self
    }

    pub fn attributes(mut self, attributes: Vec<String>) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Sets the Banner-side instructor ids to filter by.
    pub fn instructor(mut self, instructor: Vec<u64>) -> Self {
        self.instructor = Some(instructor);
        self
    }

    pub fn start_time(mut self, start_time: NaiveTime) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn end_time(mut self, end_time: NaiveTime) -> Self {
        self.end_time = Some(end_time);
        self
    }

    /// Sets the credit-hour range.
    pub fn credits(mut self, low: i32, high: i32) -> Self {
        self.min_credits = Some(low);
        self.max_credits = Some(high);
        self
    }

    /// Sets the course-number range.
    pub fn course_numbers(mut self, low: i32, high: i32) -> Self {
        self.course_number_low = Some(low);
        self.course_number_high = Some(high);
        self
    }

    pub fn offset(mut self, offset: i32) -> Self {
        self.offset = offset;
        self
    }

    /// Sets the page size, clamped to 500 to bound upstream load.
    pub fn max_results(mut self, max_results: i32) -> Self {
        self.max_results = max_results.clamp(1, 500);
        self
    }

    pub fn get_subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn get_max_results(&self) -> i32 {
        self.max_results
    }

    /// Validate the assembled filters.
    ///
    /// Inverted ranges would not error upstream; Banner silently returns an
    /// empty result set, which the scraper would then record as a legitimate
    /// observation. Rejecting them here keeps that garbage out of the store.
    pub fn build(self) -> Result<ValidatedQuery, QueryBuildError> {
        if let (Some(start), Some(end)) = (self.start_time, self.end_time)
            && start > end
        {
            return Err(QueryBuildError::InvertedTimeRange { start, end });
        }

        if let (Some(low), Some(high)) = (self.min_credits, self.max_credits)
            && low > high
        {
            return Err(QueryBuildError::InvertedCreditRange { low, high });
        }

        if let (Some(low), Some(high)) = (self.course_number_low, self.course_number_high)
            && low > high
        {
            return Err(QueryBuildError::InvertedCourseNumberRange { low, high });
        }

        if self.offset < 0 {
            return Err(QueryBuildError::NegativeOffset(self.offset));
        }

        Ok(ValidatedQuery { query: self })
    }
}

/// A query that passed validation; the only thing the wire mapping accepts.
#[derive(Debug, Clone)]
pub struct ValidatedQuery {
    query: SearchQuery,
}

impl ValidatedQuery {
    /// Converts the query into URL parameters for the Banner API.
    pub fn to_params(&self) -> HashMap<String, String> {
        let mut params = HashMap::new();

        for field in self.fields() {
            match field {
                QueryField::Single {
                    param_key, value, ..
                } => {
                    params.insert(param_key.to_string(), value);
                }
                QueryField::Time { prefix, time, .. } => {
                    let (hour, minute, meridiem) = format_time_parameter(time);
                    params.insert(format!("select_{prefix}_hour"), hour);
                    params.insert(format!("select_{prefix}_min"), minute);
                    params.insert(format!("select_{prefix}_ampm"), meridiem);
                }
            }
        }

        params
    }

    /// The list of active query fields.
    ///
    /// Both `to_params()` and `Display` consume this, so a field added here
    /// covers both serializations.
    fn fields(&self) -> Vec<QueryField> {
        let query = &self.query;
        let mut fields = Vec::new();

        if let Some(ref subject) = query.subject {
            fields.push(QueryField::single("txt_subject", "subject", subject.clone()));
        }
        if let Some(ref title) = query.title {
            fields.push(QueryField::single(
                "txt_courseTitle",
                "title",
                title.trim().to_string(),
            ));
        }
        if let Some(ref crn) = query.course_reference_number {
            fields.push(QueryField::single(
                "txt_courseReferenceNumber",
                "crn",
                crn.clone(),
            ));
        }
        if let Some(ref keywords) = query.keywords {
            fields.push(QueryField::single(
                "txt_keywordlike",
                "keywords",
                keywords.join(" "),
            ));
        }
        if query.open_only == Some(true) {
            fields.push(QueryField::single(
                "chk_open_only",
                "openOnly",
                "true".to_string(),
            ));
        }
        if let Some(ref term_part) = query.term_part {
            fields.push(QueryField::single(
                "txt_partOfTerm",
                "termPart",
                term_part.join(","),
            ));
        }
        if let Some(ref campus) = query.campus {
            fields.push(QueryField::single("txt_campus", "campus", campus.join(",")));
        }
        if let Some(ref instructional_method) = query.instructional_method {
            fields.push(QueryField::single(
                "txt_instructionalMethod",
                "instructionalMethod",
                instructional_method.join(","),
            ));
        }
        if let Some(ref attributes) = query.attributes {
            fields.push(QueryField::single(
                "txt_attribute",
                "attributes",
                attributes.join(","),
            ));
        }
        if let Some(ref instructor) = query.instructor {
            let value = instructor
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(",");
            fields.push(QueryField::single("txt_instructor", "instructor", value));
        }
        if let Some(start_time) = query.start_time {
            fields.push(QueryField::Time {
                prefix: "start",
                display_name: "startTime",
                time: start_time,
            });
        }
        if let Some(end_time) = query.end_time {
            fields.push(QueryField::Time {
                prefix: "end",
                display_name: "endTime",
                time: end_time,
            });
        }
        if let Some(min_credits) = query.min_credits {
            fields.push(QueryField::single(
                "txt_credithourlow",
                "minCredits",
                min_credits.to_string(),
            ));
        }
        if let Some(max_credits) = query.max_credits {
            fields.push(QueryField::single(
                "txt_credithourhigh",
                "maxCredits",
                max_credits.to_string(),
            ));
        }
        if let Some(low) = query.course_number_low {
            fields.push(QueryField::single(
                "txt_course_number_range",
                "courseNumberLow",
                low.to_string(),
            ));
        }
        if let Some(high) = query.course_number_high {
            fields.push(QueryField::single(
                "txt_course_number_range_to",
                "courseNumberHigh",
                high.to_string(),
            ));
        }
        fields.push(QueryField::single(
            "pageOffset",
            "offset",
            query.offset.to_string(),
        ));
        fields.push(QueryField::single(
            "pageMaxSize",
            "maxResults",
            query.max_results.to_string(),
        ));

        fields
    }
}

/// A single field in a search query, unifying `to_params()` and `Display`.
enum QueryField {
    /// A simple key-value field.
    Single {
        param_key: &'static str,
        display_name: &'static str,
        value: String,
    },
    /// A time field that expands to three params (hour, min, ampm).
    Time {
        prefix: &'static str,
        display_name: &'static str,
        time: NaiveTime,
    },
}

impl QueryField {
    fn single(param_key: &'static str, display_name: &'static str, value: String) -> Self {
        Self::Single {
            param_key,
            display_name,
            value,
        }
    }
}

impl std::fmt::Display for ValidatedQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .fields()
            .into_iter()
            .map(|field| match field {
                QueryField::Single {
                    display_name,
                    value,
                    ..
                } => format!("{display_name}={value}"),
                QueryField::Time {
                    display_name, time, ..
                } => {
                    let (hour, minute, meridiem) = format_time_parameter(time);
                    format!("{display_name}={hour}:{minute}:{meridiem}")
                }
            })
            .collect();

        write!(f, "{}", parts.join(", "))
    }
}

/// Formats a `NaiveTime` into hour, minute and meridiem strings.
///
/// 12-hour clock: midnight is 12:00 AM, noon is 12:00 PM, 13..=23 map to
/// hour minus twelve.
pub(crate) fn format_time_parameter(time: NaiveTime) -> (String, String, String) {
    let hours = time.hour();
    let minutes = time.minute();

    let meridiem = if hours >= 12 { "PM" } else { "AM" };
    let hour_12 = match hours % 12 {
        0 => 12,
        h => h,
    };

    (
        hour_12.to_string(),
        minutes.to_string(),
        meridiem.to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_of(query: SearchQuery) -> HashMap<String, String> {
        query.build().expect("query should validate").to_params()
    }

    // -- validation --

    #[test]
    fn inverted_time_range_rejected() {
        let result = SearchQuery::new()
            .start_time(NaiveTime::from_hms_opt(17, 0, 0).unwrap())
            .end_time(NaiveTime::from_hms_opt(9, 0, 0).unwrap())
            .build();
        assert!(matches!(
            result,
            Err(QueryBuildError::InvertedTimeRange { .. })
        ));
    }

    #[test]
    fn inverted_credit_range_rejected() {
        let result = SearchQuery::new().credits(10, 3).build();
        assert_eq!(
            result.unwrap_err(),
            QueryBuildError::InvertedCreditRange { low: 10, high: 3 }
        );
    }

    #[test]
    fn inverted_course_number_range_rejected() {
        let result = SearchQuery::new().course_numbers(3999, 3000).build();
        assert_eq!(
            result.unwrap_err(),
            QueryBuildError::InvertedCourseNumberRange {
                low: 3999,
                high: 3000
            }
        );
    }

    #[test]
    fn negative_offset_rejected() {
        let result = SearchQuery::new().offset(-1).build();
        assert_eq!(result.unwrap_err(), QueryBuildError::NegativeOffset(-1));
    }

    #[test]
    fn equal_range_bounds_build() {
        assert!(SearchQuery::new().credits(3, 3).build().is_ok());
        assert!(SearchQuery::new().course_numbers(3000, 3000).build().is_ok());
        let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap();
        assert!(SearchQuery::new()
            .start_time(noon)
            .end_time(noon)
            .build()
            .is_ok());
    }

    #[test]
    fn half_open_ranges_build() {
        // A lone bound has nothing to be inverted against
        assert!(
            SearchQuery::new()
                .start_time(NaiveTime::from_hms_opt(17, 0, 0).unwrap())
                .build()
                .is_ok()
        );
    }

    // -- wire encoding --

    #[test]
    fn new_defaults_always_present() {
        let q = SearchQuery::new();
        assert_eq!(q.get_max_results(), 8);
        assert!(q.get_subject().is_none());
        let params = params_of(q);
        assert_eq!(params.get("pageMaxSize").unwrap(), "8");
        assert_eq!(params.get("pageOffset").unwrap(), "0");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn subject_param() {
        let params = params_of(SearchQuery::new().subject("CS"));
        assert_eq!(params.get("txt_subject").unwrap(), "CS");
    }

    #[test]
    fn title_trims_whitespace() {
        let params = params_of(SearchQuery::new().title("  Intro to CS  "));
        assert_eq!(params.get("txt_courseTitle").unwrap(), "Intro to CS");
    }

    #[test]
    fn crn_param() {
        let params = params_of(SearchQuery::new().course_reference_number("12345"));
        assert_eq!(params.get("txt_courseReferenceNumber").unwrap(), "12345");
    }

    #[test]
    fn keywords_joined_with_spaces() {
        let params = params_of(SearchQuery::new().keyword("data").keyword("science"));
        assert_eq!(params.get("txt_keywordlike").unwrap(), "data science");
    }

    #[test]
    fn open_only_true_sets_param_false_omits() {
        let params = params_of(SearchQuery::new().open_only(true));
        assert_eq!(params.get("chk_open_only").unwrap(), "true");

        let params = params_of(SearchQuery::new().open_only(false));
        assert!(params.get("chk_open_only").is_none());
    }

    #[test]
    fn credit_range_emits_low_and_high() {
        let params = params_of(SearchQuery::new().credits(3, 6));
        assert_eq!(params.get("txt_credithourlow").unwrap(), "3");
        assert_eq!(params.get("txt_credithourhigh").unwrap(), "6");
    }

    #[test]
    fn course_number_range_emits_low_and_high() {
        let params = params_of(SearchQuery::new().course_numbers(3000, 3999));
        assert_eq!(params.get("txt_course_number_range").unwrap(), "3000");
        assert_eq!(params.get("txt_course_number_range_to").unwrap(), "3999");
    }

    #[test]
    fn pagination_params() {
        let params = params_of(SearchQuery::new().offset(20).max_results(10));
        assert_eq!(params.get("pageOffset").unwrap(), "20");
        assert_eq!(params.get("pageMaxSize").unwrap(), "10");
    }

    #[test]
    fn max_results_clamped() {
        assert_eq!(SearchQuery::new().max_results(2000).get_max_results(), 500);
        assert_eq!(SearchQuery::new().max_results(0).get_max_results(), 1);
    }

    #[test]
    fn multi_value_params_comma_joined() {
        let params = params_of(
            SearchQuery::new()
                .campus(vec!["MAIN".into(), "DT".into()])
                .attributes(vec!["HONORS".into()])
                .instructor(vec![1001, 1002]),
        );
        assert_eq!(params.get("txt_campus").unwrap(), "MAIN,DT");
        assert_eq!(params.get("txt_attribute").unwrap(), "HONORS");
        assert_eq!(params.get("txt_instructor").unwrap(), "1001,1002");
    }

    #[test]
    fn time_params_expand_to_triples() {
        let params = params_of(
            SearchQuery::new()
                .start_time(NaiveTime::from_hms_opt(9, 0, 0).unwrap())
                .end_time(NaiveTime::from_hms_opt(17, 0, 0).unwrap()),
        );
        assert_eq!(params.get("select_start_hour").unwrap(), "9");
        assert_eq!(params.get("select_start_min").unwrap(), "0");
        assert_eq!(params.get("select_start_ampm").unwrap(), "AM");
        assert_eq!(params.get("select_end_hour").unwrap(), "5");
        assert_eq!(params.get("select_end_ampm").unwrap(), "PM");
    }

    #[test]
    fn format_time_morning() {
        let (h, m, mer) = format_time_parameter(NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        assert_eq!((h.as_str(), m.as_str(), mer.as_str()), ("9", "30", "AM"));
    }

    #[test]
    fn format_time_midnight() {
        let (h, m, mer) = format_time_parameter(NaiveTime::from_hms_opt(0, 0, 0).unwrap());
        assert_eq!((h.as_str(), m.as_str(), mer.as_str()), ("12", "0", "AM"));
    }

    #[test]
    fn format_time_noon() {
        let (h, m, mer) = format_time_parameter(NaiveTime::from_hms_opt(12, 0, 0).unwrap());
        assert_eq!((h.as_str(), m.as_str(), mer.as_str()), ("12", "0", "PM"));
    }

    #[test]
    fn format_time_afternoon_wraps() {
        let (h, _, mer) = format_time_parameter(NaiveTime::from_hms_opt(13, 0, 0).unwrap());
        assert_eq!((h.as_str(), mer.as_str()), ("1", "PM"));
        let (h, _, mer) = format_time_parameter(NaiveTime::from_hms_opt(23, 45, 0).unwrap());
        assert_eq!((h.as_str(), mer.as_str()), ("11", "PM"));
    }

    #[test]
    fn display_minimal() {
        let display = SearchQuery::new().build().unwrap().to_string();
        assert_eq!(display, "offset=0, maxResults=8");
    }

    #[test]
    fn display_with_fields() {
        let display = SearchQuery::new()
            .subject("CS")
            .open_only(true)
            .max_results(10)
            .build()
            .unwrap()
            .to_string();
        assert!(display.contains("subject=CS"));
        assert!(display.contains("openOnly=true"));
        assert!(display.contains("maxResults=10"));
    }

    #[test]
    fn full_query_param_count() {
        let params = params_of(
            SearchQuery::new()
                .subject("CS")
                .title("Intro")
                .course_reference_number("12345")
                .keyword("programming")
                .open_only(true)
                .instructional_method(vec!["ONLINE".into()])
                .credits(3, 4)
                .course_numbers(1000, 1999)
                .offset(0)
                .max_results(25),
        );
        // subject, title, crn, keywords, open_only, instructional_method,
        // credithourlow, credithourhigh, course_number_range,
        // course_number_range_to, pageOffset, pageMaxSize
        assert_eq!(params.len(), 12);
    }
}
