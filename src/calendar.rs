//! Academic-calendar model: term codes and the wall-clock → term mapping.
//!
//! Terms encode on the wire as six-digit strings `YYYYSS` where the year is
//! the *academic* year (the second calendar year of the Fall→Summer span) and
//! `SS` is 10/20/30 for Fall/Spring/Summer. The scheduler asks this module
//! which term(s) to poll for a given instant; all date math is anchored to
//! America/Chicago.

use std::{ops::RangeInclusive, str::FromStr};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::America::Chicago;
use serde::{Deserialize, Serialize};

/// The current year at the time of compilation.
const CURRENT_YEAR: u32 = compile_time::date!().year() as u32;

/// The valid years for terms. The lower bound is the oldest term the upstream
/// still serves; the upper bound is slack so the binary doesn't need yearly
/// rebuilds.
const VALID_YEARS: RangeInclusive<u32> = 2007..=(CURRENT_YEAR + 10);

/// A season within an academic year.
///
/// The only contract is `parse ∘ to_string = id`; nothing may rely on a
/// numeric ordering of the variants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Season {
    Fall,
    Spring,
    Summer,
}

/// A parsed term: academic year plus season.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Term {
    pub year: u32,
    pub season: Season,
}

/// Start (inclusive) and end (exclusive) day-of-year of one season.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearDayRange {
    pub start: u32,
    pub end: u32,
}

impl YearDayRange {
    pub fn contains(&self, day: u32) -> bool {
        day >= self.start && day < self.end
    }
}

/// The three season ranges of one calendar year.
#[derive(Debug, Clone, Copy)]
pub struct SeasonRanges {
    pub spring: YearDayRange,
    pub summer: YearDayRange,
    pub fall: YearDayRange,
}

/// Compute the season day-of-year ranges for a calendar year.
///
/// Anchors: Spring Jan 14 – May 1, Summer May 25 – Aug 15, Fall Aug 18 – Dec 10.
pub fn ranges_for(year: u32) -> SeasonRanges {
    let ordinal = |month: u32, day: u32| {
        NaiveDate::from_ymd_opt(year as i32, month, day)
            .expect("fixed month/day anchors are valid for every year")
            .ordinal()
    };

    SeasonRanges {
        spring: YearDayRange {
            start: ordinal(1, 14),
            end: ordinal(5, 1),
        },
        summer: YearDayRange {
            start: ordinal(5, 25),
            end: ordinal(8, 15),
        },
        fall: YearDayRange {
            start: ordinal(8, 18),
            end: ordinal(12, 10),
        },
    }
}

/// Today's date in the Central zone.
pub fn today_central(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&Chicago).date_naive()
}

impl Term {
    /// Map a date to the current and next term.
    ///
    /// The year partitions into six intervals (the gap after Fall wraps into
    /// the gap before Spring); each maps to a `(current, next)` pair where
    /// only `current` may be absent. Dates past the end of Summer belong to
    /// the next academic year.
    pub fn current_and_next(date: NaiveDate) -> (Option<Term>, Option<Term>) {
        let literal_year = date.year() as u32;
        let day = date.ordinal();
        let ranges = ranges_for(literal_year);

        let term_year = if day > ranges.summer.end {
            literal_year + 1
        } else {
            literal_year
        };

        let term = |year, season| Term { year, season };

        // Ordered checks over the six intervals of the year. The final branch
        // is total: everything not matched earlier lies inside Fall.
        if day < ranges.spring.start || day >= ranges.fall.end {
            // Fall over, Spring not yet begun
            (None, Some(term(term_year, Season::Spring)))
        } else if day < ranges.spring.end {
            (
                Some(term(term_year, Season::Spring)),
                Some(term(term_year, Season::Summer)),
            )
        } else if day < ranges.summer.start {
            // Spring over, Summer not yet begun
            (None, Some(term(term_year, Season::Summer)))
        } else if day < ranges.summer.end {
            // Fall belongs to the next academic year even while Summer is
            // still the current term.
            (
                Some(term(term_year, Season::Summer)),
                Some(term(literal_year + 1, Season::Fall)),
            )
        } else if day < ranges.fall.start {
            // Summer over, Fall not yet begun
            (None, Some(term(term_year, Season::Fall)))
        } else {
            (
                Some(term(term_year, Season::Fall)),
                Some(term(term_year, Season::Spring)),
            )
        }
    }

    /// The term the scheduler should target by default: the current term if
    /// one is in session, otherwise the upcoming one.
    pub fn default_for(date: NaiveDate) -> Term {
        let (current, next) = Self::current_and_next(date);
        current
            .or(next)
            .expect("current_and_next always yields a next term")
    }

    /// Convenience wrapper over [`Term::default_for`] using the Central zone.
    pub fn default_now() -> Term {
        Self::default_for(today_central(Utc::now()))
    }
}

/// Parse failure for term or season codes.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid term: {0}")]
pub struct InvalidTerm(pub String);

impl Season {
    fn code(self) -> &'static str {
        match self {
            Season::Fall => "10",
            Season::Spring => "20",
            Season::Summer => "30",
        }
    }

    /// Human-readable season name, matching the `terms.season` column.
    pub fn name(self) -> &'static str {
        match self {
            Season::Fall => "Fall",
            Season::Spring => "Spring",
            Season::Summer => "Summer",
        }
    }
}

impl FromStr for Season {
    type Err = InvalidTerm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "10" => Ok(Season::Fall),
            "20" => Ok(Season::Spring),
            "30" => Ok(Season::Summer),
            _ => Err(InvalidTerm(format!("unknown season code {s:?}"))),
        }
    }
}

impl std::fmt::Display for Season {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::fmt::Display for Term {
    /// Formats as the six-digit wire code, e.g. `202610`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.year, self.season.code())
    }
}

impl FromStr for Term {
    type Err = InvalidTerm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 6 || !s.is_ascii() {
            return Err(InvalidTerm(format!("term code must be 6 digits, got {s:?}")));
        }

        let year: u32 = s[0..4]
            .parse()
            .map_err(|_| InvalidTerm(format!("unparseable year in {s:?}")))?;
        if !VALID_YEARS.contains(&year) {
            return Err(InvalidTerm(format!("year {year} out of range")));
        }

        let season = Season::from_str(&s[4..6]).map_err(|_| {
            InvalidTerm(format!("unknown season code in {s:?}"))
        })?;

        Ok(Term { year, season })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // --- codes ---

    #[test]
    fn season_code_roundtrip() {
        for season in [Season::Fall, Season::Spring, Season::Summer] {
            assert_eq!(Season::from_str(season.code()).unwrap(), season);
        }
    }

    #[test]
    fn term_code_roundtrip() {
        for code in ["202510", "202520", "202530", "200710"] {
            let term = Term::from_str(code).unwrap();
            assert_eq!(term.to_string(), code);
        }
    }

    #[test]
    fn term_parse_rejects_malformed() {
        for input in ["", "20251", "2025100", "abcd10", "202540", "200610", "９９９９10"] {
            assert!(Term::from_str(input).is_err(), "expected Err for {input:?}");
        }
    }

    // --- ranges ---

    #[test]
    fn ranges_disjoint_and_ordered() {
        for year in [2007u32, 2024, 2025, 2100] {
            let r = ranges_for(year);
            assert!(r.spring.start < r.spring.end);
            assert!(r.spring.end <= r.summer.start);
            assert!(r.summer.start < r.summer.end);
            assert!(r.summer.end <= r.fall.start);
            assert!(r.fall.start < r.fall.end);
        }
    }

    // --- current_and_next, one case per interval ---

    #[test]
    fn before_spring() {
        let (current, next) = Term::current_and_next(date(2025, 1, 5));
        assert_eq!(current, None);
        assert_eq!(next.unwrap().to_string(), "202520");
    }

    #[test]
    fn mid_spring() {
        let (current, next) = Term::current_and_next(date(2025, 2, 15));
        assert_eq!(current.unwrap().to_string(), "202520");
        assert_eq!(next.unwrap().to_string(), "202530");
    }

    #[test]
    fn between_spring_and_summer() {
        let (current, next) = Term::current_and_next(date(2025, 5, 10));
        assert_eq!(current, None);
        assert_eq!(next.unwrap().to_string(), "202530");
    }

    #[test]
    fn mid_summer_next_is_next_academic_year_fall() {
        let (current, next) = Term::current_and_next(date(2025, 7, 1));
        assert_eq!(current.unwrap().to_string(), "202530");
        assert_eq!(next.unwrap().to_string(), "202610");
    }

    #[test]
    fn between_summer_and_fall() {
        let (current, next) = Term::current_and_next(date(2025, 8, 16));
        assert_eq!(current, None);
        assert_eq!(next.unwrap().to_string(), "202610");
    }

    #[test]
    fn mid_fall() {
        let (current, next) = Term::current_and_next(date(2025, 10, 15));
        assert_eq!(current.unwrap().to_string(), "202610");
        assert_eq!(next.unwrap().to_string(), "202620");
    }

    #[test]
    fn dec_31_rolls_to_next_school_year() {
        let (current, next) = Term::current_and_next(date(2025, 12, 31));
        assert_eq!(current, None);
        assert_eq!(next.unwrap(), Term { year: 2026, season: Season::Spring });
    }

    #[test]
    fn exactly_one_interval_matches_every_day() {
        // Walk a leap year and a common year; every date must produce a next
        // term, and a current term only when inside a range.
        for year in [2024i32, 2025] {
            let mut day = date(year, 1, 1);
            while day.year() == year {
                let ranges = ranges_for(year as u32);
                let (current, next) = Term::current_and_next(day);
                assert!(next.is_some(), "no next term on {day}");
                let in_any = ranges.spring.contains(day.ordinal())
                    || ranges.summer.contains(day.ordinal())
                    || ranges.fall.contains(day.ordinal());
                assert_eq!(current.is_some(), in_any, "mismatch on {day}");
                day = day.succ_opt().unwrap();
            }
        }
    }

    // --- boundary days ---

    #[test]
    fn term_start_day_is_in_term() {
        let (current, _) = Term::current_and_next(date(2025, 1, 14));
        assert_eq!(current.unwrap().season, Season::Spring);
    }

    #[test]
    fn term_end_day_is_not_in_term() {
        let (current, _) = Term::current_and_next(date(2025, 5, 1));
        assert_eq!(current, None);
    }

    #[test]
    fn default_prefers_current_over_next() {
        assert_eq!(Term::default_for(date(2025, 2, 15)).to_string(), "202520");
        assert_eq!(Term::default_for(date(2025, 5, 10)).to_string(), "202530");
    }
}
