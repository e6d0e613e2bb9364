//! Extracts a date range from conversational Korean queries: relative
//! expressions (오늘, 지난주, 이번달, …) and explicit `YYYY년 MM월 [DD일]`
//! forms. The range logic is pure over an injected "today" so it can be
//! exercised deterministically; the KST wrapper supplies the live date.

use std::sync::LazyLock;

use chrono::{Datelike, Duration, NaiveDate, Utc};
use chrono_tz::Asia::Seoul;
use regex::Regex;

#[allow(clippy::unwrap_used)]
static SPECIFIC_DAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})년\s*(\d{1,2})월\s*(\d{1,2})일").unwrap());

#[allow(clippy::unwrap_used)]
static SPECIFIC_MONTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})년\s*(\d{1,2})월").unwrap());

/// Today in the service timezone (KST).
pub fn kst_today() -> NaiveDate {
    Utc::now().with_timezone(&Seoul).date_naive()
}

fn month_range(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((first, next_first - Duration::days(1)))
}

fn parse_relative(query: &str, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    if query.contains("오늘") {
        return Some((today, today));
    }
    if query.contains("어제") {
        let yesterday = today - Duration::days(1);
        return Some((yesterday, yesterday));
    }
    if query.contains("내일") {
        let tomorrow = today + Duration::days(1);
        return Some((tomorrow, tomorrow));
    }
    if query.contains("지난주") || query.contains("지난 주") {
        let weekday = i64::from(today.weekday().num_days_from_monday());
        let start = today - Duration::days(weekday + 7);
        return Some((start, start + Duration::days(6)));
    }
    if query.contains("이번주") || query.contains("이번 주") {
        let weekday = i64::from(today.weekday().num_days_from_monday());
        let start = today - Duration::days(weekday);
        return Some((start, start + Duration::days(6)));
    }
    if query.contains("지난달") || query.contains("지난 달") {
        let first_of_this_month = today.with_day(1)?;
        let last_of_last_month = first_of_this_month - Duration::days(1);
        return month_range(last_of_last_month.year(), last_of_last_month.month());
    }
    if query.contains("이번달") || query.contains("이번 달") {
        return month_range(today.year(), today.month());
    }
    None
}

fn parse_specific(query: &str) -> Option<(NaiveDate, NaiveDate)> {
    // A full date is more specific than a month mention, so it wins.
    if let Some(caps) = SPECIFIC_DAY.captures(query) {
        let year: i32 = caps.get(1)?.as_str().parse().ok()?;
        let month: u32 = caps.get(2)?.as_str().parse().ok()?;
        let day: u32 = caps.get(3)?.as_str().parse().ok()?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some((date, date));
        }
    }

    if let Some(caps) = SPECIFIC_MONTH.captures(query) {
        let year: i32 = caps.get(1)?.as_str().parse().ok()?;
        let month: u32 = caps.get(2)?.as_str().parse().ok()?;
        if (1..=12).contains(&month) {
            return month_range(year, month);
        }
    }

    None
}

/// The date range a query asks about, or `None` when it has no temporal
/// anchor. Relative expressions take precedence over explicit dates.
pub fn extract_date_range(query: &str, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    parse_relative(query, today).or_else(|| parse_specific(query))
}
