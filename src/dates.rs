//! Tolerant parsing of free-text publication dates.
//!
//! Press release pages put dates in all sorts of places and shapes:
//! "Posted on Thursday 28th November 2013 at 10.15am", "Nov 28, 2013",
//! "28/11/2013 14:30 GMT", "2013-11-28T14:30:00Z". [`parse_fuzzy`] finds the
//! first recognisable date in the text, then looks for a time and zone in what
//! is left. Day-first is assumed for ambiguous numeric dates.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::error::{Error, Result};

const MONTH: &str = r"(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sept?(?:ember)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?";

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})(?:[T ](\d{1,2}):(\d{2})(?::(\d{2}))?)?").unwrap());

static DAY_MONTH_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?(?:\s+of)?[\s\-/.,]+{MONTH}[\s\-/.,]+(\d{{4}})\b"
    ))
    .unwrap()
});

static MONTH_DAY_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b{MONTH}\s+(\d{{1,2}})(?:st|nd|rd|th)?,?\s+(\d{{4}})\b"
    ))
    .unwrap()
});

static MONTH_YEAR_DAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\b{MONTH}\s+(\d{{4}})\s+(\d{{1,2}})\b")).unwrap()
});

static NUMERIC_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})[/.](\d{1,2})[/.](\d{4}|\d{2})\b").unwrap());

static CLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})[:.](\d{2})(?::(\d{2}))?\s*([ap]\.?m\.?)?").unwrap()
});

static BARE_HOUR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})\s*([ap]\.?m\.?)").unwrap());

/// A numeric offset must stand alone or follow a clock time, so reference
/// numbers like "A-1234" are not read as zones.
static ZONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\b(utc|gmt|bst)\b|(?:^|\s|\d:\d{2})([+-])(\d{2}):?(\d{2})\b|\dZ\b)").unwrap()
});

/// Parse the first date found in `text` into a UTC timestamp.
///
/// Time defaults to midnight and zone to UTC when the text carries neither.
pub fn parse_fuzzy(text: &str) -> Result<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Ok(dt.with_timezone(&Utc));
    }

    let fail = || Error::DateParse(text.to_string());

    let (date, iso_time, span) = find_date(text).ok_or_else(fail)?.map_err(|_| fail())?;

    // Look for time and zone only outside the date itself, so "10.11.2013"
    // doesn't read as 10:11.
    let rest = format!("{} {}", &text[..span.0], &text[span.1..]);
    let time = match iso_time {
        Some(t) => t,
        None => find_time(&rest).unwrap_or(NaiveTime::MIN),
    };
    let offset = find_offset(&rest).unwrap_or(Utc.fix());

    offset
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(fail)
}

type Found = std::result::Result<(NaiveDate, Option<NaiveTime>, (usize, usize)), ()>;
type Builder = fn(&Captures) -> Option<(NaiveDate, Option<NaiveTime>)>;

/// Earliest date match in `text`. `Some(Err)` means something date-shaped
/// was found but it isn't a real calendar date.
fn find_date(text: &str) -> Option<Found> {
    let candidates: [(&Regex, Builder); 5] = [
        (&*ISO_DATE, iso),
        (&*DAY_MONTH_YEAR, day_month_year),
        (&*MONTH_DAY_YEAR, month_day_year),
        (&*MONTH_YEAR_DAY, month_year_day),
        (&*NUMERIC_DATE, numeric),
    ];

    candidates
        .iter()
        .filter_map(|(re, build)| re.captures(text).map(|caps| (caps, *build)))
        .min_by_key(|(caps, _)| caps.get(0).map_or(usize::MAX, |m| m.start()))
        .map(|(caps, build)| -> Found {
            let whole = caps.get(0).ok_or(())?;
            let (date, time) = build(&caps).ok_or(())?;
            Ok((date, time, (whole.start(), whole.end())))
        })
}

fn num(caps: &Captures, i: usize) -> Option<u32> {
    caps.get(i)?.as_str().parse().ok()
}

fn iso(caps: &Captures) -> Option<(NaiveDate, Option<NaiveTime>)> {
    let date = NaiveDate::from_ymd_opt(num(caps, 1)? as i32, num(caps, 2)?, num(caps, 3)?)?;
    let time = match (num(caps, 4), num(caps, 5)) {
        (Some(h), Some(m)) => Some(NaiveTime::from_hms_opt(h, m, num(caps, 6).unwrap_or(0))?),
        _ => None,
    };
    Some((date, time))
}

fn day_month_year(caps: &Captures) -> Option<(NaiveDate, Option<NaiveTime>)> {
    let month = month_number(caps.get(2)?.as_str())?;
    let date = NaiveDate::from_ymd_opt(num(caps, 3)? as i32, month, num(caps, 1)?)?;
    Some((date, None))
}

fn month_day_year(caps: &Captures) -> Option<(NaiveDate, Option<NaiveTime>)> {
    let month = month_number(caps.get(1)?.as_str())?;
    let date = NaiveDate::from_ymd_opt(num(caps, 3)? as i32, month, num(caps, 2)?)?;
    Some((date, None))
}

fn month_year_day(caps: &Captures) -> Option<(NaiveDate, Option<NaiveTime>)> {
    let month = month_number(caps.get(1)?.as_str())?;
    let date = NaiveDate::from_ymd_opt(num(caps, 2)? as i32, month, num(caps, 3)?)?;
    Some((date, None))
}

fn numeric(caps: &Captures) -> Option<(NaiveDate, Option<NaiveTime>)> {
    let mut year = num(caps, 3)? as i32;
    if year < 100 {
        year += 2000;
    }
    let date = NaiveDate::from_ymd_opt(year, num(caps, 2)?, num(caps, 1)?)?;
    Some((date, None))
}

fn month_number(name: &str) -> Option<u32> {
    let key = name.get(..3)?.to_ascii_lowercase();
    let n = match key.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(n)
}

fn find_time(text: &str) -> Option<NaiveTime> {
    if let Some(caps) = CLOCK.captures(text) {
        let mut hour = num(&caps, 1)?;
        let minute = num(&caps, 2)?;
        let second = num(&caps, 3).unwrap_or(0);
        if let Some(meridian) = caps.get(4) {
            hour = twelve_hour(hour, meridian.as_str())?;
        }
        return NaiveTime::from_hms_opt(hour, minute, second);
    }
    let caps = BARE_HOUR.captures(text)?;
    let hour = twelve_hour(num(&caps, 1)?, caps.get(2)?.as_str())?;
    NaiveTime::from_hms_opt(hour, 0, 0)
}

fn twelve_hour(hour: u32, meridian: &str) -> Option<u32> {
    if !(1..=12).contains(&hour) {
        return None;
    }
    let pm = meridian.to_ascii_lowercase().starts_with('p');
    Some(match (hour, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, true) => h + 12,
        (h, false) => h,
    })
}

fn find_offset(text: &str) -> Option<FixedOffset> {
    let caps = ZONE.captures(text)?;
    if let Some(name) = caps.get(1) {
        let secs = if name.as_str().eq_ignore_ascii_case("bst") { 3600 } else { 0 };
        return FixedOffset::east_opt(secs);
    }
    if let (Some(sign), Some(h), Some(m)) = (caps.get(2), num(&caps, 3), num(&caps, 4)) {
        let secs = (h * 3600 + m * 60) as i32;
        let secs = if sign.as_str() == "-" { -secs } else { secs };
        return FixedOffset::east_opt(secs);
    }
    FixedOffset::east_opt(0)
}
