use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc};
use nom::{
    branch::alt,
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{map, map_res, opt},
    multi::separated_list1,
    sequence::{preceded, tuple},
    IResult,
};
use tokio::task::JoinHandle;

use crate::loader::BatchLoader;
use crate::sink::{LogLevel, LogSink};

/// Cron expression for the recurring batch trigger: twice daily at 00:00 and
/// 12:00 UTC.
pub const DEFAULT_EXPRESSION: &str = "0 0,12 * * *";

// Walking minute by minute, four years covers every reachable combination
// (including Feb 29). Anything further out is an unsatisfiable field mix.
const SEARCH_LIMIT_MINUTES: i64 = 60 * 24 * 366 * 4;

/// One cron field: a wildcard or an explicit set of values.
#[derive(Debug, Clone, PartialEq)]
enum Field {
    Any,
    Values(Vec<u32>),
}

impl Field {
    fn matches(&self, value: u32) -> bool {
        match self {
            Field::Any => true,
            Field::Values(values) => values.contains(&value),
        }
    }

    fn is_any(&self) -> bool {
        matches!(self, Field::Any)
    }
}

/// Parsed five-field cron subset: minute, hour, day of month, month, day of
/// week. Each field accepts `*`, a value, a range `a-b`, or a comma list of
/// those. Day of week uses 0-6 with Sunday as 0 (7 normalized to 0).
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

// --- FIELD PARSERS ---

fn parse_number(input: &str) -> IResult<&str, u32> {
    map_res(digit1, |s: &str| s.parse::<u32>())(input)
}

// A single value or an inclusive range `a-b`, expanded to its members.
fn parse_values(input: &str) -> IResult<&str, Vec<u32>> {
    let (input, start) = parse_number(input)?;
    let (input, end) = opt(preceded(char('-'), parse_number))(input)?;
    match end {
        Some(end) if end < start => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        ))),
        Some(end) => Ok((input, (start..=end).collect())),
        None => Ok((input, vec![start])),
    }
}

fn parse_field(input: &str) -> IResult<&str, Field> {
    alt((
        map(char('*'), |_| Field::Any),
        map(
            separated_list1(tuple((multispace0, char(','), multispace0)), parse_values),
            |groups| Field::Values(groups.into_iter().flatten().collect()),
        ),
    ))(input)
}

fn parse_expression(input: &str) -> IResult<&str, Schedule> {
    let (input, minute) = parse_field(input)?;
    let (input, hour) = preceded(multispace1, parse_field)(input)?;
    let (input, day_of_month) = preceded(multispace1, parse_field)(input)?;
    let (input, month) = preceded(multispace1, parse_field)(input)?;
    let (input, day_of_week) = preceded(multispace1, parse_field)(input)?;
    Ok((
        input,
        Schedule {
            minute,
            hour,
            day_of_month,
            month,
            day_of_week,
        },
    ))
}

impl Schedule {
    pub fn parse(expr: &str) -> Result<Schedule, String> {
        let expr = expr.trim();
        match parse_expression(expr) {
            Ok((remainder, schedule)) => {
                if !remainder.trim().is_empty() {
                    return Err(format!("Unexpected tokens at end: '{}'", remainder.trim()));
                }
                schedule.validated()
            }
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                Err(format!("Invalid schedule syntax near: '{}'", e.input))
            }
            Err(nom::Err::Incomplete(_)) => Err("Incomplete schedule expression.".to_string()),
        }
    }

    fn validated(mut self) -> Result<Schedule, String> {
        check_bounds("minute", &self.minute, 0, 59)?;
        check_bounds("hour", &self.hour, 0, 23)?;
        check_bounds("day of month", &self.day_of_month, 1, 31)?;
        check_bounds("month", &self.month, 1, 12)?;
        check_bounds("day of week", &self.day_of_week, 0, 7)?;

        // Cron allows both 0 and 7 for Sunday.
        if let Field::Values(values) = &mut self.day_of_week {
            for value in values.iter_mut() {
                if *value == 7 {
                    *value = 0;
                }
            }
        }
        Ok(self)
    }

    fn matches(&self, t: &DateTime<Utc>) -> bool {
        if !self.minute.matches(t.minute())
            || !self.hour.matches(t.hour())
            || !self.month.matches(t.month())
        {
            return false;
        }

        let dom = self.day_of_month.matches(t.day());
        let dow = self.day_of_week.matches(t.weekday().num_days_from_sunday());
        // Standard cron rule: when both day fields are restricted, either
        // one matching is enough.
        match (self.day_of_month.is_any(), self.day_of_week.is_any()) {
            (true, true) => true,
            (false, true) => dom,
            (true, false) => dow,
            (false, false) => dom || dow,
        }
    }

    /// The next matching instant strictly after `after`, at minute
    /// resolution. `None` only for field mixes that can never occur.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = after.with_second(0)?.with_nanosecond(0)? + ChronoDuration::minutes(1);
        for _ in 0..SEARCH_LIMIT_MINUTES {
            if self.matches(&t) {
                return Some(t);
            }
            t += ChronoDuration::minutes(1);
        }
        None
    }
}

fn check_bounds(name: &str, field: &Field, min: u32, max: u32) -> Result<(), String> {
    if let Field::Values(values) = field {
        for &value in values {
            if value < min || value > max {
                return Err(format!(
                    "{} value {} out of range {}-{}",
                    name, value, min, max
                ));
            }
        }
    }
    Ok(())
}

/// Spawns the recurring trigger: sleep until the next occurrence, fire the
/// loader, repeat. A run is launched as its own task and watched from the
/// side, so a panicking run is logged at ERROR and the cadence continues;
/// nothing from a triggered run can terminate the hosting process.
pub fn run_scheduler(
    schedule: Schedule,
    loader: Arc<BatchLoader>,
    sink: Arc<LogSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let next = match schedule.next_after(now) {
                Some(next) => next,
                None => {
                    sink.append(
                        LogLevel::Error,
                        "Schedule has no future occurrence, scheduler stopping",
                    );
                    return;
                }
            };
            let wait = (next - now).to_std().unwrap_or(std::time::Duration::ZERO);
            tokio::time::sleep(wait).await;

            sink.append(LogLevel::Info, "Running scheduled task");
            let run = {
                let loader = loader.clone();
                tokio::spawn(async move { loader.load_and_reconcile().await })
            };
            let watch_sink = sink.clone();
            tokio::spawn(async move {
                if let Err(e) = run.await {
                    watch_sink.append(LogLevel::Error, format!("Error in scheduled task: {}", e));
                }
            });
        }
    })
}
