//! Economic calendar
//!
//! No free calendar feed is wired in yet, so events come from a built-in
//! sample schedule of the recurring high-impact US releases.

use super::Capability;
use crate::Result;
use chrono::{Datelike, Duration, Local, NaiveDate};

const DESCRIPTION: &str = "Macroeconomic calendar events (CPI, rate decisions, ...).
Input: \"today\", \"tomorrow\", \"this_week\" or a date as YYYY-MM-DD.
Output: events with time, country, impact, forecast and previous value.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EconomicEvent {
    pub date: NaiveDate,
    pub time: &'static str,
    pub country: &'static str,
    pub name: &'static str,
    pub impact: &'static str,
    pub forecast: &'static str,
    pub previous: &'static str,
}

/// The period a calendar request covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarRange {
    Day(NaiveDate),
    Week { start: NaiveDate, end: NaiveDate },
}

impl CalendarRange {
    /// Unrecognised input falls back to `today`.
    pub fn parse(input: &str, today: NaiveDate) -> Self {
        match input.trim().to_lowercase().as_str() {
            "" | "today" => CalendarRange::Day(today),
            "tomorrow" => CalendarRange::Day(today + Duration::days(1)),
            "this_week" | "week" => {
                let start = today - Duration::days(today.weekday().num_days_from_monday() as i64);
                CalendarRange::Week {
                    start,
                    end: start + Duration::days(6),
                }
            }
            other => CalendarRange::Day(
                NaiveDate::parse_from_str(other, "%Y-%m-%d").unwrap_or(today),
            ),
        }
    }
}

pub struct EconomicCalendarCapability {
    today: fn() -> NaiveDate,
}

impl EconomicCalendarCapability {
    pub fn new() -> Self {
        Self {
            today: || Local::now().date_naive(),
        }
    }

    /// Pin "today", for deterministic output.
    pub fn with_clock(today: fn() -> NaiveDate) -> Self {
        Self { today }
    }
}

impl Default for EconomicCalendarCapability {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Capability for EconomicCalendarCapability {
    fn name(&self) -> &str {
        "economic_calendar"
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    async fn execute(&self, input: &str) -> Result<String> {
        let today = (self.today)();
        Ok(render(CalendarRange::parse(input, today), today))
    }
}

fn sample_events(date: NaiveDate) -> Vec<EconomicEvent> {
    vec![
        EconomicEvent {
            date,
            time: "14:30",
            country: "US",
            name: "CPI (Consumer Price Index)",
            impact: "High",
            forecast: "0.3%",
            previous: "0.2%",
        },
        EconomicEvent {
            date,
            time: "16:00",
            country: "US",
            name: "Fed Interest Rate Decision",
            impact: "High",
            forecast: "5.25%",
            previous: "5.25%",
        },
    ]
}

fn render(range: CalendarRange, today: NaiveDate) -> String {
    let (mut out, events, with_date) = match range {
        CalendarRange::Day(date) => (
            format!("Economic calendar - {}:\n\n", date.format("%Y-%m-%d")),
            sample_events(date),
            false,
        ),
        CalendarRange::Week { start, end } => (
            format!(
                "Economic calendar - this week ({} - {}):\n\n",
                start.format("%Y-%m-%d"),
                end.format("%Y-%m-%d")
            ),
            sample_events(today),
            true,
        ),
    };

    if events.is_empty() {
        return format!("{}No economic events found.", out);
    }

    for event in events {
        if with_date {
            out.push_str(&format!(
                "{} {} ({})\n",
                event.date.format("%Y-%m-%d"),
                event.time,
                event.country
            ));
        } else {
            out.push_str(&format!("{} ({})\n", event.time, event.country));
        }
        out.push_str(&format!("   Event: {}\n", event.name));
        out.push_str(&format!("   Impact: {}\n", event.impact));
        out.push_str(&format!("   Forecast: {}\n", event.forecast));
        out.push_str(&format!("   Previous: {}\n\n", event.previous));
    }

    out
}
