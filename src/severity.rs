use chrono::{DateTime, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use log::debug;
use serde_derive::{Deserialize, Serialize};

const DUE_SOON_DAYS: i64 = 3;

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityTier {
    Overdue,
    DueToday,
    DueSoon,
    DueLater,
    NoDueDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Severity {
    pub label: String,
    pub tier: SeverityTier,
}

impl Severity {
    fn new(tier: SeverityTier, label: impl Into<String>) -> Self {
        Severity {
            label: label.into(),
            tier,
        }
    }
}

pub fn classify_severity(due: Option<NaiveDate>, today: NaiveDate) -> Severity {
    let Some(due) = due else {
        return Severity::new(SeverityTier::NoDueDate, "No Due Date");
    };

    match (due - today).num_days() {
        diff if diff < 0 => Severity::new(SeverityTier::Overdue, format!("Overdue by {}d", -diff)),
        0 => Severity::new(SeverityTier::DueToday, "Due Today"),
        diff if diff <= DUE_SOON_DAYS => {
            Severity::new(SeverityTier::DueSoon, format!("Due in {diff}d"))
        }
        _ => Severity::new(
            SeverityTier::DueLater,
            format!("Due {}", due.format("%b %-d, %Y")),
        ),
    }
}

/// Reads a due date given as `YYYY-MM-DD`, an RFC 3339 timestamp (converted
/// into `tz` before taking the date) or a naive timestamp (taken as local).
pub fn parse_due_date(raw: &str, tz: Tz) -> Option<NaiveDate> {
    let raw = raw.trim();

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }

    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Some(instant.with_timezone(&tz).date_naive());
    }

    NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|datetime| datetime.date())
}

/// Unparseable due dates are shown as having none.
pub fn classify_due_str(raw: Option<&str>, today: NaiveDate, tz: Tz) -> Severity {
    let due = raw.and_then(|raw| {
        let parsed = parse_due_date(raw, tz);
        if parsed.is_none() {
            debug!("Ignoring unparseable due date {raw:?}");
        }
        parsed
    });

    classify_severity(due, today)
}
