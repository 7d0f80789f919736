use std::{fmt, sync::Arc};

use chrono::{Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::{analytics::types::TimeRange, errors::Error, utils::fold_accents, Result};

/// Source of the current local wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    /// Calendar day that relative periods count from.
    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// Real time shifted by a fixed UTC offset.
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(utc_offset_minutes: i32) -> Result<Self> {
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60).ok_or_else(|| {
            Error::Config(format!("invalid utc offset: {utc_offset_minutes} minutes"))
        })?;
        Ok(Self { offset })
    }
}

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.offset).naive_local()
    }
}

/// Treats `date` as "today", with `now` at the end of that day so the whole
/// day is in range.
///
/// Used when the measurement database is a frozen snapshot.
#[derive(Clone, Copy, Debug)]
pub struct PinnedClock {
    date: NaiveDate,
}

impl PinnedClock {
    pub fn new(date: NaiveDate) -> Self {
        Self { date }
    }
}

impl Clock for PinnedClock {
    fn now(&self) -> NaiveDateTime {
        self.date.and_time(NaiveTime::MIN) + Duration::days(1)
    }

    fn today(&self) -> NaiveDate {
        self.date
    }
}

/// Always returns the same instant.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

pub fn clock_from_settings(
    utc_offset_minutes: i32,
    reference_date: Option<NaiveDate>,
) -> Result<Arc<dyn Clock>> {
    Ok(match reference_date {
        Some(date) => Arc::new(PinnedClock::new(date)),
        None => Arc::new(SystemClock::new(utc_offset_minutes)?),
    })
}

/// Symbolic period understood by the data tool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Period {
    Today,
    Yesterday,
    Last24Hours,
    ThisWeek,
    LastWeek,
    Last7Days,
    ThisMonth,
    LastMonth,
    Last30Days,
    ThisYear,
    LastYear,
}

impl Period {
    pub const ALL: [Period; 11] = [
        Period::Today,
        Period::Yesterday,
        Period::Last24Hours,
        Period::ThisWeek,
        Period::LastWeek,
        Period::Last7Days,
        Period::ThisMonth,
        Period::LastMonth,
        Period::Last30Days,
        Period::ThisYear,
        Period::LastYear,
    ];

    /// Canonical token and its Portuguese alias.
    pub fn tokens(self) -> (&'static str, &'static str) {
        match self {
            Period::Today => ("today", "hoje"),
            Period::Yesterday => ("yesterday", "ontem"),
            Period::Last24Hours => ("last_24_hours", "ultimas_24_horas"),
            Period::ThisWeek => ("this_week", "esta_semana"),
            Period::LastWeek => ("last_week", "semana_passada"),
            Period::Last7Days => ("last_7_days", "ultimos_7_dias"),
            Period::ThisMonth => ("this_month", "este_mes"),
            Period::LastMonth => ("last_month", "mes_passado"),
            Period::Last30Days => ("last_30_days", "ultimos_30_dias"),
            Period::ThisYear => ("this_year", "este_ano"),
            Period::LastYear => ("last_year", "ano_passado"),
        }
    }

    pub fn as_str(self) -> &'static str {
        self.tokens().0
    }

    pub fn parse(token: &str) -> Result<Self> {
        let normalized = fold_accents(&token.trim().to_lowercase()).replace([' ', '-'], "_");
        Period::ALL
            .into_iter()
            .find(|p| {
                let (en, pt) = p.tokens();
                normalized == en || normalized == pt
            })
            .ok_or_else(|| {
                let accepted: Vec<&str> = Period::ALL.iter().map(|p| p.as_str()).collect();
                Error::InvalidInput(format!(
                    "período desconhecido '{}'. Períodos aceitos: {}",
                    token.trim(),
                    accepted.join(", ")
                ))
            })
    }

    /// Resolve against `clock`: calendar boundaries come from its day,
    /// open-ended ranges stop at its current time.
    pub fn resolve(self, clock: &dyn Clock) -> Result<TimeRange> {
        self.resolve_at(clock.today(), clock.now())
    }

    pub fn resolve_at(self, today: NaiveDate, now: NaiveDateTime) -> Result<TimeRange> {
        let midnight = today.and_time(NaiveTime::MIN);

        let range = match self {
            Period::Today => TimeRange::new(midnight, now),
            Period::Yesterday => TimeRange::new(midnight - Duration::days(1), midnight),
            Period::Last24Hours => TimeRange::new(now - Duration::hours(24), now),
            Period::ThisWeek => TimeRange::new(week_start(today), now),
            Period::LastWeek => {
                let monday = week_start(today);
                TimeRange::new(monday - Duration::days(7), monday)
            }
            Period::Last7Days => TimeRange::new(midnight - Duration::days(7), now),
            Period::ThisMonth => TimeRange::new(month_start(today.year(), today.month())?, now),
            Period::LastMonth => {
                let (y, m) = if today.month() == 1 {
                    (today.year() - 1, 12)
                } else {
                    (today.year(), today.month() - 1)
                };
                TimeRange::new(
                    month_start(y, m)?,
                    month_start(today.year(), today.month())?,
                )
            }
            Period::Last30Days => TimeRange::new(midnight - Duration::days(30), now),
            Period::ThisYear => TimeRange::new(month_start(today.year(), 1)?, now),
            Period::LastYear => TimeRange::new(
                month_start(today.year() - 1, 1)?,
                month_start(today.year(), 1)?,
            ),
        };
        Ok(range)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn week_start(day: NaiveDate) -> NaiveDateTime {
    let back = i64::from(day.weekday().num_days_from_monday());
    day.and_time(NaiveTime::MIN) - Duration::days(back)
}

fn month_start(year: i32, month: u32) -> Result<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(|d| d.and_time(NaiveTime::MIN))
        .ok_or_else(|| Error::InvalidInput(format!("data inválida: {year}-{month:02}")))
}
