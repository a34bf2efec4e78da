//! Log query parameters and the default date window.

use std::str::FromStr;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Date format the logs endpoint expects.
pub const LOG_DATE_FORMAT: &str = "%d-%m-%Y";

/// Width of the window filled in when a bound is missing.
pub const DEFAULT_WINDOW_DAYS: i64 = 6;

/// Routine that produced a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogRoutine {
    Run,
    Host,
}

impl LogRoutine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Run => "Run",
            Self::Host => "Host",
        }
    }
}

impl FromStr for LogRoutine {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Run" => Ok(Self::Run),
            "Host" => Ok(Self::Host),
            other => Err(CoreError::InvalidInput(format!(
                "invalid log routine '{other}', expected Run or Host"
            ))),
        }
    }
}

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogType {
    Ok,
    Error,
    Debug,
    Warning,
}

impl LogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "Ok",
            Self::Error => "Error",
            Self::Debug => "Debug",
            Self::Warning => "Warning",
        }
    }
}

impl FromStr for LogType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Ok" => Ok(Self::Ok),
            "Error" => Ok(Self::Error),
            "Debug" => Ok(Self::Debug),
            "Warning" => Ok(Self::Warning),
            other => Err(CoreError::InvalidInput(format!(
                "invalid log type '{other}', expected Ok, Error, Debug or Warning"
            ))),
        }
    }
}

/// Resolved date range of a log query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Filters for a logs request. Missing bounds are filled relative to today.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub routine: Option<LogRoutine>,
    pub log_type: Option<LogType>,
}

impl LogQuery {
    /// Parses a `dd-mm-YYYY` date.
    pub fn parse_date(s: &str) -> Result<NaiveDate, CoreError> {
        NaiveDate::parse_from_str(s, LOG_DATE_FORMAT)
            .map_err(|e| CoreError::InvalidInput(format!("invalid date '{s}': {e}")))
    }

    /// Fills missing bounds with a six-day window.
    ///
    /// Neither bound: the six days ending `today`. Only `end`: six days
    /// before it. Only `start`: six days after it.
    pub fn window(&self, today: NaiveDate) -> LogWindow {
        let span = Duration::days(DEFAULT_WINDOW_DAYS);
        match (self.start, self.end) {
            (Some(start), Some(end)) => LogWindow { start, end },
            (None, Some(end)) => LogWindow {
                start: end - span,
                end,
            },
            (Some(start), None) => LogWindow {
                start,
                end: start + span,
            },
            (None, None) => LogWindow {
                start: today - span,
                end: today,
            },
        }
    }

    /// Query string pairs for the logs endpoint.
    pub fn to_query(&self, today: NaiveDate) -> Vec<(String, String)> {
        let window = self.window(today);
        let mut query = vec![
            (
                "start".to_string(),
                window.start.format(LOG_DATE_FORMAT).to_string(),
            ),
            (
                "end".to_string(),
                window.end.format(LOG_DATE_FORMAT).to_string(),
            ),
        ];
        if let Some(routine) = self.routine {
            query.push(("routine".to_string(), routine.as_str().to_string()));
        }
        if let Some(log_type) = self.log_type {
            query.push(("type".to_string(), log_type.as_str().to_string()));
        }
        query
    }
}
