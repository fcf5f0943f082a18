// src/history.rs
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{Amount, CashbackError};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Increase,
    Decrease,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Increase => "increase",
            OperationKind::Decrease => "decrease",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "increase" => Some(OperationKind::Increase),
            "decrease" => Some(OperationKind::Decrease),
            _ => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request provenance recorded on every ledger row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub host_ip: String,
    pub device: String,
}

impl Origin {
    pub fn new(host_ip: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            host_ip: host_ip.into(),
            device: device.into(),
        }
    }
}

/// A ledger row before the store assigns its identity and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewHistoryEntry {
    pub balance_id: Uuid,
    pub source_id: Uuid,
    pub amount: Amount,
    pub kind: OperationKind,
    pub origin: Origin,
}

/// Immutable record of one accepted mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub balance_id: Uuid,
    pub source_id: Uuid,
    /// Populated on reads; `None` if the source row has since been deleted.
    pub source_slug: Option<String>,
    pub amount: Amount,
    pub kind: OperationKind,
    pub host_ip: String,
    pub device: String,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn from_new(entry: NewHistoryEntry, source_slug: Option<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            balance_id: entry.balance_id,
            source_id: entry.source_id,
            source_slug,
            amount: entry.amount,
            kind: entry.kind,
            host_ip: entry.origin.host_ip,
            device: entry.origin.device,
            created_at: Utc::now(),
        }
    }

    /// Signed effect of this entry on the balance, in minor units.
    pub fn delta(&self) -> i64 {
        match self.kind {
            OperationKind::Increase => self.amount.minor(),
            OperationKind::Decrease => -self.amount.minor(),
        }
    }
}

/// Inclusive calendar-date bounds on a history query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl HistoryFilter {
    /// Parses optional `YYYY-MM-DD` bounds. Empty strings mean "unbounded".
    pub fn parse(from: Option<&str>, to: Option<&str>) -> Result<Self, CashbackError> {
        Ok(Self {
            from: parse_date("from_date", from)?,
            to: parse_date("to_date", to)?,
        })
    }

    /// First instant included by the filter.
    pub fn lower_bound(&self) -> Option<DateTime<Utc>> {
        self.from
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    }

    /// First instant excluded by the filter (start of the day after `to`).
    pub fn upper_bound(&self) -> Option<DateTime<Utc>> {
        self.to
            .and_then(|d| d.checked_add_days(Days::new(1)))
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    }

    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.lower_bound().is_none_or(|lo| at >= lo) && self.upper_bound().is_none_or(|hi| at < hi)
    }
}

fn parse_date(field: &'static str, value: Option<&str>) -> Result<Option<NaiveDate>, CashbackError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => NaiveDate::parse_from_str(v, DATE_FORMAT)
            .map(Some)
            .map_err(|_| CashbackError::InvalidDate {
                field,
                value: v.to_string(),
            }),
    }
}
