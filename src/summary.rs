use crate::CrawlerError;
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::{
    de::{MapAccess, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};
use serde_json::Value;
use std::{fmt, path::Path};
use tracing::{debug, info};

pub const SUCCESS: &str = "success";

/// Hours east of UTC used for the display timestamp (Asia/Kuala_Lumpur).
pub const DEFAULT_UTC_OFFSET_HOURS: i32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Partial,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::Partial => write!(f, "partial"),
        }
    }
}

/// Spider name to status, in the order the spiders ran. Serialized as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpiderStatuses(Vec<(String, String)>);

impl SpiderStatuses {
    /// Sets the status of `name`, keeping its original position if already present.
    pub fn insert(&mut self, name: impl Into<String>, status: impl Into<String>) {
        let (name, status) = (name.into(), status.into());
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = status,
            None => self.0.push((name, status)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, status)| status.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, s)| (n.as_str(), s.as_str()))
    }
}

impl<N: Into<String>, S: Into<String>> FromIterator<(N, S)> for SpiderStatuses {
    fn from_iter<I: IntoIterator<Item = (N, S)>>(iter: I) -> Self {
        let mut statuses = SpiderStatuses::default();
        for (name, status) in iter {
            statuses.insert(name, status);
        }
        statuses
    }
}

impl Serialize for SpiderStatuses {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

impl<'de> Deserialize<'de> for SpiderStatuses {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StatusesVisitor;

        impl<'de> Visitor<'de> for StatusesVisitor {
            type Value = SpiderStatuses;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of spider name to status")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut statuses = SpiderStatuses::default();
                while let Some((name, status)) = map.next_entry::<String, String>()? {
                    statuses.insert(name, status);
                }
                Ok(statuses)
            }
        }

        deserializer.deserialize_map(StatusesVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub status: RunStatus,
    pub timestamp: String,
    pub timestamp_utc: String,
    pub source: String,
    pub spiders: SpiderStatuses,
    pub count: u64,
}

impl RunSummary {
    pub fn new(
        spiders: SpiderStatuses,
        count: u64,
        source: &str,
        now: DateTime<Utc>,
        utc_offset_hours: i32,
    ) -> RunSummary {
        let status = if spiders.iter().all(|(_, s)| s == SUCCESS) {
            RunStatus::Success
        } else {
            RunStatus::Partial
        };

        RunSummary {
            status,
            timestamp: display_timestamp(now, utc_offset_hours),
            timestamp_utc: now.to_rfc3339_opts(SecondsFormat::Micros, true),
            source: source.to_string(),
            spiders,
            count,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Success => 0,
            RunStatus::Partial => 1,
        }
    }

    pub async fn write(&self, path: &Path) -> Result<(), CrawlerError> {
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        info!("Run summary written to {}", path.display());
        Ok(())
    }
}

/// `%d/%m/%Y %H:%M:%S` in the given offset. An out of range offset falls back to UTC+8.
pub fn display_timestamp(now: DateTime<Utc>, utc_offset_hours: i32) -> String {
    let fallback = || FixedOffset::east_opt(DEFAULT_UTC_OFFSET_HOURS * 3600);
    let Some(offset) = utc_offset_hours
        .checked_mul(3600)
        .and_then(FixedOffset::east_opt)
        .or_else(fallback)
    else {
        return now.format("%d/%m/%Y %H:%M:%S UTC").to_string();
    };
    let local = now.with_timezone(&offset);
    format!(
        "{} {}",
        local.format("%d/%m/%Y %H:%M:%S"),
        offset_label(offset)
    )
}

/// `+08`, or `+05:30` for offsets with minutes.
fn offset_label(offset: FixedOffset) -> String {
    let seconds = offset.local_minus_utc();
    let sign = if seconds < 0 { '-' } else { '+' };
    let (hours, minutes) = (seconds.abs() / 3600, seconds.abs() % 3600 / 60);
    if minutes == 0 {
        format!("{}{:02}", sign, hours)
    } else {
        format!("{}{:02}:{:02}", sign, hours, minutes)
    }
}

/// Number of records in a spider's feed; unreadable or missing feeds count 0.
pub async fn feed_count(path: &Path) -> u64 {
    let count = async {
        let raw = tokio::fs::read_to_string(path).await.ok()?;
        let value: Value = serde_json::from_str(&raw).ok()?;
        value.as_array().map(|a| a.len() as u64)
    }
    .await;
    if count.is_none() {
        debug!("No readable feed at {}", path.display());
    }
    count.unwrap_or(0)
}

pub fn failure_status(detail: impl fmt::Display) -> String {
    format!("failed ({})", detail)
}
