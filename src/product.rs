use crate::utils;
use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One product listing as extracted from a page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub name: Option<String>,
    #[serde(rename = "image")]
    pub image_url: Option<String>,
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default)]
    pub scraped_at: Option<String>,
    #[serde(default)]
    pub scrape_date: Option<String>,
    #[serde(default)]
    pub scrape_run_id: Option<String>,
}

/// A row of the shared `Product` table.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct StoredProduct {
    pub id: String,
    pub name: Option<String>,
    pub image: Option<String>,
    pub url: String,
    pub brand: Option<String>,
    #[sqlx(rename = "scrapedAt")]
    pub scraped_at: DateTime<Utc>,
}

/// Identifiers shared by every record of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeRun {
    pub scraped_at: String,
    pub scrape_date: String,
    pub run_id: String,
}

impl ScrapeRun {
    /// Builds the run identifiers from the orchestrator's scrape time, or from now.
    pub fn new(scrape_time: Option<&str>) -> ScrapeRun {
        let started = scrape_time
            .and_then(utils::parse_timestamp)
            .map(|t| t.with_timezone(&Local))
            .unwrap_or_else(Local::now);

        ScrapeRun {
            scraped_at: scrape_time
                .map(ToString::to_string)
                .unwrap_or_else(|| started.to_rfc3339_opts(SecondsFormat::Micros, false)),
            scrape_date: started.format("%Y-%m-%d").to_string(),
            run_id: started.format("%Y%m%d_%H%M%S").to_string(),
        }
    }

    pub fn stamp(&self, mut record: ProductRecord) -> ProductRecord {
        record
            .scraped_at
            .get_or_insert_with(|| self.scraped_at.clone());
        record
            .scrape_date
            .get_or_insert_with(|| self.scrape_date.clone());
        record
            .scrape_run_id
            .get_or_insert_with(|| self.run_id.clone());
        record
    }
}
