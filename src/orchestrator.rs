//! Runs every spider as its own process and records how each one went.
//!
//! Spiders run one after the other, never concurrently, and all of them get
//! the same scrape time so their records share one run timestamp.

use crate::{
    spiders::SpiderEntry,
    summary::{self, RunSummary, SpiderStatuses, DEFAULT_UTC_OFFSET_HOURS, SUCCESS},
    CrawlerError,
};
use chrono::{Local, SecondsFormat, Utc};
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{error, info};

#[async_trait::async_trait]
pub trait CrawlUnit: Send + Sync {
    /// Runs one spider to completion and returns its summary status.
    async fn run(&self, spider: &SpiderEntry, scrape_time: &str) -> String;
}

/// Runs a spider by re-invoking this executable with `crawl`.
pub struct ProcessUnit {
    exe: PathBuf,
    output_dir: PathBuf,
}

impl ProcessUnit {
    pub fn new(exe: PathBuf, output_dir: PathBuf) -> ProcessUnit {
        ProcessUnit { exe, output_dir }
    }

    pub fn current(output_dir: PathBuf) -> Result<ProcessUnit, CrawlerError> {
        Ok(ProcessUnit::new(std::env::current_exe()?, output_dir))
    }
}

#[async_trait::async_trait]
impl CrawlUnit for ProcessUnit {
    async fn run(&self, spider: &SpiderEntry, scrape_time: &str) -> String {
        let status = Command::new(&self.exe)
            .arg("crawl")
            .arg(spider.name)
            .arg("--scrape-time")
            .arg(scrape_time)
            .arg("--brand")
            .arg(spider.brand)
            .arg("--output-dir")
            .arg(&self.output_dir)
            .status()
            .await;

        match status {
            Ok(status) if status.success() => SUCCESS.to_string(),
            Ok(status) => match status.code() {
                Some(code) => summary::failure_status(format!("exit {}", code)),
                None => summary::failure_status("signal"),
            },
            Err(e) => summary::failure_status(e),
        }
    }
}

#[derive(Debug, Clone, clap::Args)]
pub struct RunAllArgs {
    /// Directory holding the `<spider>.json` feeds
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Where the run summary is written
    #[arg(long, default_value = "last-scrape.json")]
    pub summary: PathBuf,

    #[arg(long, default_value = "run_all_spiders")]
    pub source: String,

    /// Offset of the summary's display timestamp
    #[arg(long, default_value_t = DEFAULT_UTC_OFFSET_HOURS, allow_hyphen_values = true)]
    pub utc_offset_hours: i32,
}

pub async fn run_all<U>(
    unit: &U,
    spiders: &[SpiderEntry],
    args: &RunAllArgs,
) -> Result<RunSummary, CrawlerError>
where
    U: CrawlUnit + ?Sized,
{
    let started = Local::now();
    let scrape_time = started.to_rfc3339_opts(SecondsFormat::Micros, false);
    let run_id = started.format("%Y%m%d_%H%M%S");
    info!("Scrape run {} started, scrape time {}", run_id, scrape_time);

    let mut statuses = SpiderStatuses::default();
    for spider in spiders {
        info!("Running spider: {}", spider.name);
        let status = unit.run(spider, &scrape_time).await;
        if status != SUCCESS {
            error!("Spider {} {}", spider.name, status);
        }
        statuses.insert(spider.name, status);
    }

    let mut count = 0;
    for (name, _) in statuses.iter() {
        count += summary::feed_count(&args.output_dir.join(format!("{}.json", name))).await;
    }

    let summary = RunSummary::new(
        statuses,
        count,
        &args.source,
        Utc::now(),
        args.utc_offset_hours,
    );
    summary.write(&args.summary).await?;

    info!(
        "Scrape run {} finished: {} with {} products",
        run_id, summary.status, summary.count
    );
    Ok(summary)
}
