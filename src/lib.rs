use futures::stream::{self, StreamExt};
use std::{collections::HashSet, path::PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use url::Url;

pub mod fetch;
pub mod orchestrator;
pub mod pipeline;
pub mod product;
pub mod spiders;
pub mod store;
pub mod summary;

mod error;
mod utils;

pub use error::CrawlerError;
pub use fetch::{Fetch, FetchSettings, HttpFetcher, Page};
pub use pipeline::{ItemPipeline, Pipeline};
pub use product::{ProductRecord, ScrapeRun, StoredProduct};
pub use utils::{non_empty, parse_timestamp, resolve_url};

/// One page to fetch within a crawl chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub url: Url,
    /// Start url the chain came from.
    pub base_url: Url,
    /// 1-based page number within the chain.
    pub page: u32,
    /// Whether the page is a full HTML page load rather than an API call.
    pub render: bool,
}

pub enum CrawlerResult {
    Products(Vec<ProductRecord>),
    ProductsAndNext(Vec<ProductRecord>, PageRequest),
}

pub trait Spider: Send + Sync {
    fn name(&self) -> &str;
    fn start_urls(&self) -> &[Url];
    fn start_request(&self, start_url: &Url) -> PageRequest;
    fn crawl(&self, page: &Page, request: &PageRequest) -> CrawlerResult;

    /// Whether `--max-pages` bounds this spider's chains. Spiders that stop
    /// on their own once the catalog runs out return `false`.
    fn bounded_pagination(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct CrawlSettings {
    /// Upper bound on pages followed from one start url.
    pub max_pages: u32,
    /// Start urls crawled at once.
    pub concurrent_chains: usize,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        CrawlSettings {
            max_pages: 50,
            concurrent_chains: 4,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CrawlReport {
    pub pages: u32,
    pub failed_requests: u32,
    pub extracted: u64,
    pub emitted: u64,
}

#[derive(Debug, Default)]
struct ChainReport {
    pages: u32,
    failed_requests: u32,
}

/// Follows one start url until its spider stops paginating.
async fn crawl_chain<S, F>(
    spider: &S,
    fetcher: &F,
    request: PageRequest,
    max_pages: u32,
    tx: mpsc::Sender<ProductRecord>,
) -> ChainReport
where
    S: Spider + ?Sized,
    F: Fetch + ?Sized,
{
    let mut report = ChainReport::default();
    let mut visited = HashSet::new();
    let mut next = Some(request);

    while let Some(request) = next.take() {
        if !visited.insert(request.url.clone()) {
            warn!("[{}] Pagination cycle at {}, stopping", spider.name(), request.url);
            break;
        }

        let page = match fetcher.fetch(&request).await {
            Ok(page) => page,
            Err(e) => {
                error!("[{}] {:?}", spider.name(), e);
                report.failed_requests += 1;
                break;
            }
        };
        report.pages += 1;

        let (products, next_request) = match spider.crawl(&page, &request) {
            CrawlerResult::Products(products) => (products, None),
            CrawlerResult::ProductsAndNext(products, next_request) => {
                (products, Some(next_request))
            }
        };
        debug!(
            "[{}] Page {} of {} gave {} products",
            spider.name(),
            request.page,
            request.base_url,
            products.len()
        );

        for product in products {
            if tx.send(product).await.is_err() {
                return report;
            }
        }

        match next_request {
            Some(next_request)
                if spider.bounded_pagination() && next_request.page > max_pages =>
            {
                warn!(
                    "[{}] Reached {} pages from {}, stopping",
                    spider.name(),
                    max_pages,
                    request.base_url
                );
            }
            other => next = other,
        }
    }

    report
}

/// Crawls every start url of `spider` and feeds the records through `pipeline`.
///
/// Chains run concurrently but every record goes through a single consumer,
/// so the pipeline has exactly one writer. The pipeline is closed at the end.
pub async fn run_spider<S, F>(
    spider: &S,
    fetcher: &F,
    run: &ScrapeRun,
    pipeline: &mut ItemPipeline,
    settings: &CrawlSettings,
) -> Result<CrawlReport, CrawlerError>
where
    S: Spider + ?Sized,
    F: Fetch + ?Sized,
{
    let (tx, mut rx) = mpsc::channel::<ProductRecord>(100);

    let produce = async move {
        stream::iter(spider.start_urls().iter())
            .map(|start_url| {
                crawl_chain(
                    spider,
                    fetcher,
                    spider.start_request(start_url),
                    settings.max_pages,
                    tx.clone(),
                )
            })
            .buffer_unordered(settings.concurrent_chains.max(1))
            .collect::<Vec<_>>()
            .await
    };

    let consume = async move {
        let mut extracted = 0;
        let mut emitted = 0;
        while let Some(record) = rx.recv().await {
            extracted += 1;
            if pipeline.process_item(run.stamp(record)).await?.is_some() {
                emitted += 1;
            }
        }
        pipeline.close().await?;
        Ok::<_, CrawlerError>((extracted, emitted))
    };

    let (chains, consumed) = tokio::join!(produce, consume);
    let (extracted, emitted) = consumed?;

    let report = CrawlReport {
        pages: chains.iter().map(|c| c.pages).sum(),
        failed_requests: chains.iter().map(|c| c.failed_requests).sum(),
        extracted,
        emitted,
    };
    info!(
        "[{}] Crawled {} pages ({} failed), {} products extracted, {} emitted",
        spider.name(),
        report.pages,
        report.failed_requests,
        report.extracted,
        report.emitted
    );
    Ok(report)
}

#[derive(Debug, Clone, clap::Args)]
pub struct CrawlArgs {
    /// Spider to run
    pub spider: String,

    /// Scrape time shared by every record of the run (ISO-8601)
    #[arg(long)]
    pub scrape_time: Option<String>,

    /// Brand stored with every product of the run
    #[arg(long)]
    pub brand: Option<String>,

    /// Directory receiving `<spider>.json`
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Pages followed from one start url at most, for link-paginated spiders
    #[arg(long, default_value_t = 50)]
    pub max_pages: u32,

    #[command(flatten)]
    pub fetch: FetchSettings,
}

/// Runs one spider end to end: fetch, dedupe, persist and write its feed.
pub async fn run_crawl(args: &CrawlArgs) -> Result<CrawlReport, CrawlerError> {
    let spider = spiders::build(&args.spider)?;
    let run = ScrapeRun::new(args.scrape_time.as_deref());
    info!(
        "[{}] Starting run {} (scraped at {})",
        spider.name(),
        run.run_id,
        run.scraped_at
    );

    let brand = args
        .brand
        .clone()
        .or_else(|| spiders::brand_for(spider.name()).map(ToString::to_string));

    let Some(base_url) = spider.start_urls().first().cloned() else {
        warn!("[{}] No start url, nothing to crawl", spider.name());
        return Ok(CrawlReport::default());
    };

    let mut pipeline = ItemPipeline::new()
        .with(pipeline::NormalizeAndDedupe::new(base_url))
        .with(pipeline::DbStorePipeline::connect(args.database_url.as_deref(), brand).await)
        .with(pipeline::FeedWriter::new(
            args.output_dir.join(format!("{}.json", spider.name())),
        ));

    let fetcher = HttpFetcher::new(&args.fetch)?;
    let settings = CrawlSettings {
        max_pages: args.max_pages,
        concurrent_chains: args.fetch.max_concurrent_requests,
    };

    run_spider(spider.as_ref(), &fetcher, &run, &mut pipeline, &settings).await
}
