use crate::{CrawlerError, PageRequest};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE};
use std::{collections::HashMap, sync::Arc};
use texting_robots::Robot;
use tokio::{
    sync::{AcquireError, Mutex, Semaphore, SemaphorePermit},
    time::{Duration, Instant},
};
use tracing::{debug, warn};
use url::Url;

/// A fetched page. `url` is the final response url, after redirects.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: Url,
    pub body: String,
}

#[async_trait::async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: &PageRequest) -> Result<Page, CrawlerError>;
}

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0 Safari/537.36";

#[derive(Debug, Clone, clap::Args)]
pub struct FetchSettings {
    /// Requests in flight at once
    #[arg(long, default_value_t = 4)]
    pub max_concurrent_requests: usize,

    /// HTML page loads in flight at once
    #[arg(long, default_value_t = 2)]
    pub max_render_sessions: usize,

    /// Minimum delay between two requests
    #[arg(long, default_value_t = 1000)]
    pub download_delay_ms: u64,

    /// Per-request timeout
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Fetch pages even when robots.txt disallows them
    #[arg(long)]
    pub ignore_robots: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        FetchSettings {
            max_concurrent_requests: 4,
            max_render_sessions: 2,
            download_delay_ms: 1000,
            timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            ignore_robots: false,
        }
    }
}

/// Permits held for the duration of one request.
struct Permits<'a> {
    _render: Option<SemaphorePermit<'a>>,
    _request: SemaphorePermit<'a>,
}

pub struct HttpFetcher {
    client: reqwest::Client,
    requests: Semaphore,
    render_sessions: Semaphore,
    delay: Duration,
    last_request: Mutex<Option<Instant>>,
    obey_robots: bool,
    robots_agent: String,
    /// Parsed robots.txt per origin; `None` when the origin has none.
    robots: Mutex<HashMap<String, Option<Arc<Robot>>>>,
}

impl HttpFetcher {
    pub fn new(settings: &FetchSettings) -> Result<HttpFetcher, CrawlerError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .default_headers(headers)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        // Product token only, e.g. `Mozilla` out of `Mozilla/5.0 (...)`.
        let robots_agent = settings
            .user_agent
            .split(|c: char| c == '/' || c.is_whitespace())
            .next()
            .unwrap_or_default()
            .to_string();

        Ok(HttpFetcher {
            client,
            requests: Semaphore::new(settings.max_concurrent_requests.max(1)),
            render_sessions: Semaphore::new(settings.max_render_sessions.max(1)),
            delay: Duration::from_millis(settings.download_delay_ms),
            last_request: Mutex::new(None),
            obey_robots: !settings.ignore_robots,
            robots_agent,
            robots: Mutex::new(HashMap::new()),
        })
    }

    async fn permits(&self, request: &PageRequest) -> Result<Permits<'_>, CrawlerError> {
        let closed = |_: AcquireError| CrawlerError::FetchFailed(request.url.to_string());
        let render = if request.render {
            Some(self.render_sessions.acquire().await.map_err(closed)?)
        } else {
            None
        };
        let permit = self.requests.acquire().await.map_err(closed)?;
        Ok(Permits {
            _render: render,
            _request: permit,
        })
    }

    async fn wait_for_turn(&self) {
        let mut last_request = self.last_request.lock().await;
        if let Some(last) = last_request.take() {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                tokio::time::sleep(self.delay - elapsed).await;
            }
        }
        last_request.replace(Instant::now());
    }

    async fn allowed_by_robots(&self, url: &Url) -> bool {
        if !self.obey_robots {
            return true;
        }

        let origin = url.origin().ascii_serialization();
        let mut robots = self.robots.lock().await;
        let robot = match robots.get(&origin) {
            Some(robot) => robot.clone(),
            None => {
                let robot = self.load_robots(url).await.map(Arc::new);
                robots.insert(origin, robot.clone());
                robot
            }
        };
        robot.map_or(true, |robot| robot.allowed(url.as_str()))
    }

    /// A missing, failing or unreadable robots.txt allows everything.
    async fn load_robots(&self, url: &Url) -> Option<Robot> {
        let robots_url = url.join("/robots.txt").ok()?;
        let response = match self.client.get(robots_url.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Could not fetch {}: {}", robots_url, e);
                return None;
            }
        };
        if !response.status().is_success() {
            debug!("No robots.txt at {} ({})", robots_url, response.status());
            return None;
        }

        let body = response.bytes().await.ok()?;
        match Robot::new(&self.robots_agent, &body) {
            Ok(robot) => Some(robot),
            Err(e) => {
                warn!("Unreadable robots.txt at {}: {}", robots_url, e);
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, request: &PageRequest) -> Result<Page, CrawlerError> {
        if !self.allowed_by_robots(&request.url).await {
            return Err(CrawlerError::RobotsDisallowed(request.url.to_string()));
        }

        let _permits = self.permits(request).await?;
        self.wait_for_turn().await;

        debug!("Visit {}", request.url);
        let response = self.client.get(request.url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CrawlerError::FetchFailed(format!(
                "{} (status {})",
                request.url, status
            )));
        }

        let url = response.url().clone();
        let body = response.text().await?;
        Ok(Page { url, body })
    }
}
