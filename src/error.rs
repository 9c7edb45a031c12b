#[derive(Debug, thiserror::Error)]
pub enum CrawlerError {
    #[error("Database error")]
    DatabaseError(#[from] sqlx::error::Error),

    #[error("HTTP error")]
    HttpError(#[from] reqwest::Error),

    #[error("Failed to fetch {0}")]
    FetchFailed(String),

    #[error("Disallowed by robots.txt: {0}")]
    RobotsDisallowed(String),

    #[error("Invalid url")]
    UrlError(#[from] url::ParseError),

    #[error("JSON error")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error")]
    IoError(#[from] std::io::Error),

    #[error("Unknown spider `{0}`, expected one of: {1}")]
    UnknownSpider(String, String),

    #[error("Unsupported database url `{0}`")]
    UnsupportedDatabase(String),
}
