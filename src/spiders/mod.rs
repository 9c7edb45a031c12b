mod card;
mod shopify;

pub use card::HtmlCardSpider;
pub use shopify::ShopifySpider;

use crate::{CrawlerError, Spider};
use itertools::Itertools;

/// A spider known to the orchestrator, with the brand its products carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiderEntry {
    pub name: &'static str,
    pub brand: &'static str,
}

/// Every spider, in the order `run-all` runs them.
pub const SPIDERS: [SpiderEntry; 3] = [
    SpiderEntry {
        name: "products",
        brand: "Aegis",
    },
    SpiderEntry {
        name: "tomaz",
        brand: "Tomaz",
    },
    SpiderEntry {
        name: "smart_master",
        brand: "Smart Master",
    },
];

pub fn brand_for(name: &str) -> Option<&'static str> {
    SPIDERS.iter().find(|s| s.name == name).map(|s| s.brand)
}

pub fn build(name: &str) -> Result<Box<dyn Spider>, CrawlerError> {
    match name {
        "products" => Ok(Box::new(HtmlCardSpider::aegis())),
        "tomaz" => Ok(Box::new(ShopifySpider::tomaz())),
        "smart_master" => Ok(Box::new(ShopifySpider::smart_master())),
        _ => Err(CrawlerError::UnknownSpider(
            name.to_string(),
            SPIDERS.iter().map(|s| s.name).join(", "),
        )),
    }
}
