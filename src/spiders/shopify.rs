use crate::{utils, CrawlerResult, Page, PageRequest, ProductRecord, Spider};
use serde_json::Value;
use tracing::warn;
use url::Url;

/// Products per `products.json` page; the largest limit Shopify accepts.
pub const PAGE_SIZE: usize = 250;

/// Shopify storefront read through its `products.json` collection API.
#[derive(Debug)]
pub struct ShopifySpider {
    name: String,
    start_urls: Vec<Url>,
    category: Option<String>,
    page_size: usize,
}

impl ShopifySpider {
    pub fn new(name: &str, start_urls: Vec<Url>, category: Option<&str>) -> ShopifySpider {
        ShopifySpider {
            name: name.to_string(),
            start_urls,
            category: category.map(ToString::to_string),
            page_size: PAGE_SIZE,
        }
    }

    pub fn tomaz() -> ShopifySpider {
        ShopifySpider::new(
            "tomaz",
            vec![Url::parse("https://tomaz.my/collections/blazers").expect("Invalid url")],
            Some("formal"),
        )
    }

    pub fn smart_master() -> ShopifySpider {
        ShopifySpider::new(
            "smart_master",
            ["casual-shirt", "formal-trousers"]
                .iter()
                .map(|c| {
                    Url::parse(&format!("https://smartmaster.com.my/collections/{}", c))
                        .expect("Invalid url")
                })
                .collect(),
            None,
        )
    }

    fn page_request(&self, base_url: &Url, page: u32) -> PageRequest {
        let mut url = base_url.clone();
        url.set_query(None);
        url.set_fragment(None);
        let path = format!("{}/products.json", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.query_pairs_mut()
            .append_pair("limit", &self.page_size.to_string())
            .append_pair("page", &page.to_string());

        PageRequest {
            url,
            base_url: base_url.clone(),
            page,
            render: false,
        }
    }

    fn to_record(&self, product: &Value, base_url: &Url) -> ProductRecord {
        let name = utils::non_empty(product.get("title").and_then(Value::as_str));
        let image_url = product
            .get("images")
            .and_then(Value::as_array)
            .and_then(|images| images.first())
            .and_then(|image| image.get("src"))
            .and_then(Value::as_str)
            .map(ToString::to_string);
        let url = product
            .get("handle")
            .and_then(Value::as_str)
            .filter(|handle| !handle.is_empty())
            .and_then(|handle| utils::resolve_url(base_url, &format!("/products/{}", handle)));

        ProductRecord {
            name,
            image_url,
            url,
            category: self.category.clone(),
            ..Default::default()
        }
    }
}

impl Spider for ShopifySpider {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_urls(&self) -> &[Url] {
        &self.start_urls
    }

    fn start_request(&self, start_url: &Url) -> PageRequest {
        self.page_request(start_url, 1)
    }

    fn bounded_pagination(&self) -> bool {
        false
    }

    fn crawl(&self, page: &Page, request: &PageRequest) -> CrawlerResult {
        let body: Value = match serde_json::from_str(&page.body) {
            Ok(body) => body,
            Err(e) => {
                warn!("[{}] Unreadable JSON from {}: {}", self.name, page.url, e);
                Value::Null
            }
        };
        let raw = body
            .get("products")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let products = raw
            .iter()
            .map(|p| self.to_record(p, &request.base_url))
            .collect();

        if raw.len() == self.page_size {
            CrawlerResult::ProductsAndNext(
                products,
                self.page_request(&request.base_url, request.page + 1),
            )
        } else {
            CrawlerResult::Products(products)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn page(request: &PageRequest, body: String) -> Page {
        Page {
            url: request.url.clone(),
            body,
        }
    }

    #[test]
    fn test_start_request() {
        let s = ShopifySpider::smart_master();
        let requests: Vec<_> = s
            .start_urls()
            .iter()
            .map(|u| s.start_request(u).url.to_string())
            .collect();
        assert_eq!(
            requests,
            vec![
                "https://smartmaster.com.my/collections/casual-shirt/products.json?limit=250&page=1",
                "https://smartmaster.com.my/collections/formal-trousers/products.json?limit=250&page=1",
            ]
        );
    }

    #[test]
    fn test_parsing_products() {
        let s = ShopifySpider::tomaz();
        let request = s.start_request(&s.start_urls()[0]);
        let body = json!({
            "products": [
                {
                    "title": "  Slim Fit Blazer  ",
                    "handle": "slim-fit-blazer",
                    "images": [
                        {"src": "https://cdn.shopify.com/s/files/blazer-front.jpg"},
                        {"src": "https://cdn.shopify.com/s/files/blazer-back.jpg"}
                    ]
                },
                {"title": "", "handle": "", "images": []},
                {"title": null, "handle": 42, "images": "nope"},
                "not an object"
            ]
        });

        let res = s.crawl(&page(&request, body.to_string()), &request);
        let CrawlerResult::Products(products) = res else {
            panic!("a short page must end pagination");
        };

        let empty = ProductRecord {
            category: Some("formal".to_string()),
            ..Default::default()
        };
        assert_eq!(
            products,
            vec![
                ProductRecord {
                    name: Some("Slim Fit Blazer".to_string()),
                    image_url: Some("https://cdn.shopify.com/s/files/blazer-front.jpg".to_string()),
                    url: Some("https://tomaz.my/products/slim-fit-blazer".to_string()),
                    category: Some("formal".to_string()),
                    ..Default::default()
                },
                empty.clone(),
                empty.clone(),
                empty,
            ]
        );
    }

    #[test]
    fn test_full_page_requests_next_page() {
        let s = ShopifySpider::smart_master();
        let request = s.start_request(&s.start_urls()[1]);
        let products: Vec<_> = (0..PAGE_SIZE)
            .map(|i| json!({"title": format!("Trouser {}", i), "handle": format!("t-{}", i)}))
            .collect();

        let res = s.crawl(
            &page(&request, json!({ "products": products }).to_string()),
            &request,
        );
        let CrawlerResult::ProductsAndNext(products, next) = res else {
            panic!("a full page must request the next one");
        };
        assert_eq!(products.len(), PAGE_SIZE);
        assert!(products.iter().all(|p| p.category.is_none()));
        assert_eq!(next.page, 2);
        assert_eq!(
            next.url.as_str(),
            "https://smartmaster.com.my/collections/formal-trousers/products.json?limit=250&page=2"
        );
    }

    #[test]
    fn test_short_or_broken_pages_stop() {
        let s = ShopifySpider::tomaz();
        let request = s.start_request(&s.start_urls()[0]);
        let products: Vec<_> = (0..PAGE_SIZE - 1)
            .map(|i| json!({"handle": format!("b-{}", i)}))
            .collect();

        for body in [
            json!({ "products": products }).to_string(),
            json!({ "products": [] }).to_string(),
            json!({ "products": {"title": "x"} }).to_string(),
            "<html>rate limited</html>".to_string(),
        ] {
            let res = s.crawl(&page(&request, body), &request);
            assert!(matches!(res, CrawlerResult::Products(_)));
        }
    }
}
