use crate::{utils, CrawlerResult, Page, PageRequest, ProductRecord, Spider};
use lazy_regex::regex;
use lazy_static::lazy_static;
use scraper::{ElementRef, Html, Selector};
use url::Url;

const E: &str = "Invalid selector";
lazy_static! {
    static ref CARDS: Vec<Selector> = [
        "div.product-card__figure",
        "div.product-card",
        ".product-item",
        "li.grid__item",
    ]
    .iter()
    .map(|s| Selector::parse(s).expect(E))
    .collect();
    static ref NEXT_PAGE: Vec<Selector> = [
        r#"link[rel="next"]"#,
        r#"a[rel="next"]"#,
        "a.pagination__next",
        "a.next",
    ]
    .iter()
    .map(|s| Selector::parse(s).expect(E))
    .collect();
    static ref IMG: Selector = Selector::parse("img").expect(E);
    static ref A: Selector = Selector::parse("a[href]").expect(E);
}

/// Storefront rendered as HTML product cards with "next page" links.
#[derive(Debug)]
pub struct HtmlCardSpider {
    name: String,
    start_urls: Vec<Url>,
}

impl HtmlCardSpider {
    pub fn new(name: &str, start_urls: Vec<Url>) -> HtmlCardSpider {
        HtmlCardSpider {
            name: name.to_string(),
            start_urls,
        }
    }

    pub fn aegis() -> HtmlCardSpider {
        HtmlCardSpider::new(
            "products",
            vec![Url::parse("https://locallab.com.my/collections/aegis").expect("Invalid url")],
        )
    }

    fn extract_products(&self, doc: &Html, page_url: &Url) -> Vec<ProductRecord> {
        let Some(cards) = CARDS
            .iter()
            .map(|selector| doc.select(selector).collect::<Vec<_>>())
            .find(|cards| !cards.is_empty())
        else {
            return vec![];
        };

        cards
            .into_iter()
            .map(|card| extract_card(card, page_url))
            .collect()
    }

    fn next_page(&self, doc: &Html, page_url: &Url) -> Option<Url> {
        NEXT_PAGE.iter().find_map(|selector| {
            doc.select(selector)
                .find_map(|el| el.value().attr("href"))
                .and_then(|href| page_url.join(href.trim()).ok())
        })
    }
}

fn extract_card(card: ElementRef, page_url: &Url) -> ProductRecord {
    let img = card.select(&IMG).next().map(|el| el.value());
    let link = card.select(&A).next().map(|el| el.value());

    let name = [
        img.and_then(|img| img.attr("alt")),
        link.and_then(|a| a.attr("title")),
    ]
    .into_iter()
    .find_map(utils::non_empty);

    let image_url = img
        .and_then(|img| {
            [img.attr("src"), img.attr("data-src")]
                .into_iter()
                .find_map(utils::non_empty)
                .or_else(|| img.attr("srcset").and_then(first_srcset_candidate))
        })
        .and_then(|src| utils::resolve_url(page_url, &src));

    let url = link
        .and_then(|a| a.attr("href"))
        .and_then(|href| utils::resolve_url(page_url, href));

    ProductRecord {
        name,
        image_url,
        url,
        ..Default::default()
    }
}

/// First url of a `srcset` attribute, e.g. `a.jpg` in `a.jpg 360w, b.jpg 720w`.
fn first_srcset_candidate(srcset: &str) -> Option<String> {
    regex!(r"^\s*([^\s,]+)")
        .captures(srcset)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

impl Spider for HtmlCardSpider {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_urls(&self) -> &[Url] {
        &self.start_urls
    }

    fn start_request(&self, start_url: &Url) -> PageRequest {
        PageRequest {
            url: start_url.clone(),
            base_url: start_url.clone(),
            page: 1,
            render: true,
        }
    }

    fn crawl(&self, page: &Page, request: &PageRequest) -> CrawlerResult {
        let doc = Html::parse_document(&page.body);
        let products = self.extract_products(&doc, &page.url);

        match self.next_page(&doc, &page.url) {
            Some(url) => CrawlerResult::ProductsAndNext(
                products,
                PageRequest {
                    url,
                    base_url: request.base_url.clone(),
                    page: request.page + 1,
                    render: true,
                },
            ),
            None => CrawlerResult::Products(products),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn page(url: &str, body: &str) -> Page {
        Page {
            url: Url::parse(url).unwrap(),
            body: body.to_string(),
        }
    }

    fn product(name: Option<&str>, image: Option<&str>, url: Option<&str>) -> ProductRecord {
        ProductRecord {
            name: name.map(ToString::to_string),
            image_url: image.map(ToString::to_string),
            url: url.map(ToString::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_parsing_collection_page() {
        let s = HtmlCardSpider::aegis();
        let html = fs::read_to_string("tests/htmls/aegis.html").expect("Invalid file url");
        let request = s.start_request(&s.start_urls()[0]);
        let res = s.crawl(
            &page("https://locallab.com.my/collections/aegis?page=2", &html),
            &request,
        );

        let CrawlerResult::ProductsAndNext(products, next) = res else {
            panic!("expected a next page");
        };

        assert_eq!(
            products,
            vec![
                product(
                    Some("Aegis Oversized Tee - Black"),
                    Some("https://locallab.com.my/cdn/shop/files/aegis-tee-black.jpg?v=1&width=533"),
                    Some("https://locallab.com.my/collections/aegis/products/aegis-oversized-tee-black"),
                ),
                product(
                    Some("Aegis Cargo Pants"),
                    Some("https://locallab.com.my/cdn/shop/files/aegis-cargo.jpg"),
                    Some("https://locallab.com.my/products/aegis-cargo-pants"),
                ),
                product(
                    Some("Aegis Windbreaker"),
                    Some("https://cdn.shopify.com/s/files/aegis-windbreaker-360.jpg"),
                    Some("https://locallab.com.my/products/aegis-windbreaker"),
                ),
                product(None, None, Some("https://locallab.com.my/products/aegis-mystery-box")),
            ]
        );
        assert_eq!(
            next,
            PageRequest {
                url: Url::parse("https://locallab.com.my/collections/aegis?page=3").unwrap(),
                base_url: Url::parse("https://locallab.com.my/collections/aegis").unwrap(),
                page: 2,
                render: true,
            }
        );
    }

    #[test]
    fn test_card_selector_fallback() {
        let s = HtmlCardSpider::aegis();
        let html = r#"
            <ul>
              <li class="grid__item"><a href="/products/a" title="Cap"><img src="a.jpg"></a></li>
              <li class="grid__item"><a href="/products/b"><img alt=" " data-src="b.jpg"></a></li>
            </ul>"#;
        let request = s.start_request(&s.start_urls()[0]);
        let res = s.crawl(&page("https://shop.my/collections/all", html), &request);

        let CrawlerResult::Products(products) = res else {
            panic!("expected no next page");
        };
        assert_eq!(
            products,
            vec![
                product(
                    Some("Cap"),
                    Some("https://shop.my/collections/a.jpg"),
                    Some("https://shop.my/products/a"),
                ),
                product(
                    None,
                    Some("https://shop.my/collections/b.jpg"),
                    Some("https://shop.my/products/b"),
                ),
            ]
        );
    }

    #[test]
    fn test_next_page_selector_priority() {
        let s = HtmlCardSpider::aegis();
        let html = r#"
            <div class="product-card"><a href="/products/x">x</a></div>
            <a class="pagination__next" href="?page=9">Next</a>
            <a rel="next" href="?page=2">2</a>"#;
        let request = s.start_request(&s.start_urls()[0]);
        let res = s.crawl(&page("https://locallab.com.my/collections/aegis", html), &request);

        let CrawlerResult::ProductsAndNext(products, next) = res else {
            panic!("expected a next page");
        };
        assert_eq!(products.len(), 1);
        assert_eq!(
            next.url.as_str(),
            "https://locallab.com.my/collections/aegis?page=2"
        );
    }

    #[test]
    fn test_page_without_cards() {
        let s = HtmlCardSpider::aegis();
        let request = s.start_request(&s.start_urls()[0]);
        let res = s.crawl(
            &page("https://locallab.com.my/collections/aegis", "<p>Sold out</p>"),
            &request,
        );
        assert!(matches!(res, CrawlerResult::Products(p) if p.is_empty()));
    }

    #[test]
    fn test_first_srcset_candidate() {
        assert_eq!(
            first_srcset_candidate(" //cdn.my/a.jpg 360w, //cdn.my/b.jpg 720w"),
            Some("//cdn.my/a.jpg".to_string())
        );
        assert_eq!(first_srcset_candidate("   "), None);
    }
}
