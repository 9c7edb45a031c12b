use super::Pipeline;
use crate::{utils, CrawlerError, ProductRecord};
use std::collections::HashSet;
use tracing::{debug, info};
use url::Url;

/// Identity of a record within one run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    Url(String),
    NameImage(Option<String>, Option<String>),
}

impl DedupKey {
    pub fn of(record: &ProductRecord) -> DedupKey {
        match &record.url {
            Some(url) => DedupKey::Url(url.clone()),
            None => DedupKey::NameImage(record.name.clone(), record.image_url.clone()),
        }
    }
}

/// Keys seen so far in one run.
#[derive(Debug, Default)]
pub struct DedupState {
    seen: HashSet<DedupKey>,
}

impl DedupState {
    /// Returns `false` when the key was already seen.
    pub fn insert(&mut self, key: DedupKey) -> bool {
        self.seen.insert(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.seen.len()
    }
}

/// Trims the name and makes `url` and `image` absolute against `base`.
pub fn normalize(mut record: ProductRecord, base: &Url) -> ProductRecord {
    let absolute = |value: Option<String>| {
        utils::non_empty(value).map(|v| utils::resolve_url(base, &v).unwrap_or(v))
    };

    record.name = utils::non_empty(record.name);
    record.url = absolute(record.url);
    record.image_url = absolute(record.image_url);
    record
}

pub struct NormalizeAndDedupe {
    base_url: Url,
    state: DedupState,
}

impl NormalizeAndDedupe {
    pub fn new(base_url: Url) -> NormalizeAndDedupe {
        NormalizeAndDedupe {
            base_url,
            state: DedupState::default(),
        }
    }
}

#[async_trait::async_trait]
impl Pipeline for NormalizeAndDedupe {
    fn name(&self) -> &str {
        "NormalizeAndDedupe"
    }

    async fn process_item(
        &mut self,
        item: ProductRecord,
    ) -> Result<Option<ProductRecord>, CrawlerError> {
        let item = normalize(item, &self.base_url);
        if self.state.insert(DedupKey::of(&item)) {
            Ok(Some(item))
        } else {
            debug!("Duplicate product dropped: {:?}", item.url);
            Ok(None)
        }
    }

    async fn close(&mut self) -> Result<(), CrawlerError> {
        info!("{} distinct products in this run", self.state.len());
        Ok(())
    }
}
