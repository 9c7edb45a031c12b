use super::Pipeline;
use crate::{
    store::{self, ProductStore},
    utils, CrawlerError, ProductRecord, StoredProduct,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Records buffered before one upsert round trip.
pub const BATCH_SIZE: usize = 100;

/// Upserts records into the `Product` table, keyed by url.
///
/// Without a database (none configured, or the first connection failed)
/// the stage passes every record through untouched.
pub struct DbStorePipeline {
    store: Option<Arc<dyn ProductStore>>,
    brand: Option<String>,
    buffer: Vec<StoredProduct>,
}

impl DbStorePipeline {
    pub async fn connect(database_url: Option<&str>, brand: Option<String>) -> DbStorePipeline {
        let Some(database_url) = database_url.filter(|u| !u.trim().is_empty()) else {
            warn!("DATABASE_URL not set, products will not be stored");
            return DbStorePipeline::disabled(brand);
        };

        match store::connect(database_url).await {
            Ok(store) => DbStorePipeline::with_store(Arc::from(store), brand),
            Err(e) => {
                error!("Database unavailable, products will not be stored: {:?}", e);
                DbStorePipeline::disabled(brand)
            }
        }
    }

    pub fn with_store(store: Arc<dyn ProductStore>, brand: Option<String>) -> DbStorePipeline {
        DbStorePipeline {
            store: Some(store),
            brand,
            buffer: Vec::with_capacity(BATCH_SIZE),
        }
    }

    pub fn disabled(brand: Option<String>) -> DbStorePipeline {
        DbStorePipeline {
            store: None,
            brand,
            buffer: vec![],
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    fn to_stored(&self, item: &ProductRecord) -> Option<StoredProduct> {
        let url = item.url.clone()?;
        // Falls back to the time of buffering, not the run's scrape time.
        let scraped_at = item
            .scraped_at
            .as_deref()
            .and_then(utils::parse_timestamp)
            .unwrap_or_else(utils::get_now);

        Some(StoredProduct {
            id: Uuid::new_v4().to_string(),
            name: item.name.clone(),
            image: item.image_url.clone(),
            url,
            brand: item.brand.clone().or_else(|| self.brand.clone()),
            scraped_at,
        })
    }

    async fn flush(&mut self) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        if self.buffer.is_empty() {
            return;
        }

        let batch = std::mem::take(&mut self.buffer);
        match store.upsert(&batch).await {
            Ok(()) => info!("Upserted {} products", batch.len()),
            Err(e) => error!("Failed to upsert {} products: {:?}", batch.len(), e),
        }
    }
}

#[async_trait::async_trait]
impl Pipeline for DbStorePipeline {
    fn name(&self) -> &str {
        "DbStorePipeline"
    }

    async fn process_item(
        &mut self,
        item: ProductRecord,
    ) -> Result<Option<ProductRecord>, CrawlerError> {
        if !self.is_enabled() {
            return Ok(Some(item));
        }

        match self.to_stored(&item) {
            Some(product) => self.buffer.push(product),
            None => debug!("Product without url not stored: {:?}", item.name),
        }
        if self.buffer.len() >= BATCH_SIZE {
            self.flush().await;
        }
        Ok(Some(item))
    }

    async fn close(&mut self) -> Result<(), CrawlerError> {
        self.flush().await;
        Ok(())
    }
}
