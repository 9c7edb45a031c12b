//! Item pipeline: ordered stages every extracted record passes through.
//!
//! A stage can rewrite a record, keep it aside, or drop it by returning
//! `Ok(None)`; a dropped record never reaches the later stages.

mod dedupe;
mod feed;
mod persist;

pub use dedupe::{normalize, DedupKey, DedupState, NormalizeAndDedupe};
pub use feed::FeedWriter;
pub use persist::{DbStorePipeline, BATCH_SIZE};

use crate::{CrawlerError, ProductRecord};
use tracing::debug;

#[async_trait::async_trait]
pub trait Pipeline: Send {
    fn name(&self) -> &str;

    async fn process_item(
        &mut self,
        item: ProductRecord,
    ) -> Result<Option<ProductRecord>, CrawlerError>;

    /// Called once after the last item of the run.
    async fn close(&mut self) -> Result<(), CrawlerError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct ItemPipeline {
    stages: Vec<Box<dyn Pipeline>>,
}

impl ItemPipeline {
    pub fn new() -> ItemPipeline {
        ItemPipeline::default()
    }

    pub fn with<P: Pipeline + 'static>(mut self, stage: P) -> ItemPipeline {
        self.stages.push(Box::new(stage));
        self
    }

    pub async fn process_item(
        &mut self,
        item: ProductRecord,
    ) -> Result<Option<ProductRecord>, CrawlerError> {
        let mut item = item;
        for stage in self.stages.iter_mut() {
            match stage.process_item(item).await? {
                Some(next) => item = next,
                None => {
                    debug!("Item dropped by {}", stage.name());
                    return Ok(None);
                }
            }
        }
        Ok(Some(item))
    }

    pub async fn close(&mut self) -> Result<(), CrawlerError> {
        for stage in self.stages.iter_mut() {
            stage.close().await?;
        }
        Ok(())
    }
}
