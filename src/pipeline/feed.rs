use super::Pipeline;
use crate::{CrawlerError, ProductRecord};
use std::path::PathBuf;
use tracing::info;

/// Collects the run's records and writes them as one JSON array on close.
pub struct FeedWriter {
    path: PathBuf,
    items: Vec<ProductRecord>,
}

impl FeedWriter {
    pub fn new(path: impl Into<PathBuf>) -> FeedWriter {
        FeedWriter {
            path: path.into(),
            items: vec![],
        }
    }
}

#[async_trait::async_trait]
impl Pipeline for FeedWriter {
    fn name(&self) -> &str {
        "FeedWriter"
    }

    async fn process_item(
        &mut self,
        item: ProductRecord,
    ) -> Result<Option<ProductRecord>, CrawlerError> {
        self.items.push(item.clone());
        Ok(Some(item))
    }

    async fn close(&mut self) -> Result<(), CrawlerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(&self.items)?;
        tokio::fs::write(&self.path, json).await?;
        info!("Wrote {} items to {}", self.items.len(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_feed_is_overwritten_with_run_items() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feeds").join("tomaz.json");

        for names in [vec!["old-1", "old-2", "old-3"], vec!["new"]] {
            let mut writer = FeedWriter::new(&path);
            for name in names {
                let item = ProductRecord {
                    name: Some(name.to_string()),
                    ..Default::default()
                };
                writer.process_item(item).await.unwrap();
            }
            writer.close().await.unwrap();
        }

        let written: Vec<ProductRecord> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].name.as_deref(), Some("new"));
    }
}
