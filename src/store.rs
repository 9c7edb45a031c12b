use crate::{CrawlerError, StoredProduct};
use sqlx::{
    postgres::{PgPool, PgPoolOptions},
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Row,
};
use std::str::FromStr;
use tracing::debug;
use url::Url;

/// Query parameters some connection strings carry that the driver rejects.
const UNSUPPORTED_PARAMS: &[&str] = &["schema"];

#[async_trait::async_trait]
pub trait ProductStore: Send + Sync {
    async fn create(&self) -> Result<(), sqlx::Error>;

    /// Inserts new urls and overwrites every column but `id` of known ones.
    async fn upsert(&self, products: &[StoredProduct]) -> Result<(), sqlx::Error>;

    async fn find_by_url(&self, url: &str) -> Result<Option<StoredProduct>, sqlx::Error>;

    async fn count(&self) -> Result<u32, sqlx::Error>;
}

/// Removes query parameters the driver does not understand.
pub fn sanitize_database_url(raw: &str) -> String {
    let raw = raw.trim();
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    if url.query().is_none() {
        return raw.to_string();
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !UNSUPPORTED_PARAMS.iter().any(|p| *p == k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url.into()
}

/// Opens the store matching the url scheme and makes sure the table exists.
pub async fn connect(database_url: &str) -> Result<Box<dyn ProductStore>, CrawlerError> {
    let database_url = sanitize_database_url(database_url);
    let store: Box<dyn ProductStore> = if database_url.starts_with("sqlite:") {
        Box::new(SqliteProducts::connect(&database_url).await?)
    } else if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://")
    {
        Box::new(PostgresProducts::connect(&database_url).await?)
    } else {
        let scheme = database_url.split(':').next().unwrap_or_default();
        return Err(CrawlerError::UnsupportedDatabase(scheme.to_string()));
    };
    store.create().await?;
    Ok(store)
}

pub struct SqliteProducts {
    pool: SqlitePool,
}

impl SqliteProducts {
    pub async fn connect(database_url: &str) -> Result<SqliteProducts, sqlx::Error> {
        let opt = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // One connection: an in-memory database lives and dies with it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opt)
            .await?;
        Ok(SqliteProducts { pool })
    }
}

#[async_trait::async_trait]
impl ProductStore for SqliteProducts {
    async fn create(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
                CREATE TABLE IF NOT EXISTS "Product" (
                    id TEXT PRIMARY KEY,
                    name TEXT,
                    image TEXT,
                    url TEXT UNIQUE,
                    brand TEXT,
                    "scrapedAt" DATETIME NOT NULL
                )
            "#,
        )
        .execute(&self.pool)
        .await?;
        debug!("Product table ready (sqlite)");
        Ok(())
    }

    async fn upsert(&self, products: &[StoredProduct]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for product in products {
            sqlx::query(
                r#"INSERT INTO "Product" (id, name, image, url, brand, "scrapedAt")
                   VALUES (?, ?, ?, ?, ?, ?)
                   ON CONFLICT (url) DO UPDATE SET
                       name = excluded.name,
                       image = excluded.image,
                       brand = excluded.brand,
                       "scrapedAt" = excluded."scrapedAt""#,
            )
            .bind(&product.id)
            .bind(&product.name)
            .bind(&product.image)
            .bind(&product.url)
            .bind(&product.brand)
            .bind(product.scraped_at)
            .execute(&mut tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_by_url(&self, url: &str) -> Result<Option<StoredProduct>, sqlx::Error> {
        sqlx::query_as::<_, StoredProduct>(
            r#"SELECT id, name, image, url, brand, "scrapedAt" FROM "Product" WHERE url = ?"#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
    }

    async fn count(&self) -> Result<u32, sqlx::Error> {
        let count: i64 = sqlx::query(r#"SELECT COUNT(*) FROM "Product""#)
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        Ok(count as u32)
    }
}

pub struct PostgresProducts {
    pool: PgPool,
}

impl PostgresProducts {
    pub async fn connect(database_url: &str) -> Result<PostgresProducts, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await?;
        Ok(PostgresProducts { pool })
    }
}

#[async_trait::async_trait]
impl ProductStore for PostgresProducts {
    async fn create(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
                CREATE TABLE IF NOT EXISTS "Product" (
                    id TEXT PRIMARY KEY,
                    name TEXT,
                    image TEXT,
                    url TEXT UNIQUE,
                    brand TEXT,
                    "scrapedAt" TIMESTAMPTZ NOT NULL
                )
            "#,
        )
        .execute(&self.pool)
        .await?;
        debug!("Product table ready (postgres)");
        Ok(())
    }

    async fn upsert(&self, products: &[StoredProduct]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for product in products {
            sqlx::query(
                r#"INSERT INTO "Product" (id, name, image, url, brand, "scrapedAt")
                   VALUES ($1, $2, $3, $4, $5, $6)
                   ON CONFLICT (url) DO UPDATE SET
                       name = EXCLUDED.name,
                       image = EXCLUDED.image,
                       brand = EXCLUDED.brand,
                       "scrapedAt" = EXCLUDED."scrapedAt""#,
            )
            .bind(&product.id)
            .bind(&product.name)
            .bind(&product.image)
            .bind(&product.url)
            .bind(&product.brand)
            .bind(product.scraped_at)
            .execute(&mut tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_by_url(&self, url: &str) -> Result<Option<StoredProduct>, sqlx::Error> {
        sqlx::query_as::<_, StoredProduct>(
            r#"SELECT id, name, image, url, brand, "scrapedAt"::timestamptz AS "scrapedAt"
               FROM "Product" WHERE url = $1"#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
    }

    async fn count(&self) -> Result<u32, sqlx::Error> {
        let count: i64 = sqlx::query(r#"SELECT COUNT(*) FROM "Product""#)
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        Ok(count as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn product(id: &str, url: &str, name: &str) -> StoredProduct {
        StoredProduct {
            id: id.to_string(),
            name: Some(name.to_string()),
            image: None,
            url: url.to_string(),
            brand: Some("Tomaz".to_string()),
            scraped_at: Utc.with_ymd_and_hms(2024, 5, 1, 2, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_sanitize_database_url() {
        assert_eq!(
            sanitize_database_url("postgresql://u:p@db:5432/shop?schema=public"),
            "postgresql://u:p@db:5432/shop"
        );
        assert_eq!(
            sanitize_database_url("postgresql://u:p@db/shop?schema=public&sslmode=require"),
            "postgresql://u:p@db/shop?sslmode=require"
        );
        assert_eq!(
            sanitize_database_url("postgres://db/shop?sslmode=disable"),
            "postgres://db/shop?sslmode=disable"
        );
        assert_eq!(sanitize_database_url(" sqlite::memory: "), "sqlite::memory:");
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let err = connect("mysql://db/shop").await.err().unwrap();
        assert!(matches!(err, CrawlerError::UnsupportedDatabase(s) if s == "mysql"));
    }

    #[tokio::test]
    async fn test_upsert_keeps_id() {
        let store = connect("sqlite::memory:").await.unwrap();

        store
            .upsert(&[product("id-1", "https://tomaz.my/products/a", "A")])
            .await
            .unwrap();
        store
            .upsert(&[product("id-2", "https://tomaz.my/products/a", "A2")])
            .await
            .unwrap();

        let stored = store
            .find_by_url("https://tomaz.my/products/a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.id, "id-1");
        assert_eq!(stored.name.as_deref(), Some("A2"));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_handles_repeated_url_in_one_batch() {
        let store = connect("sqlite::memory:").await.unwrap();
        store
            .upsert(&[
                product("id-1", "https://tomaz.my/products/a", "first"),
                product("id-2", "https://tomaz.my/products/b", "b"),
                product("id-3", "https://tomaz.my/products/a", "last"),
            ])
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 2);
        let stored = store
            .find_by_url("https://tomaz.my/products/a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.name.as_deref(), Some("last"));
        assert_eq!(stored.id, "id-1");
    }
}
