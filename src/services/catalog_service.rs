use crate::error::{AppError, AppResult};
use crate::models::{CoffeeShop, Community};
use crate::repositories::CatalogRepository;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

struct Cached<T> {
    value: T,
    fetched_at: Instant,
}

impl<T: Clone> Cached<T> {
    fn fresh(&self, ttl: Duration) -> Option<T> {
        (self.fetched_at.elapsed() < ttl).then(|| self.value.clone())
    }
}

/// Read-through cache over the catalog; a zero TTL disables caching
pub struct CatalogService {
    catalog: Arc<dyn CatalogRepository>,
    ttl: Duration,
    communities: RwLock<Option<Cached<Vec<Community>>>>,
    coffee_shops: RwLock<HashMap<String, Cached<Vec<CoffeeShop>>>>,
}

impl CatalogService {
    pub fn new(catalog: Arc<dyn CatalogRepository>, ttl: Duration) -> Self {
        Self {
            catalog,
            ttl,
            communities: RwLock::new(None),
            coffee_shops: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Communities ordered by name
    pub async fn list_communities(&self) -> AppResult<Vec<Community>> {
        if let Some(communities) = self
            .communities
            .read()
            .await
            .as_ref()
            .and_then(|c| c.fresh(self.ttl))
        {
            return Ok(communities);
        }

        debug!("Catalog cache miss: communities");
        let mut communities = self.catalog.list_communities().await?;
        communities.sort_by(|a, b| a.name.cmp(&b.name));

        *self.communities.write().await = Some(Cached {
            value: communities.clone(),
            fetched_at: Instant::now(),
        });
        Ok(communities)
    }

    /// Coffee shops of one community, with their beverages
    pub async fn list_coffee_shops(&self, community_id: &str) -> AppResult<Vec<CoffeeShop>> {
        if let Some(shops) = self
            .coffee_shops
            .read()
            .await
            .get(community_id)
            .and_then(|c| c.fresh(self.ttl))
        {
            return Ok(shops);
        }

        debug!("Catalog cache miss: coffee shops of {}", community_id);
        if self.catalog.find_community(community_id).await?.is_none() {
            return Err(AppError::NotFound(format!("community {}", community_id)));
        }
        let shops = self.catalog.list_coffee_shops(community_id).await?;

        self.coffee_shops.write().await.insert(
            community_id.to_string(),
            Cached {
                value: shops.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(shops)
    }
}
