use super::CatalogRepository;
use crate::error::RepositoryError;
use crate::models::{Beverage, BeverageCategory, CoffeeShop, Community};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;

#[derive(FromRow)]
struct CoffeeShopRow {
    id: String,
    name: String,
    address: String,
    image_url: Option<String>,
    points_back_percentage: i32,
    current_crowdedness: i32,
    is_quiet_friendly: bool,
    opening_hours: Option<String>,
    community_id: String,
}

impl CoffeeShopRow {
    fn into_shop(self, beverages: Vec<Beverage>) -> CoffeeShop {
        CoffeeShop {
            id: self.id,
            name: self.name,
            address: self.address,
            image_url: self.image_url,
            points_back_percentage: self.points_back_percentage,
            current_crowdedness: self.current_crowdedness,
            is_quiet_friendly: self.is_quiet_friendly,
            opening_hours: self.opening_hours,
            community_id: self.community_id,
            beverages,
        }
    }
}

#[derive(FromRow)]
struct BeverageRow {
    id: String,
    name: String,
    price: Decimal,
    description: Option<String>,
    category: String,
    coffee_shop_id: String,
}

impl TryFrom<BeverageRow> for Beverage {
    type Error = RepositoryError;

    fn try_from(row: BeverageRow) -> Result<Self, Self::Error> {
        let category = BeverageCategory::from_str(&row.category).ok_or_else(|| {
            RepositoryError::Corrupt(format!("beverage {} has category {}", row.id, row.category))
        })?;

        Ok(Beverage {
            id: row.id,
            name: row.name,
            price: row.price,
            description: row.description,
            category,
            coffee_shop_id: row.coffee_shop_id,
        })
    }
}

const SHOP_COLUMNS: &str = "id, name, address, image_url, points_back_percentage, \
    current_crowdedness, is_quiet_friendly, opening_hours, community_id";

/// Repository for communities, coffee shops and beverages
pub struct PgCatalogRepository {
    pool: PgPool,
}

impl PgCatalogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Attach beverages to shop rows with one query
    async fn with_beverages(&self, rows: Vec<CoffeeShopRow>) -> Result<Vec<CoffeeShop>, RepositoryError> {
        let shop_ids: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();

        let beverage_rows = sqlx::query_as::<_, BeverageRow>(
            r#"
            SELECT id, name, price, description, category, coffee_shop_id
            FROM beverages
            WHERE coffee_shop_id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(&shop_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_shop: HashMap<String, Vec<Beverage>> = HashMap::new();
        for row in beverage_rows {
            let beverage = Beverage::try_from(row)?;
            by_shop.entry(beverage.coffee_shop_id.clone()).or_default().push(beverage);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let beverages = by_shop.remove(&row.id).unwrap_or_default();
                row.into_shop(beverages)
            })
            .collect())
    }
}

#[async_trait]
impl CatalogRepository for PgCatalogRepository {
    async fn list_communities(&self) -> Result<Vec<Community>, RepositoryError> {
        let communities = sqlx::query_as::<_, Community>(
            "SELECT id, name, city, country FROM communities ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(communities)
    }

    async fn find_community(&self, id: &str) -> Result<Option<Community>, RepositoryError> {
        let community = sqlx::query_as::<_, Community>(
            "SELECT id, name, city, country FROM communities WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(community)
    }

    async fn list_coffee_shops(&self, community_id: &str) -> Result<Vec<CoffeeShop>, RepositoryError> {
        let rows = sqlx::query_as::<_, CoffeeShopRow>(&format!(
            "SELECT {} FROM coffee_shops WHERE community_id = $1 ORDER BY id",
            SHOP_COLUMNS
        ))
        .bind(community_id)
        .fetch_all(&self.pool)
        .await?;

        self.with_beverages(rows).await
    }

    async fn find_coffee_shop(&self, id: &str) -> Result<Option<CoffeeShop>, RepositoryError> {
        let row = sqlx::query_as::<_, CoffeeShopRow>(&format!(
            "SELECT {} FROM coffee_shops WHERE id = $1",
            SHOP_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(self.with_beverages(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }
}
