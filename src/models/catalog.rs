//! Communities, coffee shops and the beverages they sell

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, FromRow)]
pub struct Community {
    pub id: String,
    pub name: String,
    pub city: String,
    pub country: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BeverageCategory {
    #[serde(rename = "coffee")]
    Coffee,
    #[serde(rename = "tea")]
    Tea,
    #[serde(rename = "cold_drinks")]
    ColdDrinks,
    #[serde(rename = "food")]
    Food,
}

impl BeverageCategory {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "coffee" => Some(Self::Coffee),
            "tea" => Some(Self::Tea),
            "cold_drinks" => Some(Self::ColdDrinks),
            "food" => Some(Self::Food),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beverage {
    pub id: String,
    pub name: String,
    pub price: Decimal,
    pub description: Option<String>,
    pub category: BeverageCategory,
    pub coffee_shop_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoffeeShop {
    pub id: String,
    pub name: String,
    pub address: String,
    pub image_url: Option<String>,
    /// Share of the purchase returned as points, 0..=100
    pub points_back_percentage: i32,
    /// 0..=100
    pub current_crowdedness: i32,
    pub is_quiet_friendly: bool,
    pub opening_hours: Option<String>,
    pub community_id: String,
    pub beverages: Vec<Beverage>,
}

impl CoffeeShop {
    /// Points earned for a purchase at this shop.
    ///
    /// The percentage is cash back, paid at 100 points per currency unit, so
    /// the award is `purchase * percentage` rounded down. Returns `None` if
    /// the result does not fit in an `i64`.
    pub fn points_for_purchase(&self, purchase_amount: Decimal) -> Option<i64> {
        use rust_decimal::prelude::ToPrimitive;

        purchase_amount
            .checked_mul(Decimal::from(self.points_back_percentage))?
            .floor()
            .to_i64()
    }
}
