//! Default catalog, mirrored by the `seed_catalog` migration

use crate::models::{Beverage, BeverageCategory, CoffeeShop, Community};
use rust_decimal::Decimal;

fn community(id: &str, name: &str, city: &str, country: &str) -> Community {
    Community {
        id: id.to_string(),
        name: name.to_string(),
        city: city.to_string(),
        country: country.to_string(),
    }
}

fn beverage(
    id: &str,
    name: &str,
    cents: i64,
    description: &str,
    category: BeverageCategory,
    shop_id: &str,
) -> Beverage {
    Beverage {
        id: id.to_string(),
        name: name.to_string(),
        price: Decimal::new(cents, 2),
        description: Some(description.to_string()),
        category,
        coffee_shop_id: shop_id.to_string(),
    }
}

#[allow(clippy::too_many_arguments)]
fn shop(
    id: &str,
    name: &str,
    address: &str,
    points_back_percentage: i32,
    current_crowdedness: i32,
    is_quiet_friendly: bool,
    opening_hours: &str,
    beverages: Vec<Beverage>,
) -> CoffeeShop {
    CoffeeShop {
        id: id.to_string(),
        name: name.to_string(),
        address: address.to_string(),
        image_url: Some(format!("coffee{}", id)),
        points_back_percentage,
        current_crowdedness,
        is_quiet_friendly,
        opening_hours: Some(opening_hours.to_string()),
        community_id: "nyc".to_string(),
        beverages,
    }
}

pub fn default_communities() -> Vec<Community> {
    vec![
        community("nyc", "NYC Coffee Community", "New York", "USA"),
        community("la", "LA Coffee Hub", "Los Angeles", "USA"),
        community("sf", "SF Bay Area Coffee", "San Francisco", "USA"),
        community("london", "London Coffee Circle", "London", "UK"),
        community("paris", "Paris Café Community", "Paris", "France"),
    ]
}

pub fn default_coffee_shops() -> Vec<CoffeeShop> {
    use BeverageCategory::*;

    vec![
        shop(
            "shop1",
            "Blue Bottle Coffee",
            "123 Main St, NYC",
            15,
            75,
            true,
            "6:00 AM - 8:00 PM",
            vec![
                beverage("b1", "Espresso", 350, "Rich and bold", Coffee, "shop1"),
                beverage("b2", "Cappuccino", 450, "Creamy and smooth", Coffee, "shop1"),
                beverage("b3", "Croissant", 300, "Buttery and flaky", Food, "shop1"),
            ],
        ),
        shop(
            "shop2",
            "Stumptown Coffee",
            "456 Coffee Ave, NYC",
            12,
            45,
            false,
            "7:00 AM - 9:00 PM",
            vec![
                beverage("b4", "Cold Brew", 400, "Smooth and refreshing", ColdDrinks, "shop2"),
                beverage("b5", "Latte", 500, "Perfect milk foam", Coffee, "shop2"),
                beverage("b6", "Green Tea", 300, "Organic and fresh", Tea, "shop2"),
            ],
        ),
        shop(
            "shop3",
            "Joe Coffee",
            "789 Brew St, NYC",
            18,
            90,
            true,
            "6:30 AM - 7:30 PM",
            vec![
                beverage("b7", "Americano", 375, "Classic and strong", Coffee, "shop3"),
                beverage("b8", "Matcha Latte", 550, "Creamy matcha goodness", Tea, "shop3"),
                beverage("b9", "Blueberry Muffin", 350, "Fresh baked daily", Food, "shop3"),
            ],
        ),
    ]
}
