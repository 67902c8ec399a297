//! Price tier clustering

use serde::Serialize;
use serde_json::Value;

use super::gather::TravelData;

/// Upper bound of the budget tier, as a fraction of the price range
const LOW_FRACTION: f64 = 0.33;

/// Lower bound of the luxury tier, as a fraction of the price range
const HIGH_FRACTION: f64 = 0.66;

/// Items split into price tiers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PriceClusters {
    pub budget: Vec<Value>,
    pub mid_range: Vec<Value>,
    pub luxury: Vec<Value>,
}

impl PriceClusters {
    pub fn len(&self) -> usize {
        self.budget.len() + self.mid_range.len() + self.luxury.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Split items into budget / mid_range / luxury by their position in the price range
///
/// Items without a numeric `price_key` count as price 0. When every price is
/// zero, or all prices are equal, everything lands in budget. Each item lands
/// in exactly one tier and input order is kept within a tier.
pub fn cluster_by_price(items: &[Value], price_key: &str) -> PriceClusters {
    let prices: Vec<f64> = items.iter().map(|item| price_of(item, price_key)).collect();
    let min = prices.iter().copied().fold(f64::INFINITY, f64::min);
    let max = prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    if items.is_empty() || prices.iter().all(|p| *p == 0.0) || max <= min {
        return PriceClusters {
            budget: items.to_vec(),
            ..Default::default()
        };
    }

    let low = min + (max - min) * LOW_FRACTION;
    let high = min + (max - min) * HIGH_FRACTION;
    let mut clusters = PriceClusters::default();
    for (item, price) in items.iter().zip(prices) {
        if price <= low {
            clusters.budget.push(item.clone());
        } else if price >= high {
            clusters.luxury.push(item.clone());
        } else {
            clusters.mid_range.push(item.clone());
        }
    }
    clusters
}

fn price_of(item: &Value, key: &str) -> f64 {
    item.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

/// Flight and hotel tiers for a trip
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TripClusters {
    pub flight_clusters: PriceClusters,
    pub hotel_clusters: PriceClusters,
    pub summary: String,
}

impl TripClusters {
    pub fn from_data(data: &TravelData) -> Self {
        Self {
            flight_clusters: cluster_by_price(&data.flights, "price"),
            hotel_clusters: cluster_by_price(&data.hotels, "price_per_night"),
            summary: format!(
                "Created clusters from {} flights and {} hotels",
                data.flights.len(),
                data.hotels.len()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn priced(prices: &[f64]) -> Vec<Value> {
        prices.iter().enumerate().map(|(i, p)| json!({"id": i, "price": p})).collect()
    }

    #[test]
    fn test_three_tiers() {
        let items = priced(&[100.0, 500.0, 900.0, 150.0, 800.0]);

        let clusters = cluster_by_price(&items, "price");

        let ids = |tier: &[Value]| tier.iter().map(|v| v["id"].as_u64().unwrap()).collect::<Vec<_>>();
        assert_eq!(ids(&clusters.budget), vec![0, 3]);
        assert_eq!(ids(&clusters.mid_range), vec![1]);
        assert_eq!(ids(&clusters.luxury), vec![2, 4]);
    }

    #[test]
    fn test_empty_and_zero_prices() {
        assert!(cluster_by_price(&[], "price").is_empty());

        let items = vec![json!({"name": "a"}), json!({"name": "b", "price": 0})];
        let clusters = cluster_by_price(&items, "price");
        assert_eq!(clusters.budget.len(), 2);
        assert!(clusters.mid_range.is_empty());
        assert!(clusters.luxury.is_empty());
    }

    #[test]
    fn test_equal_prices_all_budget() {
        let clusters = cluster_by_price(&priced(&[250.0, 250.0, 250.0]), "price");
        assert_eq!(clusters.budget.len(), 3);
        assert!(clusters.luxury.is_empty());
    }

    #[test]
    fn test_trip_clusters_use_price_keys() {
        let data = TravelData {
            flights: priced(&[100.0, 1000.0]),
            hotels: vec![json!({"price_per_night": 80}), json!({"price_per_night": 400})],
            ..Default::default()
        };

        let clusters = TripClusters::from_data(&data);

        assert_eq!(clusters.flight_clusters.budget.len(), 1);
        assert_eq!(clusters.flight_clusters.luxury.len(), 1);
        assert_eq!(clusters.hotel_clusters.budget.len(), 1);
        assert_eq!(clusters.hotel_clusters.luxury.len(), 1);
        assert_eq!(clusters.summary, "Created clusters from 2 flights and 2 hotels");
    }

    proptest! {
        #[test]
        fn prop_tiers_partition_and_order(prices in prop::collection::vec(0.0f64..10_000.0, 0..40)) {
            let items = priced(&prices);
            let clusters = cluster_by_price(&items, "price");

            prop_assert_eq!(clusters.len(), items.len());

            let tier_prices = |tier: &[Value]| tier.iter().map(|v| v["price"].as_f64().unwrap()).collect::<Vec<_>>();
            let budget = tier_prices(&clusters.budget);
            let mid = tier_prices(&clusters.mid_range);
            let luxury = tier_prices(&clusters.luxury);
            for b in &budget {
                for m in &mid {
                    prop_assert!(b < m);
                }
                for l in &luxury {
                    prop_assert!(b < l);
                }
            }
            for m in &mid {
                for l in &luxury {
                    prop_assert!(m < l);
                }
            }
        }
    }
}
