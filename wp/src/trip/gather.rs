//! Concurrent fan-out to the travel data workers

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::request::TripRequest;
use crate::fleet::{FleetManager, WorkerStatus};

pub const FLIGHT_SERVER: &str = "flight-server";
pub const HOTEL_SERVER: &str = "hotel-server";
pub const ACTIVITY_SERVER: &str = "activity-server";
pub const RESTAURANT_SERVER: &str = "restaurant-server";

const DEFAULT_MAX_PRICE: u32 = 2000;
const DEFAULT_MAX_RATE: u32 = 200;
const DEFAULT_ACTIVITY_BUDGET: u32 = 100;
const BUDGET_PER_MEAL: u32 = 50;

/// Everything the workers returned for one trip
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TravelData {
    pub flights: Vec<Value>,
    pub hotels: Vec<Value>,
    pub activities: Vec<Value>,
    pub restaurants: Vec<Value>,
    /// Workers that were not ready or whose call failed
    pub unavailable: Vec<String>,
}

impl TravelData {
    pub fn is_empty(&self) -> bool {
        self.flights.is_empty() && self.hotels.is_empty() && self.activities.is_empty() && self.restaurants.is_empty()
    }
}

/// Query the flight, hotel, activity and restaurant workers concurrently
///
/// Flights are only requested when a departure city is known. A worker that
/// is not ready, or whose call fails, contributes an empty list and is listed
/// in `unavailable`.
pub async fn gather(fleet: &FleetManager, request: &TripRequest, today: NaiveDate) -> TravelData {
    debug!(destination = %request.destination, "gather: called");
    let statuses = fleet.status_snapshot();
    let (start, end) = request.dates(today);
    let start = start.format("%Y-%m-%d").to_string();
    let end = end.format("%Y-%m-%d").to_string();
    let travelers = request.travelers();
    let budget_or = |default: u32| request.budget.map(|b| json!(b)).unwrap_or_else(|| json!(default));

    let flights = async {
        match request.departure() {
            Some(origin) => {
                let params = json!({
                    "origin": origin,
                    "destination": request.destination,
                    "departure_date": start,
                    "return_date": end,
                    "adults": travelers,
                    "max_price": budget_or(DEFAULT_MAX_PRICE),
                });
                fetch(fleet, &statuses, FLIGHT_SERVER, "search_flights", params, "flights").await
            }
            None => {
                debug!("gather: no departure city, skipping flights");
                Some(Vec::new())
            }
        }
    };

    let hotels = fetch(
        fleet,
        &statuses,
        HOTEL_SERVER,
        "search_hotels",
        json!({
            "destination": request.destination,
            "checkin_date": start,
            "checkout_date": end,
            "adults": travelers,
            "max_rate": budget_or(DEFAULT_MAX_RATE),
        }),
        "hotels",
    );

    let interests: Vec<String> = if request.interests().is_empty() {
        vec!["sightseeing".to_string()]
    } else {
        request.interests().to_vec()
    };
    let activities = fetch(
        fleet,
        &statuses,
        ACTIVITY_SERVER,
        "find_activities",
        json!({
            "location": request.destination,
            "interests": interests,
            "budget": budget_or(DEFAULT_ACTIVITY_BUDGET),
        }),
        "activities",
    );

    let restaurants = fetch(
        fleet,
        &statuses,
        RESTAURANT_SERVER,
        "find_restaurants",
        json!({
            "location": request.destination,
            "budget_per_meal": BUDGET_PER_MEAL,
            "cuisine_preferences": request.interests(),
        }),
        "restaurants",
    );

    let (flights, hotels, activities, restaurants) = tokio::join!(flights, hotels, activities, restaurants);

    let mut data = TravelData::default();
    for (worker, result, slot) in [
        (FLIGHT_SERVER, flights, &mut data.flights),
        (HOTEL_SERVER, hotels, &mut data.hotels),
        (ACTIVITY_SERVER, activities, &mut data.activities),
        (RESTAURANT_SERVER, restaurants, &mut data.restaurants),
    ] {
        match result {
            Some(items) => *slot = items,
            None => data.unavailable.push(worker.to_string()),
        }
    }

    info!(
        flights = data.flights.len(),
        hotels = data.hotels.len(),
        activities = data.activities.len(),
        restaurants = data.restaurants.len(),
        unavailable = ?data.unavailable,
        "Gathered travel data"
    );
    data
}

/// Call one worker and pull the list under `key`; None when unavailable
async fn fetch(
    fleet: &FleetManager,
    statuses: &BTreeMap<String, WorkerStatus>,
    worker: &str,
    tool: &str,
    params: Value,
    key: &str,
) -> Option<Vec<Value>> {
    if statuses.get(worker) != Some(&WorkerStatus::Ready) {
        debug!(%worker, status = ?statuses.get(worker), "fetch: worker not ready, skipping");
        return None;
    }
    match fleet.call_strict(worker, tool, params).await {
        Ok(value) => Some(extract_list(&value, key)),
        Err(e) => {
            warn!(%worker, %tool, error = %e, "Travel data call failed");
            None
        }
    }
}

fn extract_list(value: &Value, key: &str) -> Vec<Value> {
    value.get(key).and_then(Value::as_array).cloned().unwrap_or_default()
}
