//! Trip planning pipeline
//!
//! Parses a free-text request, gathers travel data from the worker fleet,
//! groups the results into price tiers and asks the LLM for recommendations.

mod cluster;
mod gather;
mod recommend;
mod request;

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub use cluster::{PriceClusters, TripClusters, cluster_by_price};
pub use gather::{ACTIVITY_SERVER, FLIGHT_SERVER, HOTEL_SERVER, RESTAURANT_SERVER, TravelData, gather};
pub use recommend::{Recommendation, Recommender};
pub use request::{TripParser, TripRequest, extract_json};

use crate::fleet::FleetManager;
use crate::llm::{LlmClient, LlmError};

/// Errors from the trip pipeline
#[derive(Debug, Error)]
pub enum TripError {
    #[error("ParseError: {0}")]
    Parse(String),

    #[error("LLM request failed: {0}")]
    Llm(#[from] LlmError),
}

/// A planned trip: the parsed request plus everything gathered for it
#[derive(Debug, Clone, Serialize)]
pub struct TripPlan {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub request: TripRequest,
    pub data: TravelData,
    pub clusters: TripClusters,
    pub recommendations: Vec<Recommendation>,
    pub summary: String,
}

/// Runs the parse, gather, cluster and recommend steps against a fleet
pub struct TripPlanner {
    parser: TripParser,
    recommender: Recommender,
    fleet: FleetManager,
}

impl TripPlanner {
    pub fn new(llm: Arc<dyn LlmClient>, fleet: FleetManager) -> Self {
        Self {
            parser: TripParser::new(llm.clone()),
            recommender: Recommender::new(llm),
            fleet,
        }
    }

    /// Plan a trip from a free-text message
    pub async fn plan(&self, message: &str) -> Result<TripPlan, TripError> {
        self.plan_on(message, Utc::now().date_naive()).await
    }

    /// Plan a trip with default dates relative to `today`
    pub async fn plan_on(&self, message: &str, today: NaiveDate) -> Result<TripPlan, TripError> {
        debug!(%today, "TripPlanner::plan_on: called");
        let request = self.parser.parse(message, today).await?;
        let data = gather(&self.fleet, &request, today).await;
        let clusters = TripClusters::from_data(&data);
        let recommendations = self.recommender.recommend(message, &request, &data, &clusters).await;
        let summary = summarize(&request, &data);

        let plan = TripPlan {
            id: Uuid::now_v7(),
            created_at: Utc::now(),
            request,
            data,
            clusters,
            recommendations,
            summary,
        };
        info!(id = %plan.id, summary = %plan.summary, "Trip planned");
        Ok(plan)
    }
}

fn summarize(request: &TripRequest, data: &TravelData) -> String {
    let mut summary = format!(
        "{}: {} flights, {} hotels, {} activities, {} restaurants",
        request.destination,
        data.flights.len(),
        data.hotels.len(),
        data.activities.len(),
        data.restaurants.len()
    );
    if !data.unavailable.is_empty() {
        summary.push_str(&format!(" (unavailable: {})", data.unavailable.join(", ")));
    }
    summary
}
