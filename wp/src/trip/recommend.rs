//! Recommendations written by the LLM from the gathered data

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::cluster::{PriceClusters, TripClusters};
use super::gather::TravelData;
use super::request::{TripRequest, extract_json};
use crate::llm::{CompletionRequest, LlmClient, Message};

const MAX_RECOMMEND_TOKENS: u32 = 1024;

/// Items per tier shown to the model
const SAMPLE_PER_TIER: usize = 3;

/// One suggestion for the trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub highlights: Vec<String>,

    #[serde(default)]
    pub estimated_cost: Option<f64>,
}

#[derive(Deserialize)]
struct RecommendationReply {
    #[serde(default)]
    recommendations: Vec<Recommendation>,
}

/// Asks the LLM to turn gathered data into recommendations
pub struct Recommender {
    llm: Arc<dyn LlmClient>,
}

impl Recommender {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Recommendations for `message`, empty when there is nothing to go on
    ///
    /// Never fails: an LLM error or an unreadable reply is logged and yields
    /// no recommendations rather than invented ones.
    pub async fn recommend(
        &self,
        message: &str,
        request: &TripRequest,
        data: &TravelData,
        clusters: &TripClusters,
    ) -> Vec<Recommendation> {
        debug!(destination = %request.destination, "Recommender::recommend: called");
        if data.is_empty() {
            info!("No travel data gathered, skipping recommendations");
            return Vec::new();
        }

        let completion = CompletionRequest {
            system_prompt: SYSTEM_PROMPT.to_string(),
            messages: vec![Message::user(context(message, request, data, clusters).to_string())],
            max_tokens: MAX_RECOMMEND_TOKENS,
            json_mode: true,
        };
        let text = match self.llm.complete(completion).await {
            Ok(response) => response.content.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Recommendation request failed");
                return Vec::new();
            }
        };

        match extract_json(&text).map(serde_json::from_str::<RecommendationReply>) {
            Some(Ok(reply)) => {
                info!(count = reply.recommendations.len(), "Received recommendations");
                reply.recommendations
            }
            Some(Err(e)) => {
                warn!(error = %e, "Unreadable recommendations reply");
                Vec::new()
            }
            None => {
                warn!(reply = %text, "No JSON object in recommendations reply");
                Vec::new()
            }
        }
    }
}

const SYSTEM_PROMPT: &str = r#"You are a travel planner. Recommend options using only the travel data provided.
Reply with only a JSON object of this shape:
{
  "recommendations": [
    {"name": "...", "description": "...", "highlights": ["..."], "estimated_cost": number or null}
  ]
}"#;

fn context(message: &str, request: &TripRequest, data: &TravelData, clusters: &TripClusters) -> Value {
    json!({
        "user_request": message,
        "destination": request.destination,
        "budget": request.budget,
        "travelers": request.travelers(),
        "interests": request.interests(),
        "available": {
            "flights": data.flights.len(),
            "hotels": data.hotels.len(),
            "activities": data.activities.len(),
            "restaurants": data.restaurants.len(),
        },
        "unavailable": data.unavailable,
        "flights": sample_tiers(&clusters.flight_clusters),
        "hotels": sample_tiers(&clusters.hotel_clusters),
        "activities": sample(&data.activities),
        "restaurants": sample(&data.restaurants),
    })
}

fn sample_tiers(clusters: &PriceClusters) -> Value {
    json!({
        "budget": sample(&clusters.budget),
        "mid_range": sample(&clusters.mid_range),
        "luxury": sample(&clusters.luxury),
    })
}

fn sample(items: &[Value]) -> Vec<Value> {
    items.iter().take(SAMPLE_PER_TIER).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::mock::MockLlmClient;

    fn data() -> TravelData {
        TravelData {
            hotels: vec![
                json!({"name": "Inn", "price_per_night": 80}),
                json!({"name": "Palace", "price_per_night": 400}),
            ],
            activities: (0..5).map(|i| json!({"name": format!("Tour {}", i)})).collect(),
            unavailable: vec!["restaurant-server".to_string()],
            ..Default::default()
        }
    }

    async fn recommend_with(llm: Arc<MockLlmClient>, data: &TravelData) -> Vec<Recommendation> {
        let request = TripRequest::new("Lisbon");
        let clusters = TripClusters::from_data(data);
        Recommender::new(llm).recommend("Lisbon in May", &request, data, &clusters).await
    }

    #[tokio::test]
    async fn test_recommend_parses_reply_and_sends_data() {
        let llm = Arc::new(MockLlmClient::with_text(
            r#"```json
{"recommendations": [{"name": "Stay at the Inn", "description": "Central and cheap", "highlights": ["Old town"], "estimated_cost": 320}]}
```"#,
        ));

        let recs = recommend_with(llm.clone(), &data()).await;

        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].name, "Stay at the Inn");
        assert_eq!(recs[0].highlights, ["Old town"]);
        assert_eq!(recs[0].estimated_cost, Some(320.0));

        let sent = &llm.requests()[0];
        assert!(sent.json_mode);
        let context: Value = serde_json::from_str(&sent.messages[0].content).unwrap();
        assert_eq!(context["user_request"], "Lisbon in May");
        assert_eq!(context["available"]["hotels"], 2);
        assert_eq!(context["hotels"]["budget"][0]["name"], "Inn");
        assert_eq!(context["hotels"]["luxury"][0]["name"], "Palace");
        assert_eq!(context["activities"].as_array().unwrap().len(), SAMPLE_PER_TIER);
        assert_eq!(context["unavailable"], json!(["restaurant-server"]));
    }

    #[tokio::test]
    async fn test_recommend_degrades_to_empty() {
        let failing = Arc::new(MockLlmClient::new(vec![]));
        assert!(recommend_with(failing.clone(), &data()).await.is_empty());
        assert_eq!(failing.call_count(), 1);

        let rambling = Arc::new(MockLlmClient::with_text("Lisbon is lovely in May."));
        assert!(recommend_with(rambling, &data()).await.is_empty());

        let wrong_shape = Arc::new(MockLlmClient::with_text(r#"{"recommendations": "none"}"#));
        assert!(recommend_with(wrong_shape, &data()).await.is_empty());
    }

    #[tokio::test]
    async fn test_no_data_skips_llm() {
        let llm = Arc::new(MockLlmClient::with_text(r#"{"recommendations": []}"#));
        let empty = TravelData {
            unavailable: vec!["hotel-server".to_string()],
            ..Default::default()
        };

        assert!(recommend_with(llm.clone(), &empty).await.is_empty());
        assert_eq!(llm.call_count(), 0);
    }
}
