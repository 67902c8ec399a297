//! Trip request parsing
//!
//! Turns a free-text travel request into a [`TripRequest`] with one LLM call.

use std::sync::{Arc, LazyLock};

use chrono::{Days, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::TripError;
use crate::llm::{CompletionRequest, LlmClient, Message};

/// Days from today to the default departure
const DEFAULT_LEAD_DAYS: u64 = 30;

/// Default trip length when no end date is given
const DEFAULT_TRIP_DAYS: u64 = 4;

const MAX_PARSE_TOKENS: u32 = 512;

static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*\})\s*```").expect("fenced json pattern is valid"));

/// Structured trip parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRequest {
    pub destination: String,

    #[serde(default)]
    pub departure_city: Option<String>,

    /// YYYY-MM-DD
    #[serde(default)]
    pub start_date: Option<String>,

    /// YYYY-MM-DD
    #[serde(default)]
    pub end_date: Option<String>,

    #[serde(default)]
    pub travelers: Option<u32>,

    #[serde(default)]
    pub budget: Option<f64>,

    #[serde(default)]
    pub interests: Option<Vec<String>>,

    #[serde(default)]
    pub trip_type: Option<String>,
}

impl TripRequest {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            departure_city: None,
            start_date: None,
            end_date: None,
            travelers: None,
            budget: None,
            interests: None,
            trip_type: None,
        }
    }

    /// Number of travelers, at least one
    pub fn travelers(&self) -> u32 {
        self.travelers.unwrap_or(1).max(1)
    }

    pub fn interests(&self) -> &[String] {
        self.interests.as_deref().unwrap_or_default()
    }

    /// Departure city, if the request named one
    pub fn departure(&self) -> Option<&str> {
        self.departure_city.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Start and end dates, filling gaps relative to `today`
    ///
    /// Unparseable dates count as missing. An end before the start is replaced.
    pub fn dates(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let default_start = today.checked_add_days(Days::new(DEFAULT_LEAD_DAYS)).unwrap_or(today);
        let start = parse_date(self.start_date.as_deref()).unwrap_or(default_start);
        let default_end = start.checked_add_days(Days::new(DEFAULT_TRIP_DAYS)).unwrap_or(start);
        let end = parse_date(self.end_date.as_deref())
            .filter(|end| *end >= start)
            .unwrap_or(default_end);
        (start, end)
    }
}

fn parse_date(value: Option<&str>) -> Option<NaiveDate> {
    value.and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
}

/// Pull the JSON object out of an LLM reply
///
/// Accepts a fenced block (```json ... ```) or a bare object with surrounding prose.
pub fn extract_json(text: &str) -> Option<&str> {
    if let Some(captures) = FENCED_JSON.captures(text) {
        return captures.get(1).map(|m| m.as_str());
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Extracts [`TripRequest`]s from free text using an LLM
pub struct TripParser {
    llm: Arc<dyn LlmClient>,
}

impl TripParser {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Parse `message` into trip parameters
    pub async fn parse(&self, message: &str, today: NaiveDate) -> Result<TripRequest, TripError> {
        debug!(chars = message.len(), "TripParser::parse: called");
        let request = CompletionRequest {
            system_prompt: system_prompt(today),
            messages: vec![Message::user(message)],
            max_tokens: MAX_PARSE_TOKENS,
            json_mode: true,
        };

        let response = self.llm.complete(request).await?;
        let text = response
            .content
            .ok_or_else(|| TripError::Parse("empty response from language model".to_string()))?;

        let json = extract_json(&text).ok_or_else(|| {
            warn!(reply = %text, "No JSON object in language model reply");
            TripError::Parse("no JSON object in language model reply".to_string())
        })?;
        let parsed: TripRequest =
            serde_json::from_str(json).map_err(|e| TripError::Parse(format!("invalid trip JSON: {}", e)))?;

        if parsed.destination.trim().is_empty() {
            return Err(TripError::Parse("no destination in request".to_string()));
        }
        info!(destination = %parsed.destination, departure = ?parsed.departure_city, "Parsed trip request");
        Ok(parsed)
    }
}

fn system_prompt(today: NaiveDate) -> String {
    format!(
        r#"You extract travel parameters from a user's request. Today is {today}.
Use airport codes for cities where possible (Los Angeles is LAX).
Reply with only a JSON object of this shape:
{{
  "destination": "city, country",
  "departure_city": "departure location or null",
  "budget": number or null,
  "travelers": number,
  "start_date": "YYYY-MM-DD or null",
  "end_date": "YYYY-MM-DD or null",
  "interests": ["list of interests"],
  "trip_type": "leisure, business or adventure"
}}"#
    )
}
