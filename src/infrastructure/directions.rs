//! Mapping service client
//!
//! One-shot, stateless HTTP requests against the geocode and directions
//! endpoints. Only the fields the navigation loop consumes are deserialized;
//! everything else in the payload is ignored. Transport failures are retried
//! with bounded backoff before surfacing to the caller.

use crate::domain::models::{Coordinates, NavigationInstruction, Position};
use crate::domain::navigation::RouteResolver;
use crate::domain::settings::Settings;
use crate::error::ResolveError;
use crate::infrastructure::retry::{retry_with_backoff, RetryPolicy};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct MapsConfig {
    pub geocode_url: String,
    pub directions_url: String,
    pub api_key: String,
    pub travel_mode: String,
    pub retry: RetryPolicy,
}

impl MapsConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            geocode_url: settings.geocode_url.clone(),
            directions_url: settings.directions_url.clone(),
            api_key: settings.maps_api_key.clone(),
            travel_mode: settings.travel_mode.clone(),
            retry: RetryPolicy {
                max_attempts: settings.retry_max_attempts,
                initial_delay: Duration::from_millis(settings.retry_initial_delay_ms),
            },
        }
    }
}

pub struct MapsResolver {
    http: reqwest::Client,
    config: MapsConfig,
}

impl MapsResolver {
    pub fn new(config: MapsConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    async fn fetch(&self, url: &str, query: &[(&str, &str)]) -> Result<String, ResolveError> {
        let response = self.http.get(url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::ServiceError(format!("http {status}")));
        }
        Ok(response.text().await?)
    }
}

impl RouteResolver for MapsResolver {
    async fn geocode(&self, address: &str) -> Result<Coordinates, ResolveError> {
        retry_with_backoff(
            self.config.retry,
            ResolveError::is_transient,
            "geocode",
            || async {
                let body = self
                    .fetch(
                        &self.config.geocode_url,
                        &[("address", address), ("key", &self.config.api_key)],
                    )
                    .await?;
                parse_geocode(&body)
            },
        )
        .await
    }

    async fn next_instruction(
        &self,
        origin: &Position,
        destination: Coordinates,
    ) -> Result<NavigationInstruction, ResolveError> {
        let origin_param = format!("{},{}", origin.latitude, origin.longitude);
        let destination_param = destination.to_string();
        debug!("requesting directions {origin_param} -> {destination_param}");

        retry_with_backoff(
            self.config.retry,
            ResolveError::is_transient,
            "directions",
            || async {
                let body = self
                    .fetch(
                        &self.config.directions_url,
                        &[
                            ("origin", origin_param.as_str()),
                            ("destination", destination_param.as_str()),
                            ("mode", self.config.travel_mode.as_str()),
                            ("key", self.config.api_key.as_str()),
                        ],
                    )
                    .await?;
                parse_directions(&body)
            },
        )
        .await
    }
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    status: String,
    #[serde(default)]
    routes: Vec<Route>,
}

#[derive(Debug, Deserialize)]
struct Route {
    #[serde(default)]
    legs: Vec<Leg>,
}

#[derive(Debug, Deserialize)]
struct Leg {
    #[serde(default)]
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
struct Step {
    html_instructions: String,
    distance: DistanceText,
}

#[derive(Debug, Deserialize)]
struct DistanceText {
    text: String,
}

fn parse_geocode(body: &str) -> Result<Coordinates, ResolveError> {
    let response: GeocodeResponse =
        serde_json::from_str(body).map_err(|e| ResolveError::MalformedResponse(e.to_string()))?;

    match response.status.as_str() {
        "OK" => {}
        "ZERO_RESULTS" => return Err(ResolveError::NoResults),
        other => return Err(ResolveError::ServiceError(other.to_string())),
    }

    let location = &response
        .results
        .first()
        .ok_or(ResolveError::NoResults)?
        .geometry
        .location;
    Ok(Coordinates {
        latitude: location.lat,
        longitude: location.lng,
    })
}

/// Extract step 0 of leg 0 of route 0; everything else in the payload is
/// advisory and ignored.
fn parse_directions(body: &str) -> Result<NavigationInstruction, ResolveError> {
    let response: DirectionsResponse =
        serde_json::from_str(body).map_err(|e| ResolveError::MalformedResponse(e.to_string()))?;

    if response.status != "OK" {
        return Err(ResolveError::ServiceError(response.status));
    }

    let step = response
        .routes
        .first()
        .and_then(|route| route.legs.first())
        .and_then(|leg| leg.steps.first())
        .ok_or_else(|| ResolveError::MalformedResponse("no steps in route".to_string()))?;

    Ok(NavigationInstruction {
        distance: step.distance.text.clone(),
        instruction: plain_text(&step.html_instructions),
    })
}

/// Reduce `html_instructions` to plain text: tags are stripped (block tags
/// become a space), entities are decoded, whitespace is collapsed. The HUD
/// firmware renders raw UTF-8 and must never see markup.
pub fn plain_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('>') {
            Some(end) => {
                let name: String = after[..end]
                    .trim_start_matches('/')
                    .chars()
                    .take_while(|c| c.is_ascii_alphanumeric())
                    .collect();
                if matches!(name.to_ascii_lowercase().as_str(), "div" | "br" | "p") {
                    out.push(' ');
                }
                rest = &after[end + 1..];
            }
            // Unterminated tag: drop the remainder.
            None => {
                rest = "";
            }
        }
    }
    out.push_str(rest);

    let decoded = html_escape::decode_html_entities(&out);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}
