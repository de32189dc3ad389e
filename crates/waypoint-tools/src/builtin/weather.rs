use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::debug;

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::traits::Tool;

const TOOL_NAME: &str = "getWeather";

/// Current weather for a coordinate, from an Open-Meteo compatible API.
pub struct WeatherTool {
    http: reqwest::Client,
    base_url: String,
}

impl WeatherTool {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Deserialize)]
struct WeatherInput {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentWeather {
    pub temperature: f64,
    pub windspeed: f64,
    #[serde(default)]
    pub winddirection: f64,
    #[serde(default)]
    pub weathercode: i64,
    #[serde(default)]
    pub time: Option<String>,
}

#[derive(Deserialize)]
struct ForecastResponse {
    current_weather: CurrentWeather,
}

fn validate(input: serde_json::Value) -> Result<WeatherInput> {
    let params: WeatherInput =
        serde_json::from_value(input).map_err(|e| WaypointError::ToolValidation(e.to_string()))?;
    if !(-90.0..=90.0).contains(&params.latitude) {
        return Err(WaypointError::ToolValidation(format!(
            "latitude out of range: {}",
            params.latitude
        )));
    }
    if !(-180.0..=180.0).contains(&params.longitude) {
        return Err(WaypointError::ToolValidation(format!(
            "longitude out of range: {}",
            params.longitude
        )));
    }
    Ok(params)
}

impl Tool for WeatherTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Get the current weather (temperature in °C, wind speed and direction) for a latitude and longitude."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "latitude": {
                    "type": "number",
                    "description": "Latitude in decimal degrees"
                },
                "longitude": {
                    "type": "number",
                    "description": "Longitude in decimal degrees"
                }
            },
            "required": ["latitude", "longitude"]
        })
    }

    fn timeout_secs(&self) -> u64 {
        15
    }

    fn execute(&self, args: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let params = validate(args)?;
            let url = format!("{}/v1/forecast", self.base_url);

            debug!(latitude = params.latitude, longitude = params.longitude, "Fetching weather");

            let resp = self
                .http
                .get(&url)
                .query(&[
                    ("latitude", params.latitude.to_string()),
                    ("longitude", params.longitude.to_string()),
                    ("current_weather", "true".to_string()),
                ])
                .send()
                .await
                .map_err(|e| WaypointError::ToolExecution {
                    tool: TOOL_NAME.to_string(),
                    message: format!("Request failed: {}", e),
                })?;

            if !resp.status().is_success() {
                return Err(WaypointError::ToolExecution {
                    tool: TOOL_NAME.to_string(),
                    message: format!("HTTP {}", resp.status()),
                });
            }

            let forecast: ForecastResponse =
                resp.json().await.map_err(|e| WaypointError::ToolExecution {
                    tool: TOOL_NAME.to_string(),
                    message: format!("Invalid response: {}", e),
                })?;

            Ok(serde_json::to_value(forecast.current_weather)?)
        })
    }
}
