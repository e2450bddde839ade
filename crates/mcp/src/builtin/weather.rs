//! Weather tool — current conditions lookup via the OpenWeatherMap API.

use std::time::Duration;

use serde_json::Value;

use parley_domain::error::Result;

use crate::protocol::{McpToolDef, ToolCallResult};

const BASE_URL: &str = "https://api.openweathermap.org/data/2.5/weather";
const API_KEY_ENV: &str = "WEATHER_API_KEY";

pub fn definition() -> McpToolDef {
    McpToolDef {
        name: "get_weather".into(),
        description: "Get current weather for a city, e.g. \"Beijing\" or \"New York\"".into(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "City name in English"
                },
                "unit": {
                    "type": "string",
                    "enum": ["celsius", "fahrenheit"],
                    "description": "Temperature unit (default celsius)"
                }
            },
            "required": ["location"]
        }),
        cacheable: true,
        // Conditions change on the order of minutes, not the default hour.
        cache_ttl_secs: Some(600),
    }
}

pub struct WeatherClient {
    http: reqwest::Client,
    api_key: Option<String>,
}

impl WeatherClient {
    pub fn new(http: reqwest::Client) -> Self {
        let api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(env = API_KEY_ENV, "weather API key not set; get_weather will error");
        }
        Self { http, api_key }
    }

    pub async fn call(&self, args: &Value) -> Result<ToolCallResult> {
        let location = args.get("location").and_then(|l| l.as_str()).unwrap_or("");
        let unit = args
            .get("unit")
            .and_then(|u| u.as_str())
            .unwrap_or("celsius");

        let api_key = match &self.api_key {
            Some(k) => k,
            None => {
                return Ok(ToolCallResult::error(format!(
                    "weather lookup unavailable: {API_KEY_ENV} is not configured"
                )))
            }
        };

        let units = if unit == "fahrenheit" { "imperial" } else { "metric" };
        let resp = self
            .http
            .get(BASE_URL)
            .timeout(Duration::from_secs(10))
            .query(&[("q", location), ("appid", api_key), ("units", units)])
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                return Ok(ToolCallResult::error(format!(
                    "weather request failed: {e}"
                )))
            }
        };

        if !resp.status().is_success() {
            return Ok(ToolCallResult::error(format!(
                "weather lookup for '{location}' failed with HTTP {}",
                resp.status().as_u16()
            )));
        }

        let data: Value = match resp.json().await {
            Ok(d) => d,
            Err(e) => {
                return Ok(ToolCallResult::error(format!(
                    "weather response was not valid JSON: {e}"
                )))
            }
        };

        let payload = serde_json::json!({
            "location": location,
            "temperature": {
                "value": data["main"]["temp"],
                "unit": unit,
            },
            "humidity": data["main"]["humidity"],
            "pressure": data["main"]["pressure"],
            "wind": {
                "speed": data["wind"]["speed"],
                "unit": if units == "metric" { "m/s" } else { "mph" },
            },
            "description": data["weather"][0]["description"],
        });
        Ok(ToolCallResult::ok(payload.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_declares_cache_ttl() {
        let def = definition();
        assert!(def.cacheable);
        assert_eq!(def.cache_ttl_secs, Some(600));
        assert_eq!(def.input_schema["required"][0], "location");
    }

    #[tokio::test]
    async fn missing_api_key_is_a_tool_error_not_a_failure() {
        let client = WeatherClient {
            http: reqwest::Client::new(),
            api_key: None,
        };
        let result = client
            .call(&serde_json::json!({"location": "Beijing"}))
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.joined_text().contains(API_KEY_ENV));
    }
}
