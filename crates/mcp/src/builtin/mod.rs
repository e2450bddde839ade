//! Built-in tool server ("general") — the tools every deployment gets
//! without configuring an external MCP server.

mod calculator;
mod weather;

use serde_json::Value;

use parley_domain::error::{Error, Result};

use crate::protocol::{McpToolDef, ToolCallResult};
use crate::server::ToolServer;

pub use calculator::evaluate as evaluate_expression;

/// The built-in tool collection: `calculator` and `get_weather`.
pub struct GeneralToolServer {
    weather: weather::WeatherClient,
}

impl GeneralToolServer {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            weather: weather::WeatherClient::new(http),
        }
    }
}

#[async_trait::async_trait]
impl ToolServer for GeneralToolServer {
    fn name(&self) -> &str {
        "general"
    }

    fn get_tools(&self) -> Vec<McpToolDef> {
        vec![calculator::definition(), weather::definition()]
    }

    async fn call_tool(&self, name: &str, args: &Value) -> Result<ToolCallResult> {
        match name {
            "calculator" => calculator::call(args),
            "get_weather" => self.weather.call(args).await,
            other => Err(Error::NotFound(format!("tool {other}"))),
        }
    }
}
