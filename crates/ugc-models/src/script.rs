//! Script generation output.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One scene of a generated script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScriptScene {
    pub order: u32,
    pub description: String,
    /// Scene length in seconds
    #[serde(default)]
    pub duration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voiceover: Option<String>,
}

/// Script produced by the script generator for a product and style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedScript {
    pub script: String,
    /// Estimated spoken duration in seconds
    pub estimated_duration: u32,
    #[serde(default)]
    pub scenes: Vec<ScriptScene>,
}

impl GeneratedScript {
    /// Render duration requested from the provider, clamped to what short-form
    /// providers accept.
    pub fn render_duration(&self) -> u32 {
        self.estimated_duration.clamp(5, 60)
    }
}
