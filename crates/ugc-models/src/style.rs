//! Video style definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Visual style of a generated UGC video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoStyle {
    /// Product hero shots with feature callouts
    #[default]
    ProductShowcase,
    /// Creator speaking to camera about the product
    TalkingHead,
    /// Product used in an everyday setting
    Lifestyle,
}

impl VideoStyle {
    pub const ALL: &'static [VideoStyle] = &[
        VideoStyle::ProductShowcase,
        VideoStyle::TalkingHead,
        VideoStyle::Lifestyle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStyle::ProductShowcase => "PRODUCT_SHOWCASE",
            VideoStyle::TalkingHead => "TALKING_HEAD",
            VideoStyle::Lifestyle => "LIFESTYLE",
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            VideoStyle::ProductShowcase => "Product Showcase",
            VideoStyle::TalkingHead => "Talking Head",
            VideoStyle::Lifestyle => "Lifestyle",
        }
    }
}

impl fmt::Display for VideoStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VideoStyle {
    type Err = StyleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace('-', "_").as_str() {
            "PRODUCT_SHOWCASE" => Ok(VideoStyle::ProductShowcase),
            "TALKING_HEAD" => Ok(VideoStyle::TalkingHead),
            "LIFESTYLE" => Ok(VideoStyle::Lifestyle),
            _ => Err(StyleParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown video style: {0}")]
pub struct StyleParseError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(
            "product_showcase".parse::<VideoStyle>().unwrap(),
            VideoStyle::ProductShowcase
        );
        assert_eq!("Talking-Head".parse::<VideoStyle>().unwrap(), VideoStyle::TalkingHead);
        assert!("cinematic".parse::<VideoStyle>().is_err());
    }

    #[test]
    fn test_serde_uses_screaming_case() {
        let json = serde_json::to_string(&VideoStyle::Lifestyle).unwrap();
        assert_eq!(json, "\"LIFESTYLE\"");
        for style in VideoStyle::ALL {
            assert_eq!(style.as_str().parse::<VideoStyle>().unwrap(), *style);
        }
    }
}
