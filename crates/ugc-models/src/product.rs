//! Product snapshot captured by the browser extension.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Product data scraped from a product page.
///
/// Only the fields the backend reads are typed; everything else the scraper
/// sends is preserved in `extra` and stored verbatim on the video record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProductData {
    #[validate(length(min = 1, max = 300))]
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 5000))]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(url)]
    pub url: Option<String>,

    #[serde(default)]
    #[validate(length(max = 20))]
    pub images: Vec<String>,

    #[serde(default)]
    pub features: Vec<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ProductData {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.images.push(image.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// First usable image, used as the source frame for image-to-video.
    pub fn primary_image(&self) -> Option<&str> {
        self.images
            .iter()
            .map(|s| s.trim())
            .find(|s| s.starts_with("https://") || s.starts_with("http://"))
    }

    /// Opaque JSON snapshot persisted on the video record.
    pub fn to_snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_image_skips_non_http_entries() {
        let product = ProductData::new("Mug")
            .with_image("data:image/png;base64,AAAA")
            .with_image(" https://cdn.shop/mug.jpg ");
        assert_eq!(product.primary_image(), Some("https://cdn.shop/mug.jpg"));
    }

    #[test]
    fn test_unknown_fields_are_preserved() {
        let json = serde_json::json!({
            "title": "Desk Lamp",
            "images": [],
            "rating": 4.5,
            "reviewCount": 120
        });
        let product: ProductData = serde_json::from_value(json).unwrap();
        assert_eq!(product.extra.get("rating"), Some(&serde_json::json!(4.5)));

        let snapshot = product.to_snapshot();
        assert_eq!(snapshot["reviewCount"], 120);
    }

    #[test]
    fn test_validation_rejects_empty_title_and_bad_url() {
        assert!(ProductData::new("").validate().is_err());
        assert!(ProductData::new("Lamp").with_url("not a url").validate().is_err());
        assert!(ProductData::new("Lamp")
            .with_url("https://shop.example/lamp")
            .validate()
            .is_ok());
    }
}
