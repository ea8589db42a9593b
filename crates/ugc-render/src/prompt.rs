//! Style-specific prompt templates.

use ugc_models::VideoStyle;

use crate::provider::{GenerationMode, RenderRequest, DEFAULT_ASPECT_RATIO};

/// Longest script excerpt embedded in a prompt.
const MAX_SCRIPT_CHARS: usize = 1500;

fn style_direction(style: VideoStyle) -> &'static str {
    match style {
        VideoStyle::ProductShowcase => {
            "Clean studio product showcase. Slow orbiting hero shots, macro details of \
             materials, soft key light, bold on-screen feature callouts."
        }
        VideoStyle::TalkingHead => {
            "Authentic creator talking to a handheld phone camera in a bright home \
             setting, holding and demonstrating the product, natural expressions."
        }
        VideoStyle::Lifestyle => {
            "Natural lifestyle footage of the product used in everyday moments, warm \
             daylight, candid framing, quick social-media cuts."
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Compose the provider prompt for a script in a given style.
pub fn build_prompt(script: &str, style: VideoStyle) -> String {
    format!(
        "Vertical {} UGC video for social media. {}\n\nScript:\n{}",
        style.label().to_lowercase(),
        style_direction(style),
        truncate_chars(script.trim(), MAX_SCRIPT_CHARS)
    )
}

/// Build a render request. A product image switches to image-to-video.
pub fn build_request(
    script: &str,
    style: VideoStyle,
    image_url: Option<&str>,
    duration: u32,
) -> RenderRequest {
    let image_url = image_url
        .map(str::trim)
        .filter(|u| u.starts_with("https://") || u.starts_with("http://"))
        .map(str::to_string);

    RenderRequest {
        prompt: build_prompt(script, style),
        mode: if image_url.is_some() {
            GenerationMode::ImageToVideo
        } else {
            GenerationMode::TextToVideo
        },
        image_url,
        duration,
        aspect_ratio: DEFAULT_ASPECT_RATIO.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_mentions_style_and_script() {
        let prompt = build_prompt("Try the new bottle.", VideoStyle::TalkingHead);
        assert!(prompt.contains("talking head"));
        assert!(prompt.contains("Try the new bottle."));
    }

    #[test]
    fn test_image_selects_image_to_video() {
        let req = build_request("s", VideoStyle::Lifestyle, Some("https://cdn/p.jpg"), 15);
        assert_eq!(req.mode, GenerationMode::ImageToVideo);
        assert_eq!(req.aspect_ratio, "9:16");

        let req = build_request("s", VideoStyle::Lifestyle, Some("not-a-url"), 15);
        assert_eq!(req.mode, GenerationMode::TextToVideo);
        assert!(req.image_url.is_none());
    }

    #[test]
    fn test_long_script_truncated_on_char_boundary() {
        let script = "é".repeat(MAX_SCRIPT_CHARS + 10);
        let prompt = build_prompt(&script, VideoStyle::ProductShowcase);
        assert_eq!(prompt.matches('é').count(), MAX_SCRIPT_CHARS);
    }
}
