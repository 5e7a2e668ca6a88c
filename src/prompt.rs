//! Prompt enrichment for background generation
//!
//! The generation service gets the user's text behind a framing sentence for the selected
//! background family, steering it toward empty, product-friendly scenes.

use crate::{
    error::{ComposeError, Result},
    types::BackgroundFamily,
};

const PRODUCT_CONTEXT: &str = "Generate a clean and professional background designed for product display. The background should have no objects, focusing only on smooth gradients, plain colors, or subtle textures. Avoid including any products or distractions in the scene, ensuring a polished and neutral setup.";

const LIFESTYLE_CONTEXT: &str = "Create a lifestyle-themed background that is clean and inviting, with no objects in the frame. Focus on the environment, such as walls, surfaces, or ambient settings, while maintaining a modern and elegant look. Avoid adding specific items like furniture or accessories, keeping the background neutral and versatile.";

const SEASONAL_CONTEXT: &str = "Design a seasonal-themed background that represents the chosen season without adding any objects. Use colors, textures, and minimal design elements to evoke the season's essence, such as soft pastels for spring, warm tones for autumn, or cool blues for winter. Keep the background simple and distraction-free.";

/// Suffix appended when the background is meant for product photography
pub const PRODUCT_PHOTOGRAPHY_SUFFIX: &str =
    ". Ensure the background complements product photography with appropriate lighting and depth.";

/// Framing sentence for a background family
#[must_use]
pub fn family_context(family: BackgroundFamily) -> &'static str {
    match family {
        BackgroundFamily::Product => PRODUCT_CONTEXT,
        BackgroundFamily::Lifestyle => LIFESTYLE_CONTEXT,
        BackgroundFamily::Seasonal => SEASONAL_CONTEXT,
    }
}

/// Trim a user prompt and reject it if nothing is left
///
/// # Errors
/// - Prompt is empty or whitespace only
pub fn validate_prompt(prompt: &str) -> Result<&str> {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return Err(ComposeError::InvalidPrompt(
            "prompt must not be empty".to_string(),
        ));
    }
    Ok(trimmed)
}

/// Build the prompt sent to the generation service
///
/// # Examples
/// ```rust
/// use prodapic::{prompt::enhance_prompt, BackgroundFamily};
///
/// let prompt = enhance_prompt("Marble Surface", BackgroundFamily::Product, false);
/// assert!(prompt.ends_with(" marble surface"));
/// ```
#[must_use]
pub fn enhance_prompt(prompt: &str, family: BackgroundFamily, product_context: bool) -> String {
    let suffix = if product_context {
        PRODUCT_PHOTOGRAPHY_SUFFIX
    } else {
        ""
    };
    let enhanced = format!(
        "{} {}{}",
        family_context(family),
        prompt.trim().to_lowercase(),
        suffix
    );
    tracing::debug!(family = %family, length = enhanced.len(), "Enhanced prompt generated");
    enhanced
}
