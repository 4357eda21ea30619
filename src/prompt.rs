//! Prompt finalization. The result is both what gets hashed into the cache
//! key and what gets submitted.

const REFERENCE_KEYWORDS: [&str; 6] = [
    "image1",
    "image2",
    "first image",
    "second image",
    "image 1",
    "image 2",
];

const SILENT_SUFFIX: &str = "silent video";

/// Options that shape the final prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptOptions {
    /// Prefix a context sentence naming both images when a second image is used.
    pub auto_reference: bool,
    /// Ask for a video without audio.
    pub silent: bool,
}

impl Default for PromptOptions {
    fn default() -> Self {
        Self {
            auto_reference: true,
            silent: false,
        }
    }
}

/// Builds the prompt sent to the service.
///
/// `second_name` is the reference name of the second image, if there is one.
pub fn finalize(
    prompt: &str,
    first_name: &str,
    second_name: Option<&str>,
    options: PromptOptions,
) -> String {
    let mut prompt = match second_name {
        Some(second_name) if options.auto_reference => {
            with_image_references(prompt, first_name, second_name)
        }
        _ => prompt.to_string(),
    };

    if options.silent {
        prompt = format!("{} {SILENT_SUFFIX}", prompt.trim());
    }
    prompt
}

/// Prefixes a context sentence unless the prompt already refers to the images.
pub fn with_image_references(prompt: &str, first_name: &str, second_name: &str) -> String {
    let lower = prompt.to_lowercase();
    let names = [first_name.to_lowercase(), second_name.to_lowercase()];
    let already_referenced = REFERENCE_KEYWORDS
        .iter()
        .any(|keyword| lower.contains(keyword))
        || names
            .iter()
            .any(|name| !name.is_empty() && lower.contains(name.as_str()));

    if already_referenced {
        return prompt.to_string();
    }

    format!(
        "Context: You have two images - '{first_name}' (image1/first image) and \
         '{second_name}' (image2/second image). {}",
        prompt.trim()
    )
}
