use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Which of the two generation capabilities a model is reached through.
/// Resolved once when the registry is built; dispatch never re-derives
/// this from model-name substrings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisRoute {
    /// `models/{model}:predict`: prompt plus parameters, no reference
    /// images on the wire.
    Direct,
    /// `models/{model}:generateContent` with `responseModalities: IMAGE`;
    /// reference images travel as inline parts ahead of the prompt.
    Multimodal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub label: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    pub route: Option<SynthesisRoute>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str,
                      label: &str,
                      provider: &str,
                      capabilities: &[&str],
                      route: Option<SynthesisRoute>| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                label: label.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
                route,
            },
        );
    };

    insert(
        "gemini-3-pro-preview",
        "Gemini 3 Pro (Text)",
        "gemini",
        &["text"],
        None,
    );
    insert(
        "gemini-3-pro-image-preview",
        "Nano Banana Pro (Gemini 3 Pro Image)",
        "gemini",
        &["image"],
        Some(SynthesisRoute::Multimodal),
    );
    insert(
        "gemini-2.5-flash-image",
        "Nano Banana (Gemini 2.5 Flash Preview Image)",
        "gemini",
        &["image"],
        Some(SynthesisRoute::Multimodal),
    );
    insert(
        "imagen-4.0-ultra-generate-001",
        "Imagen 4 Ultra Generate",
        "imagen",
        &["image"],
        Some(SynthesisRoute::Direct),
    );
    insert(
        "imagen-4.0-generate-001",
        "Imagen 4 Generate",
        "imagen",
        &["image"],
        Some(SynthesisRoute::Direct),
    );
    // Offline backend stays last so it is never picked by default.
    insert(
        "dryrun-image-1",
        "Dryrun (offline)",
        "dryrun",
        &["image"],
        Some(SynthesisRoute::Direct),
    );

    map
}
