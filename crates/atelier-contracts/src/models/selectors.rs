use super::registry::{ModelRegistry, ModelSpec};
use crate::errors::StudioError;

/// Outcome of resolving a requested model name against the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    /// Set when the requested model was substituted; names the model
    /// actually used.
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Resolves `requested` against the registry. An unknown or
    /// wrong-capability name falls back to the first registered model with
    /// the capability, recording the substitution.
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
    ) -> Result<ModelSelection, StudioError> {
        if let Some(name) = requested {
            if let Some(model) = self.registry.ensure(name, capability) {
                return Ok(ModelSelection {
                    model,
                    requested: Some(name.to_string()),
                    fallback_reason: None,
                });
            }
        }

        let Some(model) = self.registry.by_capability(capability).into_iter().next() else {
            return Err(StudioError::configuration(format!(
                "no models registered for capability '{capability}'"
            )));
        };
        let fallback_reason = Some(match requested {
            Some(name) => format!(
                "requested model '{name}' is not registered for '{capability}'; using '{}'",
                model.name
            ),
            None => format!("no model requested; using '{}'", model.name),
        });
        Ok(ModelSelection {
            model,
            requested: requested.map(str::to_string),
            fallback_reason,
        })
    }

    /// Image selection for the synthesizer: the resolved model must also
    /// carry a synthesis route.
    pub fn select_for_synthesis(
        &self,
        requested: Option<&str>,
    ) -> Result<ModelSelection, StudioError> {
        let selection = self.select(requested, "image")?;
        if selection.model.route.is_none() {
            return Err(StudioError::configuration(format!(
                "model '{}' cannot synthesize images",
                selection.model.name
            )));
        }
        Ok(selection)
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::super::registry::{ModelRegistry, ModelSpec};
    use super::ModelSelector;
    use crate::errors::StudioError;

    #[test]
    fn select_honors_requested_image_model() {
        let selection = ModelSelector::new(None)
            .select(Some("imagen-4.0-ultra-generate-001"), "image")
            .expect("selection");
        assert_eq!(selection.model.name, "imagen-4.0-ultra-generate-001");
        assert!(selection.fallback_reason.is_none());
    }

    #[test]
    fn no_requested_model_falls_back_to_first_image_model() {
        let selection = ModelSelector::new(None)
            .select(None, "image")
            .expect("selection");
        assert_eq!(selection.model.name, "gemini-3-pro-image-preview");
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("no model requested; using 'gemini-3-pro-image-preview'")
        );
    }

    #[test]
    fn unknown_requested_model_records_the_substitution() {
        let selection = ModelSelector::new(None)
            .select(Some("missing"), "image")
            .expect("selection");
        assert_eq!(selection.model.name, "gemini-3-pro-image-preview");
        assert_eq!(selection.requested.as_deref(), Some("missing"));
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("requested model 'missing' is not registered for 'image'; using 'gemini-3-pro-image-preview'")
        );
    }

    #[test]
    fn select_rejects_unknown_capability() {
        assert!(matches!(
            ModelSelector::new(None).select(None, "video"),
            Err(StudioError::Configuration(_))
        ));
    }

    #[test]
    fn select_for_synthesis_resolves_default_multimodal_model() {
        let selection = ModelSelector::new(None)
            .select_for_synthesis(None)
            .expect("selection");
        assert_eq!(selection.model.name, "gemini-3-pro-image-preview");
        assert!(selection.model.route.is_some());
    }

    #[test]
    fn select_for_synthesis_requires_a_route() {
        let mut models = IndexMap::new();
        models.insert(
            "routeless-image".to_string(),
            ModelSpec {
                name: "routeless-image".to_string(),
                label: "Routeless".to_string(),
                provider: "gemini".to_string(),
                capabilities: vec!["image".to_string()],
                route: None,
            },
        );
        let selector = ModelSelector::new(Some(ModelRegistry::new(Some(models))));
        assert!(matches!(
            selector.select_for_synthesis(Some("routeless-image")),
            Err(StudioError::Configuration(_))
        ));
    }
}
