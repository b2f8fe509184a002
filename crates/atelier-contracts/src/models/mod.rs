mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec, SynthesisRoute};
pub use selectors::{ModelSelection, ModelSelector};
