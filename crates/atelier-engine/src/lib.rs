use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use atelier_contracts::errors::StudioError;
use atelier_contracts::events::{EventPayload, EventWriter};
use atelier_contracts::models::{ModelSelector, ModelSpec, SynthesisRoute};
use atelier_contracts::session::{
    GenerationRecord, ReferenceImage, SessionState, DEFAULT_ACCESS_PASSWORD,
    DEFAULT_HISTORY_CAPACITY,
};
use atelier_contracts::styles::{StyleCache, StyleLibrary};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-3-pro-preview";

const REQUEST_TIMEOUT_SECS: u64 = 90;

#[derive(Debug, Clone)]
pub struct StudioConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub text_model: String,
    pub password: String,
    pub history_capacity: usize,
    pub style_dir: Option<PathBuf>,
}

impl StudioConfig {
    /// Resolves the whole configuration from the environment once.
    /// Nothing is re-read at call time.
    pub fn from_env() -> Self {
        Self {
            api_base: env::var("GEMINI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            api_key: non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY")),
            text_model: non_empty_env("ATELIER_TEXT_MODEL")
                .unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string()),
            password: non_empty_env("ATELIER_PASSWORD")
                .unwrap_or_else(|| DEFAULT_ACCESS_PASSWORD.to_string()),
            history_capacity: non_empty_env("ATELIER_HISTORY_CAPACITY")
                .and_then(|value| value.parse::<usize>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_HISTORY_CAPACITY),
            style_dir: non_empty_env("ATELIER_STYLE_DIR").map(PathBuf::from),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AspectRatio {
    #[default]
    Square,
    Landscape,
    Portrait,
    FourThree,
    ThreeFour,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
            AspectRatio::FourThree => "4:3",
            AspectRatio::ThreeFour => "3:4",
        }
    }

    /// Canvas dimensions used by the offline backend.
    fn base_dims(&self) -> (u32, u32) {
        match self {
            AspectRatio::Square => (512, 512),
            AspectRatio::Landscape => (512, 288),
            AspectRatio::Portrait => (288, 512),
            AspectRatio::FourThree => (512, 384),
            AspectRatio::ThreeFour => (384, 512),
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = StudioError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1:1" | "square" => Ok(AspectRatio::Square),
            "16:9" | "landscape" | "wide" => Ok(AspectRatio::Landscape),
            "9:16" | "portrait" | "tall" => Ok(AspectRatio::Portrait),
            "4:3" => Ok(AspectRatio::FourThree),
            "3:4" => Ok(AspectRatio::ThreeFour),
            other => Err(StudioError::configuration(format!(
                "unsupported aspect ratio '{other}' (expected 1:1, 16:9, 9:16, 4:3 or 3:4)"
            ))),
        }
    }
}

/// One synthesis invocation. Constructed fresh per call, never persisted.
#[derive(Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub references: Vec<ReferenceImage>,
    pub model: ModelSpec,
    pub aspect_ratio: AspectRatio,
    pub image_count: u32,
}

pub struct BackendRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub aspect_ratio: AspectRatio,
    pub image_count: u32,
    pub references: &'a [ReferenceImage],
}

#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BackendResponse {
    pub images: Vec<ImagePayload>,
}

pub trait ImageBackend: Send + Sync {
    fn name(&self) -> &str;
    fn route(&self) -> SynthesisRoute;
    fn synthesize(&self, request: &BackendRequest<'_>) -> Result<BackendResponse, StudioError>;
}

#[derive(Default)]
pub struct ImageBackendRegistry {
    backends: BTreeMap<String, Box<dyn ImageBackend>>,
}

impl ImageBackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<B: ImageBackend + 'static>(&mut self, backend: B) {
        self.backends
            .insert(backend.name().to_string(), Box::new(backend));
    }

    pub fn get(&self, name: &str) -> Option<&dyn ImageBackend> {
        self.backends.get(name).map(|backend| backend.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}

pub trait TextCapability: Send + Sync {
    fn generate(&self, model: &str, instruction: &str) -> Result<String, StudioError>;
}

pub struct GeminiTextCapability {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl GeminiTextCapability {
    pub fn new(config: &StudioConfig) -> Self {
        Self {
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            http: HttpClient::new(),
        }
    }
}

impl TextCapability for GeminiTextCapability {
    fn generate(&self, model: &str, instruction: &str) -> Result<String, StudioError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(StudioError::configuration(
                "GEMINI_API_KEY or GOOGLE_API_KEY not set",
            ));
        };
        let endpoint = endpoint_for_model(&self.api_base, model, "generateContent");
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": instruction }],
            }],
        });
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .json(&payload)
            .send()
            .map_err(|err| {
                StudioError::upstream(format!("text request failed ({endpoint}): {err}"))
            })?;
        let response_payload = response_json_or_error("Gemini", response)?;
        Ok(extract_text_parts(&response_payload))
    }
}

/// Multimodal generation with image output. Reference images travel as
/// inline parts ahead of the prompt text.
pub struct GeminiImageBackend {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl GeminiImageBackend {
    pub fn new(config: &StudioConfig) -> Self {
        Self {
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            http: HttpClient::new(),
        }
    }

    fn build_parts(&self, request: &BackendRequest<'_>) -> Result<Vec<Value>, StudioError> {
        let mut parts = Vec::with_capacity(request.references.len() + 1);
        for reference in request.references {
            parts.push(inline_image_part(reference)?);
        }
        parts.push(json!({ "text": request.prompt }));
        Ok(parts)
    }
}

impl ImageBackend for GeminiImageBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn route(&self) -> SynthesisRoute {
        SynthesisRoute::Multimodal
    }

    fn synthesize(&self, request: &BackendRequest<'_>) -> Result<BackendResponse, StudioError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(StudioError::configuration(
                "GEMINI_API_KEY or GOOGLE_API_KEY not set",
            ));
        };
        let endpoint = endpoint_for_model(&self.api_base, request.model, "generateContent");
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": self.build_parts(request)?,
            }],
            "generationConfig": {
                "candidateCount": request.image_count.max(1),
                "responseModalities": ["IMAGE"],
                "imageConfig": {
                    "aspectRatio": request.aspect_ratio.as_str(),
                },
            },
        });

        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .json(&payload)
            .send()
            .map_err(|err| {
                StudioError::upstream(format!("image request failed ({endpoint}): {err}"))
            })?;
        let response_payload = response_json_or_error("Gemini", response)?;
        Ok(BackendResponse {
            images: extract_inline_images(&response_payload)?,
        })
    }
}

/// Direct image synthesis. The request carries prompt and parameters only;
/// this capability has no slot for reference images.
pub struct ImagenBackend {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl ImagenBackend {
    pub fn new(config: &StudioConfig) -> Self {
        Self {
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            http: HttpClient::new(),
        }
    }
}

impl ImageBackend for ImagenBackend {
    fn name(&self) -> &str {
        "imagen"
    }

    fn route(&self) -> SynthesisRoute {
        SynthesisRoute::Direct
    }

    fn synthesize(&self, request: &BackendRequest<'_>) -> Result<BackendResponse, StudioError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(StudioError::configuration(
                "GEMINI_API_KEY or GOOGLE_API_KEY not set",
            ));
        };
        let endpoint = endpoint_for_model(&self.api_base, request.model, "predict");
        let payload = json!({
            "instances": [{ "prompt": request.prompt }],
            "parameters": {
                "sampleCount": request.image_count.max(1),
                "aspectRatio": request.aspect_ratio.as_str(),
            },
        });

        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .json(&payload)
            .send()
            .map_err(|err| {
                StudioError::upstream(format!("image request failed ({endpoint}): {err}"))
            })?;
        let response_payload = response_json_or_error("Imagen", response)?;
        Ok(BackendResponse {
            images: extract_predictions(&response_payload)?,
        })
    }
}

/// Offline backend: a deterministic prompt-seeded canvas, no network.
pub struct DryrunBackend;

impl ImageBackend for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn route(&self) -> SynthesisRoute {
        SynthesisRoute::Direct
    }

    fn synthesize(&self, request: &BackendRequest<'_>) -> Result<BackendResponse, StudioError> {
        let (width, height) = request.aspect_ratio.base_dims();
        let (r, g, b) = color_from_prompt(request.prompt);
        let mut canvas = RgbImage::new(width, height);
        for pixel in canvas.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let bytes = encode_image(&DynamicImage::ImageRgb8(canvas), OutputFormat::Png)?;
        let count = request.image_count.max(1) as usize;
        let images = (0..count)
            .map(|_| ImagePayload {
                bytes: bytes.clone(),
                mime_type: Some("image/png".to_string()),
            })
            .collect();
        Ok(BackendResponse { images })
    }
}

pub fn default_backend_registry(config: &StudioConfig) -> ImageBackendRegistry {
    let mut backends = ImageBackendRegistry::new();
    backends.register(DryrunBackend);
    backends.register(GeminiImageBackend::new(config));
    backends.register(ImagenBackend::new(config));
    backends
}

const COMPOSER_INSTRUCTIONS: &str = "\
You turn a user command into one final image-generation prompt.
Commands follow a small grammar:
- \"Improve: <idea>\" expands the idea into a rich scene description.
- \"Improve edit: <change>\" describes an edit to the supplied reference \
images; color-marked regions (for example RED strokes) identify the shapes \
the change applies to.
- \"Architectural Recipe <subject>\" composes the subject from the \
architectural styles, materials and lighting in the style context.
- \"Interior Design Recipe <subject>\" does the same for interiors.
- \"Platform: <name>\" tailors framing and resolution hints to the named \
platform.
- \"Multiple: <subject>\" describes a set of coherent variations.
Use the style context only as vocabulary; do not invent categories.
Return only the final prompt text, with no commentary.";

/// Assembles one instruction from the grammar preamble, the style context
/// and the raw command, and issues a single text-generation call. The
/// grammar is an instruction contract to the capability; nothing is parsed
/// locally.
pub struct PromptComposer {
    model: String,
}

impl PromptComposer {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    pub fn compose(
        &self,
        capability: &dyn TextCapability,
        raw_command: &str,
        styles: Option<&StyleLibrary>,
    ) -> Result<String, StudioError> {
        let mut instruction = String::from(COMPOSER_INSTRUCTIONS);
        if let Some(styles) = styles.filter(|library| !library.is_empty()) {
            instruction.push_str("\n\nStyle context:\n");
            instruction.push_str(&styles.prompt_digest());
        }
        instruction.push_str("\n\nCommand:\n");
        instruction.push_str(raw_command);

        let refined = capability.generate(&self.model, &instruction)?;
        let refined = refined.trim();
        if refined.is_empty() {
            return Err(StudioError::upstream(
                "text capability returned an empty prompt",
            ));
        }
        Ok(refined.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct GenerateCommand {
    pub command: String,
    pub model: Option<String>,
    pub aspect_ratio: AspectRatio,
    pub image_count: u32,
    pub reference_ids: Vec<String>,
    /// Skip the composer and send the command text as the prompt.
    pub raw: bool,
}

impl GenerateCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            model: None,
            aspect_ratio: AspectRatio::default(),
            image_count: 1,
            reference_ids: Vec::new(),
            raw: false,
        }
    }
}

pub struct StudioEngine {
    config: StudioConfig,
    events: EventWriter,
    selector: ModelSelector,
    backends: ImageBackendRegistry,
    text: Box<dyn TextCapability>,
    composer: PromptComposer,
    styles: Option<StyleCache>,
}

impl StudioEngine {
    pub fn new(config: StudioConfig, events_path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let text = Box::new(GeminiTextCapability::new(&config));
        let backends = default_backend_registry(&config);
        Self::with_capabilities(config, events_path, text, backends)
    }

    /// Construction seam for tests and embedders: inject the external
    /// capabilities instead of the live transports.
    pub fn with_capabilities(
        config: StudioConfig,
        events_path: impl Into<PathBuf>,
        text: Box<dyn TextCapability>,
        backends: ImageBackendRegistry,
    ) -> anyhow::Result<Self> {
        let session_id = format!("session-{}", timestamp_millis());
        let events = EventWriter::new(events_path.into(), session_id);
        let styles = config.style_dir.clone().map(StyleCache::new);
        let composer = PromptComposer::new(config.text_model.clone());
        events.emit(
            "session_started",
            map_object(json!({
                "history_capacity": config.history_capacity,
                "style_dir": config.style_dir.as_ref().map(|dir| dir.display().to_string()),
            })),
        )?;
        Ok(Self {
            config,
            events,
            selector: ModelSelector::new(None),
            backends,
            text,
            composer,
            styles,
        })
    }

    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    pub fn new_session(&self) -> SessionState {
        SessionState::new(self.config.history_capacity)
    }

    pub fn unlock(&self, session: &mut SessionState, candidate: &str) -> bool {
        let unlocked = session.unlock(candidate, &self.config.password);
        let _ = self.events.emit(
            "access_checked",
            map_object(json!({ "unlocked": unlocked })),
        );
        unlocked
    }

    pub fn style_library(&mut self) -> Result<Option<&StyleLibrary>, StudioError> {
        match self.styles.as_mut() {
            Some(cache) => cache.get_or_load().map(Some),
            None => Ok(None),
        }
    }

    pub fn reload_styles(&mut self) -> Result<String, StudioError> {
        let Some(cache) = self.styles.as_mut() else {
            return Err(StudioError::configuration(
                "no style directory configured (ATELIER_STYLE_DIR)",
            ));
        };
        let message = cache.reload()?;
        let dir = cache.dir().display().to_string();
        self.emit(
            "styles_reloaded",
            map_object(json!({
                "dir": dir,
                "message": message,
            })),
        )?;
        Ok(message)
    }

    /// Refines a raw command into the final generation prompt through a
    /// single text-generation call. No retry; an empty result is an
    /// upstream failure.
    pub fn compose_prompt(&mut self, raw_command: &str) -> Result<String, StudioError> {
        let styles = match self.styles.as_mut() {
            Some(cache) => Some(cache.get_or_load()?.clone()),
            None => None,
        };
        let refined = self
            .composer
            .compose(self.text.as_ref(), raw_command, styles.as_ref())?;
        self.emit(
            "prompt_composed",
            map_object(json!({
                "command": truncate_text(raw_command, 160),
                "prompt": truncate_text(&refined, 160),
            })),
        )?;
        Ok(refined)
    }

    /// Routes the request to the backend registered for its model's
    /// provider. The route tag was fixed when the registry was built; a
    /// mismatch between model and backend wire shape is a configuration
    /// defect, not a dispatch decision.
    pub fn synthesize(&self, request: &GenerationRequest) -> Result<GenerationRecord, StudioError> {
        let Some(route) = request.model.route else {
            return Err(StudioError::configuration(format!(
                "model '{}' cannot synthesize images",
                request.model.name
            )));
        };
        let Some(backend) = self.backends.get(&request.model.provider) else {
            let available = self.backends.names().join(", ");
            return Err(StudioError::configuration(format!(
                "no backend registered for provider '{}' (available: [{available}])",
                request.model.provider
            )));
        };
        if backend.route() != route {
            return Err(StudioError::configuration(format!(
                "backend '{}' does not implement the route required by model '{}'",
                request.model.provider, request.model.name
            )));
        }

        // Reference images are only meaningful on the multimodal path.
        let references: &[ReferenceImage] = match route {
            SynthesisRoute::Direct => &[],
            SynthesisRoute::Multimodal => request.references.as_slice(),
        };
        let backend_request = BackendRequest {
            model: &request.model.name,
            prompt: &request.prompt,
            aspect_ratio: request.aspect_ratio,
            image_count: request.image_count.max(1),
            references,
        };
        let response = backend.synthesize(&backend_request)?;
        let Some(first) = response.images.into_iter().next() else {
            return Err(StudioError::no_image(format!(
                "model '{}' returned no image payload (possibly safety filtered)",
                request.model.name
            )));
        };
        let image = image::load_from_memory(&first.bytes).map_err(|err| {
            StudioError::upstream(format!("could not decode returned image: {err}"))
        })?;
        Ok(GenerationRecord::new(
            image,
            request.prompt.clone(),
            request.model.name.clone(),
        ))
    }

    /// The full pipeline for one user action: compose (unless raw), select
    /// active references, synthesize, then append to the session history.
    /// On failure the session is left exactly as it was.
    pub fn generate(
        &mut self,
        session: &mut SessionState,
        command: &GenerateCommand,
    ) -> Result<GenerationRecord, StudioError> {
        if !session.is_unlocked() {
            return Err(StudioError::configuration(
                "session is locked; unlock with the access password",
            ));
        }
        let selection = self
            .selector
            .select_for_synthesis(command.model.as_deref())?;
        let prompt_used = if command.raw {
            command.command.clone()
        } else {
            self.compose_prompt(&command.command)?
        };
        let references = session.references.select_active(&command.reference_ids)?;
        let request = GenerationRequest {
            prompt: prompt_used,
            references,
            model: selection.model,
            aspect_ratio: command.aspect_ratio,
            image_count: command.image_count,
        };

        match self.synthesize(&request) {
            Ok(record) => {
                self.emit(
                    "image_generated",
                    map_object(json!({
                        "model": request.model.name,
                        "aspect_ratio": request.aspect_ratio.as_str(),
                        "references": request.references.len(),
                        "prompt": truncate_text(&record.prompt_used, 160),
                        "fallback_reason": selection.fallback_reason,
                    })),
                )?;
                session.history.record(record.clone());
                Ok(record)
            }
            Err(err) => {
                let _ = self.events.emit(
                    "generation_failed",
                    map_object(json!({
                        "model": request.model.name,
                        "error": err.to_string(),
                    })),
                );
                Err(err)
            }
        }
    }

    pub fn upscale_record(
        &self,
        record: &GenerationRecord,
        target_width: u32,
    ) -> Result<GenerationRecord, StudioError> {
        let image = upscale(&record.image, target_width)?;
        self.emit(
            "upscale_applied",
            map_object(json!({
                "width": image.width(),
                "height": image.height(),
            })),
        )?;
        Ok(GenerationRecord::new(
            image,
            record.prompt_used.clone(),
            record.model.clone(),
        ))
    }

    fn emit(&self, event_type: &str, payload: EventPayload) -> Result<(), StudioError> {
        self.events
            .emit(event_type, payload)
            .map(|_| ())
            .map_err(|err| {
                StudioError::configuration(format!("event ledger write failed: {err}"))
            })
    }
}

/// Resolution-increasing resample. Pure; aspect ratio is preserved and the
/// filter is Lanczos3, so repeated passes compound resampling loss.
pub fn upscale(image: &DynamicImage, target_width: u32) -> Result<DynamicImage, StudioError> {
    if target_width == 0 {
        return Err(StudioError::configuration("target width must be positive"));
    }
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(StudioError::configuration("cannot upscale an empty image"));
    }
    let target_height =
        ((target_width as f64 * height as f64 / width as f64).round() as u32).max(1);
    Ok(image.resize_exact(target_width, target_height, FilterType::Lanczos3))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Png,
    Jpeg,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = StudioError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "jpg" | "jpeg" => Ok(OutputFormat::Jpeg),
            other => Err(StudioError::configuration(format!(
                "unsupported output format '{other}' (expected png or jpeg)"
            ))),
        }
    }
}

/// Upload surface: common raster formats only.
pub fn load_reference_file(path: &Path) -> Result<(String, DynamicImage), StudioError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if !matches!(extension.as_str(), "png" | "jpg" | "jpeg") {
        return Err(StudioError::configuration(format!(
            "unsupported reference image '{}' (expected png or jpeg)",
            path.display()
        )));
    }
    let pixels = image::open(path).map_err(|err| {
        StudioError::configuration(format!("failed to read {}: {err}", path.display()))
    })?;
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "reference".to_string());
    Ok((name, pixels))
}

/// Download surface: the generated or upscaled image as an encoded byte
/// stream.
pub fn encode_image(image: &DynamicImage, format: OutputFormat) -> Result<Vec<u8>, StudioError> {
    let mut bytes = Vec::new();
    match format {
        OutputFormat::Png => {
            image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        }
        OutputFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            let mut encoder = JpegEncoder::new_with_quality(&mut bytes, 90);
            encoder.encode_image(&rgb)?;
        }
    }
    Ok(bytes)
}

pub fn derived_filename(prompt: &str, format: OutputFormat) -> String {
    format!(
        "atelier-{}-{}.{}",
        short_id(prompt),
        timestamp_millis(),
        format.extension()
    )
}

fn inline_image_part(reference: &ReferenceImage) -> Result<Value, StudioError> {
    let bytes = encode_image(&reference.pixels, OutputFormat::Png)?;
    Ok(json!({
        "inlineData": {
            "mimeType": "image/png",
            "data": BASE64.encode(bytes),
        }
    }))
}

fn extract_text_parts(payload: &Value) -> String {
    let candidates = payload
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut out = String::new();
    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(Value::as_object)
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                out.push_str(text);
            }
        }
    }
    out
}

fn extract_inline_images(payload: &Value) -> Result<Vec<ImagePayload>, StudioError> {
    let candidates = payload
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut out = Vec::new();
    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(Value::as_object)
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            let inline = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let bytes = BASE64.decode(data.as_bytes()).map_err(|err| {
                StudioError::upstream(format!("image payload base64 decode failed: {err}"))
            })?;
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .map(str::to_string);
            out.push(ImagePayload { bytes, mime_type });
        }
    }
    Ok(out)
}

fn extract_predictions(payload: &Value) -> Result<Vec<ImagePayload>, StudioError> {
    let predictions = payload
        .get("predictions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut out = Vec::new();
    for row in predictions {
        let Some(object) = row.as_object() else {
            continue;
        };
        let encoded = object
            .get("bytesBase64Encoded")
            .and_then(Value::as_str)
            .or_else(|| {
                object
                    .get("image")
                    .and_then(Value::as_object)
                    .and_then(|generated| generated.get("imageBytes"))
                    .and_then(Value::as_str)
            });
        let Some(encoded) = encoded else {
            continue;
        };
        let bytes = BASE64.decode(encoded.as_bytes()).map_err(|err| {
            StudioError::upstream(format!("image payload base64 decode failed: {err}"))
        })?;
        let mime_type = object
            .get("mimeType")
            .and_then(Value::as_str)
            .map(str::to_string);
        out.push(ImagePayload { bytes, mime_type });
    }
    Ok(out)
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value, StudioError> {
    let status = response.status();
    let body = response.text().map_err(|err| {
        StudioError::upstream(format!("{provider} response read failed: {err}"))
    })?;
    if !status.is_success() {
        return Err(StudioError::upstream(format!(
            "{provider} request failed ({status}): {}",
            truncate_text(&body, 600)
        )));
    }
    serde_json::from_str(&body).map_err(|err| {
        StudioError::upstream(format!("{provider} returned invalid JSON: {err}"))
    })
}

fn endpoint_for_model(api_base: &str, model: &str, verb: &str) -> String {
    let trimmed = model.trim();
    let model_path = if trimmed.starts_with("models/") {
        trimmed.to_string()
    } else {
        format!("models/{trimmed}")
    };
    format!("{api_base}/{model_path}:{verb}")
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let cut: String = value.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{cut}\u{2026}")
}

fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
}

fn short_id(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..4])
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
