//! Job input schema: field types, ranges, and defaults.
//!
//! [`validate_input`] turns the raw `input` object of a job request into a
//! typed [`JobInput`], reporting every rejected field at once rather than
//! stopping at the first one.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, FieldErrors};
use crate::overrides::Overrides;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_NEGATIVE_PROMPT: &str = "low quality, blurry, distorted";
/// `-1` asks the backend sampler for a random seed.
pub const DEFAULT_SEED: i64 = -1;
pub const DEFAULT_STEPS: u32 = 26;
pub const DEFAULT_CFG: f64 = 4.0;
pub const DEFAULT_WIDTH: u32 = 1024;
pub const DEFAULT_HEIGHT: u32 = 1024;
/// Quality used for lossy re-encoding when the job does not set one.
pub const DEFAULT_QUALITY: u8 = 95;

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

pub const MIN_SEED: i64 = -1;
pub const MIN_STEPS: i64 = 1;
pub const MAX_STEPS: i64 = 100;
pub const MIN_CFG: f64 = 1.0;
pub const MAX_CFG: f64 = 20.0;
pub const MIN_QUALITY: i64 = 1;
pub const MAX_QUALITY: i64 = 100;

/// Image edge lengths the default workflow is tuned for.
pub const VALID_DIMENSIONS: &[u32] = &[512, 768, 1024, 1280, 1536];

// ---------------------------------------------------------------------------
// Enumerated fields
// ---------------------------------------------------------------------------

/// How produced images are returned to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnFormat {
    /// Re-encoded image bytes inlined as base64.
    #[default]
    Base64,
    /// A backend `/view` URL; no image bytes in the response.
    Url,
}

impl ReturnFormat {
    pub const ALL: &'static [&'static str] = &["base64", "url"];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "base64" => Some(Self::Base64),
            "url" => Some(Self::Url),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Base64 => "base64",
            Self::Url => "url",
        }
    }
}

/// Encoding applied to images before they are inlined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub const ALL: &'static [&'static str] = &["png", "jpeg", "webp"];

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpeg" | "jpg" => Some(Self::Jpeg),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Webp => "webp",
        }
    }
}

// ---------------------------------------------------------------------------
// Validated input
// ---------------------------------------------------------------------------

/// A job input after schema validation, with every default filled in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobInput {
    /// Caller-supplied workflow. `None` means the bundled default is used.
    pub workflow: Option<Value>,
    pub prompt: Option<String>,
    pub negative_prompt: String,
    pub seed: i64,
    pub steps: u32,
    pub cfg: f64,
    pub width: u32,
    pub height: u32,
    pub return_format: ReturnFormat,
    pub image_format: ImageFormat,
    pub quality: u8,
}

impl JobInput {
    /// The parameter overrides carried by this input.
    ///
    /// Defaults count as overrides: a validated input always pins the
    /// negative prompt, sampler settings, and latent size.
    pub fn overrides(&self) -> Overrides {
        Overrides {
            prompt: self.prompt.clone(),
            negative_prompt: Some(self.negative_prompt.clone()),
            seed: Some(self.seed),
            steps: Some(self.steps),
            cfg: Some(self.cfg),
            width: Some(self.width),
            height: Some(self.height),
        }
    }
}

/// Validate a raw job input object against the schema.
///
/// Fails with [`CoreError::MissingField`] when neither a non-empty
/// `workflow` nor a non-blank `prompt` is given; otherwise every
/// type or range violation is collected into [`CoreError::Validation`].
pub fn validate_input(raw: &Value) -> Result<JobInput, CoreError> {
    let obj = raw.as_object().ok_or_else(|| {
        let mut errors = FieldErrors::default();
        errors.push("input", "must be a JSON object");
        CoreError::Validation(errors)
    })?;

    let has_workflow = obj
        .get("workflow")
        .and_then(Value::as_object)
        .is_some_and(|wf| !wf.is_empty());
    let has_prompt = obj
        .get("prompt")
        .and_then(Value::as_str)
        .is_some_and(|p| !p.trim().is_empty());

    if !has_workflow && !has_prompt {
        return Err(CoreError::MissingField(
            "Either 'workflow' or 'prompt' must be provided".to_string(),
        ));
    }

    let mut errors = FieldErrors::default();

    let workflow = match field(obj, "workflow") {
        None => None,
        Some(Value::Object(wf)) if wf.is_empty() => None,
        Some(wf @ Value::Object(_)) => Some(wf.clone()),
        Some(_) => {
            errors.push("workflow", "must be a JSON object");
            None
        }
    };

    let prompt = match field(obj, "prompt") {
        None => None,
        Some(Value::String(p)) if p.trim().is_empty() => {
            errors.push("prompt", "must not be blank");
            None
        }
        Some(Value::String(p)) => Some(p.clone()),
        Some(_) => {
            errors.push("prompt", "must be a string");
            None
        }
    };

    let negative_prompt = match field(obj, "negative_prompt") {
        None => DEFAULT_NEGATIVE_PROMPT.to_string(),
        Some(Value::String(p)) => p.clone(),
        Some(_) => {
            errors.push("negative_prompt", "must be a string");
            DEFAULT_NEGATIVE_PROMPT.to_string()
        }
    };

    let seed = int_field(obj, "seed", &mut errors)
        .map(|seed| {
            if seed < MIN_SEED {
                errors.push("seed", format!("must be >= {MIN_SEED}, got {seed}"));
            }
            seed
        })
        .unwrap_or(DEFAULT_SEED);

    let steps = int_field(obj, "steps", &mut errors)
        .and_then(|steps| {
            if (MIN_STEPS..=MAX_STEPS).contains(&steps) {
                Some(steps as u32)
            } else {
                errors.push(
                    "steps",
                    format!("must be between {MIN_STEPS} and {MAX_STEPS}, got {steps}"),
                );
                None
            }
        })
        .unwrap_or(DEFAULT_STEPS);

    let cfg = match field(obj, "cfg") {
        None => DEFAULT_CFG,
        Some(v) => match v.as_f64() {
            Some(cfg) if (MIN_CFG..=MAX_CFG).contains(&cfg) => cfg,
            Some(cfg) => {
                errors.push(
                    "cfg",
                    format!("must be between {MIN_CFG:.1} and {MAX_CFG:.1}, got {cfg}"),
                );
                DEFAULT_CFG
            }
            None => {
                errors.push("cfg", "must be a number");
                DEFAULT_CFG
            }
        },
    };

    let width = dimension_field(obj, "width", &mut errors).unwrap_or(DEFAULT_WIDTH);
    let height = dimension_field(obj, "height", &mut errors).unwrap_or(DEFAULT_HEIGHT);

    let return_format = match field(obj, "return_format") {
        None => ReturnFormat::default(),
        Some(Value::String(s)) => ReturnFormat::parse(s).unwrap_or_else(|| {
            errors.push(
                "return_format",
                format!("must be one of {}, got '{s}'", ReturnFormat::ALL.join(", ")),
            );
            ReturnFormat::default()
        }),
        Some(_) => {
            errors.push("return_format", "must be a string");
            ReturnFormat::default()
        }
    };

    let image_format = match field(obj, "image_format") {
        None => ImageFormat::default(),
        Some(Value::String(s)) => ImageFormat::parse(s).unwrap_or_else(|| {
            errors.push(
                "image_format",
                format!("must be one of {}, got '{s}'", ImageFormat::ALL.join(", ")),
            );
            ImageFormat::default()
        }),
        Some(_) => {
            errors.push("image_format", "must be a string");
            ImageFormat::default()
        }
    };

    let quality = int_field(obj, "quality", &mut errors)
        .and_then(|q| {
            if (MIN_QUALITY..=MAX_QUALITY).contains(&q) {
                Some(q as u8)
            } else {
                errors.push(
                    "quality",
                    format!("must be between {MIN_QUALITY} and {MAX_QUALITY}, got {q}"),
                );
                None
            }
        })
        .unwrap_or(DEFAULT_QUALITY);

    if !errors.is_empty() {
        return Err(CoreError::Validation(errors));
    }

    let input = JobInput {
        workflow,
        prompt,
        negative_prompt,
        seed,
        steps,
        cfg,
        width,
        height,
        return_format,
        image_format,
        quality,
    };

    tracing::info!(
        has_workflow = input.workflow.is_some(),
        seed = input.seed,
        steps = input.steps,
        cfg = input.cfg,
        width = input.width,
        height = input.height,
        return_format = input.return_format.as_str(),
        "Input validation successful",
    );

    Ok(input)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Look up a field, treating an explicit `null` the same as an absent key.
fn field<'a>(obj: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    obj.get(name).filter(|v| !v.is_null())
}

/// Read an integer field. Records a type error and returns `None` for
/// non-integer values (floats included).
fn int_field(obj: &Map<String, Value>, name: &'static str, errors: &mut FieldErrors) -> Option<i64> {
    let value = field(obj, name)?;
    match value.as_i64() {
        Some(n) => Some(n),
        None => {
            errors.push(name, "must be an integer");
            None
        }
    }
}

fn dimension_field(
    obj: &Map<String, Value>,
    name: &'static str,
    errors: &mut FieldErrors,
) -> Option<u32> {
    let n = int_field(obj, name, errors)?;
    match u32::try_from(n) {
        Ok(dim) if VALID_DIMENSIONS.contains(&dim) => Some(dim),
        _ => {
            let allowed: Vec<String> = VALID_DIMENSIONS.iter().map(u32::to_string).collect();
            errors.push(
                name,
                format!("must be one of {}, got {n}", allowed.join(", ")),
            );
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
