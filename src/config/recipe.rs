use crate::utils::error::{CompatError, Result};
use crate::utils::validation::{
    validate_file_extensions, validate_non_empty_string, validate_path,
    validate_positive_number, validate_range, validate_shape, Validate,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// TOML description of a model for the graph builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecipe {
    pub model: ModelSection,
    pub input: InputSection,
    #[serde(default)]
    pub convert: ConvertSection,
    pub layers: Vec<LayerSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSection {
    pub name: String,
    pub description: Option<String>,
    pub output_path: String,
    /// Seed for weights that the recipe does not spell out.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSection {
    #[serde(default = "default_input_name")]
    pub name: String,
    pub shape: Vec<i32>,
}

fn default_input_name() -> String {
    "input".to_string()
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConvertSection {
    /// Store dense kernels as int8 (dynamic range quantization).
    #[serde(default)]
    pub quantize_weights: bool,
    /// Runtime profile the result is checked against after saving.
    pub profile: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Relu6,
    Softmax,
    Sigmoid,
    Tanh,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    /// Mean over the time axis of a `[batch, steps, channels]` tensor.
    #[serde(rename = "global_average_pooling_1d")]
    GlobalAveragePooling1d { name: Option<String> },
    ReduceMean {
        axis: i32,
        #[serde(default)]
        keep_dims: bool,
        name: Option<String>,
    },
    Reshape {
        shape: Vec<i32>,
        name: Option<String>,
    },
    Dense {
        units: usize,
        #[serde(default)]
        activation: Activation,
        name: Option<String>,
        /// `[in_features][units]`, as a Keras kernel is laid out.
        kernel: Option<Vec<Vec<f32>>>,
        bias: Option<Vec<f32>>,
    },
    /// `x @ weights` with a constant right-hand side.
    Matmul {
        weights: Vec<Vec<f32>>,
        name: Option<String>,
    },
    /// Dropped at conversion, like every inference-time export does.
    Dropout { rate: f32 },
    Softmax {
        #[serde(default = "default_beta")]
        beta: f32,
    },
    Relu,
}

fn default_beta() -> f32 {
    1.0
}

impl LayerSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            LayerSpec::GlobalAveragePooling1d { .. } => "global_average_pooling_1d",
            LayerSpec::ReduceMean { .. } => "reduce_mean",
            LayerSpec::Reshape { .. } => "reshape",
            LayerSpec::Dense { .. } => "dense",
            LayerSpec::Matmul { .. } => "matmul",
            LayerSpec::Dropout { .. } => "dropout",
            LayerSpec::Softmax { .. } => "softmax",
            LayerSpec::Relu => "relu",
        }
    }
}

/// Written by `convert_model_compatible` when an existing model cannot be
/// downgraded; `create_compatible_model` reads it back.
pub const RECIPE_TEMPLATE: &str = r#"# Model recipe for create_compatible_model
#
# Describe the architecture of your original model below, then run:
#   cargo run --bin create_compatible_model -- --recipe model_recipe.toml
#
# Dense kernels are laid out [in_features][units] like a Keras kernel.
# Leave `kernel`/`bias` out to get seeded random weights for a smoke test.

[model]
name = "audio_classifier"
description = "Rebuilt for TFLite Flutter 0.11.0"
output_path = "assets/models/best_model_compatible.tflite"
seed = 42

[input]
name = "audio_input"
shape = [1, 32000, 1]

[convert]
# Equivalent of optimizations = [DEFAULT]: int8 weights, float activations.
quantize_weights = true

[[layers]]
type = "global_average_pooling_1d"

[[layers]]
type = "dense"
units = 64
activation = "relu"

[[layers]]
type = "dense"
units = 3
activation = "softmax"
name = "predictions"
"#;

impl ModelRecipe {
    /// 從 TOML 檔案載入模型配方
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析模型配方
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = super::substitute_env_vars(content);
        toml::from_str(&processed).map_err(|e| CompatError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    pub fn template() -> Self {
        // 模板是固定字串，解析失敗代表程式本身有錯
        match Self::from_toml_str(RECIPE_TEMPLATE) {
            Ok(recipe) => recipe,
            Err(e) => unreachable!("recipe template does not parse: {}", e),
        }
    }

    pub fn seed(&self) -> u64 {
        self.model.seed.unwrap_or(42)
    }
}

impl Validate for ModelRecipe {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("model.name", &self.model.name)?;
        validate_path("model.output_path", &self.model.output_path)?;
        validate_file_extensions(
            "model.output_path",
            std::slice::from_ref(&self.model.output_path),
            &["tflite"],
        )?;
        validate_non_empty_string("input.name", &self.input.name)?;
        validate_shape("input.shape", &self.input.shape)?;

        if self.layers.is_empty() {
            return Err(CompatError::MissingConfigError {
                field: "layers".to_string(),
            });
        }

        for (idx, layer) in self.layers.iter().enumerate() {
            let field = |name: &str| format!("layers[{}].{}", idx, name);
            match layer {
                LayerSpec::Dense {
                    units, kernel, bias, ..
                } => {
                    validate_positive_number(&field("units"), *units, 1)?;
                    if let Some(rows) = kernel {
                        if let Some(row) = rows.iter().find(|r| r.len() != *units) {
                            return Err(CompatError::InvalidConfigValueError {
                                field: field("kernel"),
                                value: format!("row of length {}", row.len()),
                                reason: format!("Every kernel row must have {} values", units),
                            });
                        }
                    }
                    if let Some(b) = bias {
                        if b.len() != *units {
                            return Err(CompatError::InvalidConfigValueError {
                                field: field("bias"),
                                value: b.len().to_string(),
                                reason: format!("Bias must have {} values", units),
                            });
                        }
                    }
                }
                LayerSpec::Matmul { weights, .. } => {
                    let cols = weights.first().map(Vec::len).unwrap_or(0);
                    if cols == 0 || weights.iter().any(|r| r.len() != cols) {
                        return Err(CompatError::InvalidConfigValueError {
                            field: field("weights"),
                            value: format!("{} rows", weights.len()),
                            reason: "Weights must be a non-empty rectangular matrix".to_string(),
                        });
                    }
                }
                LayerSpec::Dropout { rate } => {
                    validate_range(&field("rate"), *rate, 0.0, 0.99)?;
                }
                LayerSpec::Reshape { shape, .. } => {
                    validate_shape(&field("shape"), shape)?;
                }
                LayerSpec::Softmax { beta } => {
                    if !beta.is_finite() || *beta <= 0.0 {
                        return Err(CompatError::InvalidConfigValueError {
                            field: field("beta"),
                            value: beta.to_string(),
                            reason: "Beta must be a positive number".to_string(),
                        });
                    }
                }
                LayerSpec::GlobalAveragePooling1d { .. }
                | LayerSpec::ReduceMean { .. }
                | LayerSpec::Relu => {}
            }
        }

        if let Some(profile) = &self.convert.profile {
            validate_path("convert.profile", profile)?;
        }
        Ok(())
    }
}
