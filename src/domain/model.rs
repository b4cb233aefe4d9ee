use crate::format::TfliteModel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Compatibility of one operator entry against a runtime profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verdict {
    Compatible { max_supported: u32 },
    Incompatible { max_supported: u32 },
    /// The profile has no limit for this operator.
    Unchecked,
}

impl Verdict {
    pub fn is_incompatible(&self) -> bool {
        matches!(self, Verdict::Incompatible { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorDetail {
    pub name: String,
    pub index: usize,
    pub shape: Vec<i32>,
    pub shape_signature: Option<Vec<i32>>,
    pub dtype: String,
    pub scale: Option<f32>,
    pub zero_point: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorEntry {
    pub subgraph: usize,
    pub index: usize,
    pub op_name: String,
    pub version: u32,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelReport {
    pub source: String,
    pub profile: String,
    pub schema_version: u32,
    pub description: Option<String>,
    pub min_runtime_version: Option<String>,
    /// `Some(false)` when the model needs a newer runtime than the profile's.
    pub runtime_version_ok: Option<bool>,
    pub inputs: Vec<TensorDetail>,
    pub outputs: Vec<TensorDetail>,
    pub operators: Vec<OperatorEntry>,
    pub generated_at: DateTime<Utc>,
}

impl ModelReport {
    pub fn incompatible_operators(&self) -> Vec<&OperatorEntry> {
        self.operators
            .iter()
            .filter(|op| op.verdict.is_incompatible())
            .collect()
    }

    pub fn is_compatible(&self) -> bool {
        self.incompatible_operators().is_empty() && self.runtime_version_ok != Some(false)
    }

    /// Highest version of `op_name` across all subgraphs.
    pub fn max_version_of(&self, op_name: &str) -> Option<u32> {
        self.operators
            .iter()
            .filter(|op| op.op_name == op_name)
            .map(|op| op.version)
            .max()
    }

    pub fn primary_input_shape(&self) -> Option<&[i32]> {
        self.inputs.first().map(|t| t.shape.as_slice())
    }

    pub fn primary_output_shape(&self) -> Option<&[i32]> {
        self.outputs.first().map(|t| t.shape.as_slice())
    }
}

/// An artifact that could not be analyzed, kept so batch reports list it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedModel {
    pub source: String,
    pub error: String,
}

impl FailedModel {
    pub fn new(source: impl Into<String>, error: impl ToString) -> Self {
        Self {
            source: source.into(),
            error: error.to_string(),
        }
    }
}

/// A model ready to be written: the graph plus its serialized bytes.
#[derive(Debug, Clone)]
pub struct ConvertedModel {
    pub name: String,
    pub output_path: String,
    pub model: TfliteModel,
    pub bytes: Vec<u8>,
}

/// What an export run produced.
#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub output_path: String,
    pub size_bytes: usize,
    pub report: ModelReport,
}
