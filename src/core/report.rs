use crate::config::profile::RuntimeProfile;
use crate::domain::model::{FailedModel, ModelReport, TensorDetail, Verdict};
use crate::format::{TensorType, TfliteModel};
use crate::utils::error::{CompatError, Result};
use serde::{Deserialize, Serialize};

pub const SEPARATOR_WIDTH: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
    Csv,
}

pub fn separator() -> String {
    "=".repeat(SEPARATOR_WIDTH)
}

/// Profile banner printed before any model is analyzed.
pub fn profile_header(profile: &RuntimeProfile) -> String {
    let mut out = String::new();
    match &profile.runtime_version {
        Some(v) => out.push_str(&format!("Target runtime: {} (TFLite {})\n", profile.name, v)),
        None => out.push_str(&format!("Target runtime: {}\n", profile.name)),
    }
    if !profile.notes.is_empty() {
        out.push_str("TensorFlow Lite version compatibility:\n");
        for note in &profile.notes {
            out.push_str(&format!("- {}\n", note));
        }
    }
    out
}

fn tensor_line(label: &str, tensor: &TensorDetail) -> String {
    format!(
        "{} '{}': shape {:?}, type {}\n",
        label, tensor.name, tensor.shape, tensor.dtype
    )
}

/// Per-model text report in the style the CLI prints. The caller prints the
/// "Analyzing ..." line so a failed load still gets one.
pub fn render_text(report: &ModelReport) -> String {
    let mut out = String::new();

    if let Some(shape) = report.primary_input_shape() {
        out.push_str(&format!("Input shape: {:?}\n", shape));
    }
    if let Some(shape) = report.primary_output_shape() {
        out.push_str(&format!("Output shape: {:?}\n", shape));
    }
    for tensor in &report.inputs {
        out.push_str(&tensor_line("  input", tensor));
    }
    for tensor in &report.outputs {
        out.push_str(&tensor_line("  output", tensor));
    }

    out.push_str(&format!("Schema version: {}\n", report.schema_version));
    if let Some(desc) = &report.description {
        out.push_str(&format!("Description: {}\n", desc));
    }
    if let Some(min) = &report.min_runtime_version {
        out.push_str(&format!("Min runtime version: {}\n", min));
        if report.runtime_version_ok == Some(false) {
            out.push_str(&format!(
                "  ❌ Requires a newer runtime than {}\n",
                report.profile
            ));
        }
    }

    out.push_str("Operations used:\n");
    for op in &report.operators {
        out.push_str(&format!("  - {} (version {})\n", op.op_name, op.version));
        match op.verdict {
            Verdict::Incompatible { max_supported } => out.push_str(&format!(
                "    ❌ INCOMPATIBLE: This version is not supported by {} (max version {})\n",
                report.profile, max_supported
            )),
            Verdict::Compatible { .. } => out.push_str(&format!(
                "    ✅ COMPATIBLE: Version {} should work\n",
                op.version
            )),
            Verdict::Unchecked => {}
        }
    }

    if report.is_compatible() {
        out.push_str(&format!("✅ Loadable by {}\n", report.profile));
    } else {
        out.push_str(&format!("❌ Not loadable by {}\n", report.profile));
    }
    out
}

/// Closing block after all models were checked.
pub fn render_summary(profile: &RuntimeProfile, reports: &[ModelReport], failed: &[String]) -> String {
    let mut out = String::from("SUMMARY:\n");
    out.push_str(&format!("{} supports:\n", profile.name));
    for (op, max) in &profile.max_versions {
        out.push_str(&format!("- {} versions up to v{}\n", op, max));
    }
    if let Some(v) = &profile.runtime_version {
        out.push_str(&format!("- Most other operations up to TF {} level\n", v));
    }

    for report in reports {
        if report.is_compatible() {
            out.push_str(&format!("✅ {} should be compatible\n", report.source));
        } else {
            let offenders: Vec<String> = report
                .incompatible_operators()
                .iter()
                .map(|op| format!("{} v{}", op.op_name, op.version))
                .collect();
            if offenders.is_empty() {
                out.push_str(&format!("❌ {} needs a newer runtime\n", report.source));
            } else {
                out.push_str(&format!(
                    "❌ {} uses {}\n",
                    report.source,
                    offenders.join(", ")
                ));
            }
        }
    }
    for path in failed {
        out.push_str(&format!("⚠️ {} could not be analyzed\n", path));
    }
    out
}

/// Layer table of a freshly built graph, one line per operator.
pub fn render_graph_summary(model: &TfliteModel) -> String {
    let mut out = String::from("Model summary:\n");
    out.push_str(&format!(
        "{:<4}{:<18}{:<28}{:<16}{:>8}\n",
        "#", "Operator", "Output", "Shape", "Params"
    ));
    let mut total = 0usize;
    for sg in &model.subgraphs {
        for (idx, op) in sg.operators.iter().enumerate() {
            let op_name = model
                .operator_codes
                .get(op.opcode_index as usize)
                .map(|c| c.op_name())
                .unwrap_or_default();
            let output = op
                .outputs
                .first()
                .and_then(|&i| usize::try_from(i).ok())
                .and_then(|i| sg.tensors.get(i));
            // 有資料的 buffer 才算權重
            let params: usize = op
                .inputs
                .iter()
                .filter_map(|&i| usize::try_from(i).ok())
                .filter_map(|i| sg.tensors.get(i))
                .filter(|t| {
                    model
                        .buffers
                        .get(t.buffer as usize)
                        .is_some_and(|b| !b.is_empty())
                })
                .filter(|t| t.dtype != TensorType::Int32)
                .map(|t| t.shape.iter().map(|&d| d.max(0) as usize).product::<usize>())
                .sum();
            total += params;
            out.push_str(&format!(
                "{:<4}{:<18}{:<28}{:<16}{:>8}\n",
                idx,
                op_name,
                output.map(|t| t.name.as_str()).unwrap_or("-"),
                output.map(|t| format!("{:?}", t.shape)).unwrap_or_default(),
                params
            ));
        }
    }
    out.push_str(&format!("Total params: {}\n", total));
    out
}

#[derive(Debug, Serialize)]
struct BatchReport<'a> {
    reports: &'a [ModelReport],
    failed: &'a [FailedModel],
}

/// `{"reports": [...], "failed": [{"source", "error"}]}`
pub fn render_json(reports: &[ModelReport], failed: &[FailedModel]) -> Result<String> {
    Ok(serde_json::to_string_pretty(&BatchReport { reports, failed })?)
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    source: &'a str,
    subgraph: Option<usize>,
    index: Option<usize>,
    op_name: &'a str,
    version: Option<u32>,
    status: &'static str,
    max_supported: Option<u32>,
    error: Option<&'a str>,
}

/// One row per operator across all reports, then one `error` row per
/// artifact that could not be analyzed.
pub fn render_csv(reports: &[ModelReport], failed: &[FailedModel]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for report in reports {
        for op in &report.operators {
            let (status, max_supported) = match op.verdict {
                Verdict::Compatible { max_supported } => ("compatible", Some(max_supported)),
                Verdict::Incompatible { max_supported } => ("incompatible", Some(max_supported)),
                Verdict::Unchecked => ("unchecked", None),
            };
            writer.serialize(CsvRow {
                source: &report.source,
                subgraph: Some(op.subgraph),
                index: Some(op.index),
                op_name: &op.op_name,
                version: Some(op.version),
                status,
                max_supported,
                error: None,
            })?;
        }
    }
    for failure in failed {
        writer.serialize(CsvRow {
            source: &failure.source,
            subgraph: None,
            index: None,
            op_name: "",
            version: None,
            status: "error",
            max_supported: None,
            error: Some(failure.error.as_str()),
        })?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| CompatError::IoError(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Machine formats render all reports at once; text is printed per model.
pub fn render_batch(reports: &[ModelReport], failed: &[FailedModel], format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Text => {
            let mut out: String = reports
                .iter()
                .map(|r| format!("\nAnalyzing {}...\n{}", r.source, render_text(r)))
                .collect();
            for failure in failed {
                out.push_str(&format!(
                    "\nAnalyzing {}...\n❌ Error analyzing {}: {}\n",
                    failure.source, failure.source, failure.error
                ));
            }
            Ok(out)
        }
        ReportFormat::Json => render_json(reports, failed),
        ReportFormat::Csv => render_csv(reports, failed),
    }
}
