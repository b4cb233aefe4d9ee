use crate::config::profile::RuntimeProfile;
use crate::domain::model::{ModelReport, OperatorEntry, TensorDetail};
use crate::domain::ports::Storage;
use crate::format::{parse_model, SubGraph, TfliteModel};
use crate::utils::error::{CompatError, Result};
use chrono::Utc;

pub(crate) fn tensor_details(subgraph: &SubGraph, indices: &[i32]) -> Result<Vec<TensorDetail>> {
    indices
        .iter()
        .map(|&idx| {
            let tensor = usize::try_from(idx)
                .ok()
                .and_then(|i| subgraph.tensors.get(i))
                .ok_or_else(|| CompatError::malformed(format!("graph i/o tensor {} does not exist", idx)))?;
            let quant = tensor.quantization.as_ref().filter(|q| !q.is_empty());
            Ok(TensorDetail {
                name: tensor.name.clone(),
                index: idx as usize,
                shape: tensor.shape.clone(),
                shape_signature: tensor.shape_signature.clone(),
                dtype: tensor.dtype.to_string(),
                scale: quant.and_then(|q| q.scale.first().copied()),
                zero_point: quant.and_then(|q| q.zero_point.first().copied()),
            })
        })
        .collect()
}

/// Checks an already decoded model against `profile`.
pub fn inspect_model(source: &str, model: &TfliteModel, profile: &RuntimeProfile) -> Result<ModelReport> {
    let primary = model
        .primary_subgraph()
        .ok_or_else(|| CompatError::malformed("model has no subgraphs"))?;

    // 主子圖的節點依執行順序，其餘子圖依索引排列
    let mut operators = Vec::new();
    for (sg_idx, subgraph) in model.subgraphs.iter().enumerate() {
        for (op_idx, op) in subgraph.operators.iter().enumerate() {
            let code = model
                .operator_codes
                .get(op.opcode_index as usize)
                .ok_or_else(|| {
                    CompatError::malformed(format!(
                        "operator {} in subgraph {} uses unknown opcode {}",
                        op_idx, sg_idx, op.opcode_index
                    ))
                })?;
            let op_name = code.op_name();
            let verdict = profile.verdict_for(&op_name, code.version);
            operators.push(OperatorEntry {
                subgraph: sg_idx,
                index: op_idx,
                op_name,
                version: code.version,
                verdict,
            });
        }
    }

    let min_runtime_version = model.min_runtime_version();
    let runtime_version_ok = min_runtime_version
        .as_deref()
        .and_then(|v| profile.accepts_runtime_version(v));

    Ok(ModelReport {
        source: source.to_string(),
        profile: profile.name.clone(),
        schema_version: model.version,
        description: model.description.clone(),
        min_runtime_version,
        runtime_version_ok,
        inputs: tensor_details(primary, &primary.inputs)?,
        outputs: tensor_details(primary, &primary.outputs)?,
        operators,
        generated_at: Utc::now(),
    })
}

pub fn inspect_bytes(source: &str, bytes: &[u8], profile: &RuntimeProfile) -> Result<ModelReport> {
    let model = parse_model(bytes)?;
    inspect_model(source, &model, profile)
}

pub async fn inspect_artifact<S: Storage>(
    storage: &S,
    path: &str,
    profile: &RuntimeProfile,
) -> Result<ModelReport> {
    tracing::debug!("Reading model artifact {}", path);
    let bytes = storage.read_file(path).await?;
    tracing::debug!("Read {} bytes from {}", bytes.len(), path);
    inspect_bytes(path, &bytes, profile)
}

/// Like [`inspect_artifact`], but a failure ends the check for this artifact
/// with a printed diagnostic instead of an error.
pub async fn check_artifact<S: Storage>(
    storage: &S,
    path: &str,
    profile: &RuntimeProfile,
) -> Option<ModelReport> {
    match inspect_artifact(storage, path, profile).await {
        Ok(report) => {
            tracing::info!(
                "✅ {} analyzed: {} operators, compatible = {}",
                path,
                report.operators.len(),
                report.is_compatible()
            );
            Some(report)
        }
        Err(e) => {
            println!("{}", analysis_failure(path, &e));
            None
        }
    }
}

/// Logs a failed artifact and returns the one-line diagnostic for it.
pub fn analysis_failure(path: &str, e: &CompatError) -> String {
    tracing::warn!(
        "❌ Error analyzing {}: {} (Category: {:?})",
        path,
        e,
        e.category()
    );
    format!("❌ Error analyzing {}: {}", path, e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Verdict;
    use crate::format::{
        encode_model, BuiltinOperator, BuiltinOptions, Operator, OperatorCode, Tensor, TensorType,
    };

    fn tensor(name: &str, shape: Vec<i32>) -> Tensor {
        Tensor {
            name: name.to_string(),
            shape,
            shape_signature: None,
            dtype: TensorType::Float32,
            buffer: 0,
            quantization: None,
        }
    }

    fn two_subgraph_model(fc_version: u32) -> TfliteModel {
        let main = SubGraph {
            name: Some("main".to_string()),
            tensors: vec![tensor("x", vec![1, 4]), tensor("w", vec![2, 4]), tensor("y", vec![1, 2])],
            inputs: vec![0],
            outputs: vec![2],
            operators: vec![
                Operator {
                    opcode_index: 0,
                    inputs: vec![0, 1, -1],
                    outputs: vec![2],
                    options: BuiltinOptions::None,
                },
                Operator {
                    opcode_index: 1,
                    inputs: vec![2],
                    outputs: vec![2],
                    options: BuiltinOptions::Softmax { beta: 1.0 },
                },
            ],
        };
        let branch = SubGraph {
            name: Some("branch".to_string()),
            tensors: vec![tensor("a", vec![1]), tensor("b", vec![1])],
            inputs: vec![0],
            outputs: vec![1],
            operators: vec![Operator {
                opcode_index: 2,
                inputs: vec![0],
                outputs: vec![1],
                options: BuiltinOptions::None,
            }],
        };
        TfliteModel {
            version: 3,
            description: Some("fixture".to_string()),
            operator_codes: vec![
                OperatorCode::builtin(BuiltinOperator::FullyConnected, fc_version),
                OperatorCode::builtin(BuiltinOperator::Softmax, 1),
                OperatorCode::builtin(BuiltinOperator::Relu, 2),
            ],
            subgraphs: vec![main, branch],
            buffers: vec![Vec::new()],
            metadata: Vec::new(),
        }
    }

    #[test]
    fn test_operators_follow_loader_order() {
        let bytes = encode_model(&two_subgraph_model(12));
        let report = inspect_bytes("fixture.tflite", &bytes, &RuntimeProfile::default()).unwrap();

        let order: Vec<(usize, usize, &str)> = report
            .operators
            .iter()
            .map(|op| (op.subgraph, op.index, op.op_name.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![(0, 0, "FULLY_CONNECTED"), (0, 1, "SOFTMAX"), (1, 0, "RELU")]
        );
        assert_eq!(
            report.operators[0].verdict,
            Verdict::Incompatible { max_supported: 11 }
        );
        assert!(!report.is_compatible());
        assert_eq!(report.primary_input_shape(), Some(&[1, 4][..]));
        assert_eq!(report.primary_output_shape(), Some(&[1, 2][..]));
        assert_eq!(report.inputs[0].dtype, "float32");
    }

    #[test]
    fn test_compatible_model() {
        let bytes = encode_model(&two_subgraph_model(11));
        let report = inspect_bytes("fixture.tflite", &bytes, &RuntimeProfile::default()).unwrap();
        assert!(report.is_compatible());
        assert_eq!(report.max_version_of("FULLY_CONNECTED"), Some(11));
        assert!(report.min_runtime_version.is_none());
        assert!(report.runtime_version_ok.is_none());
    }

    #[test]
    fn test_model_without_subgraphs_is_malformed() {
        let mut model = two_subgraph_model(1);
        model.subgraphs.clear();
        let err = inspect_model("empty", &model, &RuntimeProfile::default()).unwrap_err();
        assert!(matches!(err, CompatError::MalformedModel { .. }));
    }

    #[test]
    fn test_garbage_bytes_are_rejected() {
        let result = inspect_bytes("junk", b"definitely not a flatbuffer", &RuntimeProfile::default());
        assert!(result.is_err());
    }
}
