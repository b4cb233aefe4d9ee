//! Turns a [`ModelRecipe`] into a TFLite graph.
//!
//! Every layer lowers to the same builtin operators a TF 2.8-era converter
//! emits for it, always at the lowest operator version that expresses the
//! layer. Weights not given in the recipe come from a seeded RNG so two runs
//! of the same recipe produce byte-identical files.

use crate::config::profile::parse_version;
use crate::config::recipe::{Activation, LayerSpec, ModelRecipe};
use crate::format::schema::{MIN_RUNTIME_VERSION_KEY, TFLITE_SCHEMA_VERSION};
use crate::format::{
    ActivationFunction, BuiltinOperator, BuiltinOptions, Metadata, Operator, OperatorCode,
    Quantization, SubGraph, Tensor, TensorType, TfliteModel,
};
use crate::utils::error::{CompatError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Version of FULLY_CONNECTED with float activations and int8 weights.
const HYBRID_FULLY_CONNECTED_VERSION: u32 = 3;

/// Runtime release that introduced `op` at `version`.
fn min_runtime_for(op: BuiltinOperator, version: u32) -> &'static str {
    match (op, version) {
        (BuiltinOperator::FullyConnected, 1) => "1.5.0",
        (BuiltinOperator::FullyConnected, 2) => "1.10.0",
        (BuiltinOperator::FullyConnected, _) => "1.14.0",
        (BuiltinOperator::Mean, _) => "1.6.0",
        (BuiltinOperator::Tanh, _) => "1.14.0",
        _ => "1.5.0",
    }
}

/// Symmetric per-tensor int8 quantization: returns the values and the scale
/// that maps them back to floats.
pub fn quantize_symmetric(values: &[f32]) -> (Vec<i8>, f32) {
    let max = values.iter().fold(0.0_f32, |m, &v| m.max(v.abs()));
    let scale = if max == 0.0 { 1.0 } else { 127.0 / max };
    let data = values.iter().map(|&v| (v * scale).round() as i8).collect();
    (data, 1.0 / scale)
}

/// Tensor flowing out of the last lowered layer.
#[derive(Debug, Clone)]
struct Cursor {
    tensor: i32,
    shape: Vec<i32>,
}

pub struct GraphBuilder {
    rng: StdRng,
    quantize_weights: bool,
    tensors: Vec<Tensor>,
    buffers: Vec<Vec<u8>>,
    operator_codes: Vec<OperatorCode>,
    operators: Vec<Operator>,
    used_ops: Vec<(BuiltinOperator, u32)>,
}

impl GraphBuilder {
    pub fn new(seed: u64, quantize_weights: bool) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            quantize_weights,
            tensors: Vec::new(),
            // buffer 0 is the empty sentinel every activation tensor points to
            buffers: vec![Vec::new()],
            operator_codes: Vec::new(),
            operators: Vec::new(),
            used_ops: Vec::new(),
        }
    }

    /// Builds the whole recipe.
    pub fn build(recipe: &ModelRecipe) -> Result<TfliteModel> {
        let mut builder = Self::new(recipe.seed(), recipe.convert.quantize_weights);
        let input = builder.add_activation(&recipe.input.name, recipe.input.shape.clone());
        let mut cursor = Cursor {
            tensor: input,
            shape: recipe.input.shape.clone(),
        };

        for (idx, layer) in recipe.layers.iter().enumerate() {
            tracing::debug!("Lowering layer {} ({})", idx, layer.kind());
            cursor = builder.lower(idx, layer, cursor)?;
        }

        if builder.operators.is_empty() {
            return Err(CompatError::GraphError {
                layer: recipe.layers.len().saturating_sub(1),
                message: "recipe lowers to an empty graph".to_string(),
            });
        }

        let description = recipe
            .model
            .description
            .clone()
            .unwrap_or_else(|| format!("{} (tflite-compat)", recipe.model.name));
        Ok(builder.finish(input, cursor.tensor, description))
    }

    fn lower(&mut self, idx: usize, layer: &LayerSpec, cur: Cursor) -> Result<Cursor> {
        let default_name = format!("{}_{}", layer.kind(), idx);
        let name_or = |name: &Option<String>| name.clone().unwrap_or_else(|| default_name.clone());

        match layer {
            LayerSpec::GlobalAveragePooling1d { name } => {
                if cur.shape.len() != 3 {
                    return Err(graph_error(
                        idx,
                        format!(
                            "global_average_pooling_1d needs a [batch, steps, channels] input, got {:?}",
                            cur.shape
                        ),
                    ));
                }
                self.lower_mean(idx, &name_or(name), cur, 1, false)
            }
            LayerSpec::ReduceMean {
                axis,
                keep_dims,
                name,
            } => self.lower_mean(idx, &name_or(name), cur, *axis, *keep_dims),
            LayerSpec::Reshape { shape, name } => {
                let from: i64 = cur.shape.iter().map(|&d| d as i64).product();
                let to: i64 = shape.iter().map(|&d| d as i64).product();
                if from != to {
                    return Err(graph_error(
                        idx,
                        format!("cannot reshape {:?} ({} values) to {:?}", cur.shape, from, shape),
                    ));
                }
                let name = name_or(name);
                let shape_const = self.add_int32_constant(&format!("{}/shape", name), shape);
                let out = self.add_activation(&name, shape.clone());
                self.add_operator(
                    BuiltinOperator::Reshape,
                    1,
                    vec![cur.tensor, shape_const],
                    out,
                    BuiltinOptions::Reshape {
                        new_shape: shape.clone(),
                    },
                );
                Ok(Cursor {
                    tensor: out,
                    shape: shape.clone(),
                })
            }
            LayerSpec::Dense {
                units,
                activation,
                name,
                kernel,
                bias,
            } => {
                let in_features = self.features_of(idx, &cur)?;
                let units = *units;
                let kernel = match kernel {
                    Some(rows) => {
                        if rows.len() != in_features {
                            return Err(graph_error(
                                idx,
                                format!(
                                    "kernel has {} rows but the input has {} features",
                                    rows.len(),
                                    in_features
                                ),
                            ));
                        }
                        rows.clone()
                    }
                    None => self.glorot_uniform(in_features, units),
                };
                let bias = bias.clone().unwrap_or_else(|| vec![0.0; units]);
                let name = name_or(name);

                let fused = match activation {
                    Activation::Relu => ActivationFunction::Relu,
                    Activation::Relu6 => ActivationFunction::Relu6,
                    _ => ActivationFunction::None,
                };
                let fc_out = self.lower_fully_connected(
                    idx,
                    &name,
                    &cur,
                    &kernel,
                    Some(bias.as_slice()),
                    fused,
                )?;

                // softmax/sigmoid/tanh 不能融合進 FULLY_CONNECTED
                let (op, options) = match activation {
                    Activation::Softmax => (BuiltinOperator::Softmax, BuiltinOptions::Softmax { beta: 1.0 }),
                    Activation::Sigmoid => (BuiltinOperator::Logistic, BuiltinOptions::None),
                    Activation::Tanh => (BuiltinOperator::Tanh, BuiltinOptions::None),
                    Activation::Linear | Activation::Relu | Activation::Relu6 => return Ok(fc_out),
                };
                let act_name = format!("{}/{}", name, op.name().to_lowercase());
                Ok(self.lower_unary(&act_name, op, fc_out, options))
            }
            LayerSpec::Matmul { weights, name } => {
                let in_features = self.features_of(idx, &cur)?;
                if weights.len() != in_features {
                    return Err(graph_error(
                        idx,
                        format!(
                            "matmul weights have {} rows but the input has {} features",
                            weights.len(),
                            in_features
                        ),
                    ));
                }
                self.lower_fully_connected(
                    idx,
                    &name_or(name),
                    &cur,
                    weights,
                    None,
                    ActivationFunction::None,
                )
            }
            LayerSpec::Dropout { rate } => {
                tracing::debug!("Dropping dropout layer {} (rate {}) for inference", idx, rate);
                Ok(cur)
            }
            LayerSpec::Softmax { beta } => Ok(self.lower_unary(
                &default_name,
                BuiltinOperator::Softmax,
                cur,
                BuiltinOptions::Softmax { beta: *beta },
            )),
            LayerSpec::Relu => Ok(self.lower_unary(
                &default_name,
                BuiltinOperator::Relu,
                cur,
                BuiltinOptions::None,
            )),
        }
    }

    fn features_of(&self, idx: usize, cur: &Cursor) -> Result<usize> {
        match cur.shape.as_slice() {
            [_, features] => Ok(*features as usize),
            other => Err(graph_error(
                idx,
                format!(
                    "dense layers need a [batch, features] input, got {:?}; add a reshape or pooling layer first",
                    other
                ),
            )),
        }
    }

    fn lower_mean(&mut self, idx: usize, name: &str, cur: Cursor, axis: i32, keep_dims: bool) -> Result<Cursor> {
        let rank = cur.shape.len() as i32;
        let axis = if axis < 0 { axis + rank } else { axis };
        if axis < 0 || axis >= rank {
            return Err(graph_error(
                idx,
                format!("axis out of range for shape {:?}", cur.shape),
            ));
        }

        let mut shape = cur.shape.clone();
        if keep_dims {
            shape[axis as usize] = 1;
        } else {
            shape.remove(axis as usize);
        }

        let axis_const = self.add_int32_constant(&format!("{}/axis", name), &[axis]);
        let out = self.add_activation(name, shape.clone());
        self.add_operator(
            BuiltinOperator::Mean,
            1,
            vec![cur.tensor, axis_const],
            out,
            BuiltinOptions::Reducer { keep_dims },
        );
        Ok(Cursor { tensor: out, shape })
    }

    /// `kernel` is `[in][units]`; TFLite stores the transpose.
    fn lower_fully_connected(
        &mut self,
        idx: usize,
        name: &str,
        cur: &Cursor,
        kernel: &[Vec<f32>],
        bias: Option<&[f32]>,
        fused: ActivationFunction,
    ) -> Result<Cursor> {
        let in_features = kernel.len();
        let units = kernel.first().map(Vec::len).unwrap_or(0);
        if units == 0 || kernel.iter().any(|row| row.len() != units) {
            return Err(graph_error(idx, "weight matrix must be non-empty and rectangular".to_string()));
        }
        if let Some(b) = bias {
            if b.len() != units {
                return Err(graph_error(
                    idx,
                    format!("bias has {} values for {} units", b.len(), units),
                ));
            }
        }
        let mut transposed = Vec::with_capacity(in_features * units);
        for u in 0..units {
            for row in kernel {
                transposed.push(row[u]);
            }
        }

        let weight_shape = vec![units as i32, in_features as i32];
        let (weights, version) = if self.quantize_weights {
            let (q, scale) = quantize_symmetric(&transposed);
            let tensor = self.add_constant(
                &format!("{}/kernel", name),
                weight_shape,
                TensorType::Int8,
                bytemuck::cast_slice(&q).to_vec(),
                Some(Quantization {
                    scale: vec![scale],
                    zero_point: vec![0],
                }),
            );
            (tensor, HYBRID_FULLY_CONNECTED_VERSION)
        } else {
            let tensor = self.add_float_constant(&format!("{}/kernel", name), weight_shape, &transposed);
            (tensor, 1)
        };

        let bias = match bias {
            Some(b) => self.add_float_constant(&format!("{}/bias", name), vec![units as i32], b),
            None => -1,
        };

        let batch = cur.shape.first().copied().unwrap_or(1);
        let out_shape = vec![batch, units as i32];
        let out = self.add_activation(name, out_shape.clone());
        self.add_operator(
            BuiltinOperator::FullyConnected,
            version,
            vec![cur.tensor, weights, bias],
            out,
            BuiltinOptions::FullyConnected {
                fused_activation: fused,
                keep_num_dims: false,
                asymmetric_quantize_inputs: false,
            },
        );
        Ok(Cursor {
            tensor: out,
            shape: out_shape,
        })
    }

    fn lower_unary(&mut self, name: &str, op: BuiltinOperator, cur: Cursor, options: BuiltinOptions) -> Cursor {
        let out = self.add_activation(name, cur.shape.clone());
        self.add_operator(op, 1, vec![cur.tensor], out, options);
        Cursor {
            tensor: out,
            shape: cur.shape,
        }
    }

    fn glorot_uniform(&mut self, fan_in: usize, fan_out: usize) -> Vec<Vec<f32>> {
        let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
        (0..fan_in)
            .map(|_| (0..fan_out).map(|_| self.rng.gen_range(-limit..limit)).collect())
            .collect()
    }

    fn add_activation(&mut self, name: &str, shape: Vec<i32>) -> i32 {
        self.tensors.push(Tensor {
            name: name.to_string(),
            shape,
            shape_signature: None,
            dtype: TensorType::Float32,
            buffer: 0,
            quantization: None,
        });
        (self.tensors.len() - 1) as i32
    }

    fn add_constant(
        &mut self,
        name: &str,
        shape: Vec<i32>,
        dtype: TensorType,
        data: Vec<u8>,
        quantization: Option<Quantization>,
    ) -> i32 {
        self.buffers.push(data);
        self.tensors.push(Tensor {
            name: name.to_string(),
            shape,
            shape_signature: None,
            dtype,
            buffer: (self.buffers.len() - 1) as u32,
            quantization,
        });
        (self.tensors.len() - 1) as i32
    }

    fn add_float_constant(&mut self, name: &str, shape: Vec<i32>, values: &[f32]) -> i32 {
        let data = bytemuck::cast_slice(values).to_vec();
        self.add_constant(name, shape, TensorType::Float32, data, None)
    }

    fn add_int32_constant(&mut self, name: &str, values: &[i32]) -> i32 {
        let data = bytemuck::cast_slice(values).to_vec();
        self.add_constant(name, vec![values.len() as i32], TensorType::Int32, data, None)
    }

    fn opcode_index(&mut self, op: BuiltinOperator, version: u32) -> u32 {
        let code = OperatorCode::builtin(op, version);
        match self.operator_codes.iter().position(|c| *c == code) {
            Some(pos) => pos as u32,
            None => {
                self.operator_codes.push(code);
                self.used_ops.push((op, version));
                (self.operator_codes.len() - 1) as u32
            }
        }
    }

    fn add_operator(
        &mut self,
        op: BuiltinOperator,
        version: u32,
        inputs: Vec<i32>,
        output: i32,
        options: BuiltinOptions,
    ) {
        let opcode_index = self.opcode_index(op, version);
        self.operators.push(Operator {
            opcode_index,
            inputs,
            outputs: vec![output],
            options,
        });
    }

    fn min_runtime_version(&self) -> String {
        self.used_ops
            .iter()
            .map(|&(op, version)| min_runtime_for(op, version))
            .max_by(|a, b| parse_version(a).cmp(&parse_version(b)))
            .unwrap_or("1.5.0")
            .to_string()
    }

    fn finish(mut self, input: i32, output: i32, description: String) -> TfliteModel {
        let runtime = self.min_runtime_version();
        self.buffers.push(runtime.into_bytes());
        let metadata = vec![Metadata {
            name: MIN_RUNTIME_VERSION_KEY.to_string(),
            buffer: (self.buffers.len() - 1) as u32,
        }];

        TfliteModel {
            version: TFLITE_SCHEMA_VERSION,
            description: Some(description),
            operator_codes: self.operator_codes,
            subgraphs: vec![SubGraph {
                name: Some("main".to_string()),
                tensors: self.tensors,
                inputs: vec![input],
                outputs: vec![output],
                operators: self.operators,
            }],
            buffers: self.buffers,
            metadata,
        }
    }
}

fn graph_error(layer: usize, message: String) -> CompatError {
    CompatError::GraphError { layer, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::recipe::{ConvertSection, InputSection, ModelSection};

    fn recipe(shape: Vec<i32>, layers: Vec<LayerSpec>) -> ModelRecipe {
        ModelRecipe {
            model: ModelSection {
                name: "unit".to_string(),
                description: None,
                output_path: "unit.tflite".to_string(),
                seed: Some(7),
            },
            input: InputSection {
                name: "x".to_string(),
                shape,
            },
            convert: ConvertSection::default(),
            layers,
        }
    }

    fn dense(units: usize, activation: Activation) -> LayerSpec {
        LayerSpec::Dense {
            units,
            activation,
            name: None,
            kernel: None,
            bias: None,
        }
    }

    fn op_names(model: &TfliteModel) -> Vec<String> {
        model.subgraphs[0]
            .operators
            .iter()
            .map(|op| model.operator_codes[op.opcode_index as usize].op_name())
            .collect()
    }

    #[test]
    fn test_pooling_dense_softmax_lowering() {
        let model = GraphBuilder::build(&recipe(
            vec![1, 16, 1],
            vec![
                LayerSpec::GlobalAveragePooling1d { name: None },
                dense(4, Activation::Relu),
                LayerSpec::Dropout { rate: 0.2 },
                dense(3, Activation::Softmax),
            ],
        ))
        .unwrap();

        assert_eq!(
            op_names(&model),
            vec!["MEAN", "FULLY_CONNECTED", "FULLY_CONNECTED", "SOFTMAX"]
        );
        // FULLY_CONNECTED v1 只登記一次
        assert_eq!(model.operator_codes.len(), 3);
        assert!(model.operator_codes.iter().all(|c| c.version == 1));

        let sg = &model.subgraphs[0];
        let output = &sg.tensors[sg.outputs[0] as usize];
        assert_eq!(output.shape, vec![1, 3]);
        assert_eq!(model.min_runtime_version().as_deref(), Some("1.6.0"));
    }

    #[test]
    fn test_same_seed_same_weights() {
        let layers = vec![LayerSpec::Reshape { shape: vec![1, 8], name: None }, dense(5, Activation::Linear)];
        let a = GraphBuilder::build(&recipe(vec![1, 8, 1], layers.clone())).unwrap();
        let b = GraphBuilder::build(&recipe(vec![1, 8, 1], layers)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_quantized_weights_use_hybrid_version() {
        let mut r = recipe(vec![1, 4], vec![dense(2, Activation::Linear)]);
        r.convert.quantize_weights = true;
        let model = GraphBuilder::build(&r).unwrap();

        assert_eq!(model.operator_codes[0].version, HYBRID_FULLY_CONNECTED_VERSION);
        let sg = &model.subgraphs[0];
        let weights = &sg.tensors[sg.operators[0].inputs[1] as usize];
        assert_eq!(weights.dtype, TensorType::Int8);
        assert_eq!(weights.shape, vec![2, 4]);
        assert!(weights.quantization.is_some());
        assert_eq!(model.min_runtime_version().as_deref(), Some("1.14.0"));
    }

    #[test]
    fn test_dense_on_rank_three_input_is_rejected() {
        let err = GraphBuilder::build(&recipe(vec![1, 16, 1], vec![dense(3, Activation::Relu)]))
            .unwrap_err();
        assert!(matches!(err, CompatError::GraphError { layer: 0, .. }));
    }

    #[test]
    fn test_bad_reshape_is_rejected() {
        let err = GraphBuilder::build(&recipe(
            vec![1, 6],
            vec![LayerSpec::Reshape { shape: vec![1, 4], name: None }],
        ))
        .unwrap_err();
        assert!(err.to_string().contains("cannot reshape"));
    }

    #[test]
    fn test_dropout_only_recipe_is_empty() {
        let err = GraphBuilder::build(&recipe(vec![1, 4], vec![LayerSpec::Dropout { rate: 0.5 }]))
            .unwrap_err();
        assert!(err.to_string().contains("empty graph"));
    }

    #[test]
    fn test_quantize_symmetric() {
        let (q, scale) = quantize_symmetric(&[0.5, -1.0, 0.25]);
        assert_eq!(q, vec![64, -127, 32]);
        assert!((scale - 1.0 / 127.0).abs() < 1e-6);

        let (zeros, scale) = quantize_symmetric(&[0.0, 0.0]);
        assert_eq!(zeros, vec![0, 0]);
        assert_eq!(scale, 1.0);
    }
}
