//! Float reference interpreter for the operators the graph builder emits.
//!
//! It only exists so the build tools can push one random input through a
//! freshly written artifact and print the result.

use crate::core::inspect::tensor_details;
use crate::domain::model::TensorDetail;
use crate::format::{
    parse_model, ActivationFunction, BuiltinOperator, BuiltinOptions, Operator, SubGraph, Tensor,
    TensorType, TfliteModel,
};
use crate::utils::error::{CompatError, Result};
use ndarray::{Array2, ArrayD, Axis, Ix2, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct Interpreter {
    model: TfliteModel,
    values: Vec<Option<ArrayD<f32>>>,
}

// buffer 一律是 little-endian
fn le_f32(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn le_i32(data: &[u8]) -> Vec<i32> {
    data.chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn inference_error(message: impl Into<String>) -> CompatError {
    CompatError::InferenceError {
        message: message.into(),
    }
}

impl Interpreter {
    /// Fails up front when the primary subgraph uses an operator this
    /// interpreter cannot evaluate.
    pub fn new(model: TfliteModel) -> Result<Self> {
        let subgraph = model
            .primary_subgraph()
            .ok_or_else(|| CompatError::malformed("model has no subgraphs"))?;

        for op in &subgraph.operators {
            let code = model
                .operator_codes
                .get(op.opcode_index as usize)
                .ok_or_else(|| CompatError::malformed(format!("unknown opcode {}", op.opcode_index)))?;
            if BuiltinOperator::from_code(code.builtin_code).is_none() {
                return Err(CompatError::UnsupportedOperator {
                    op_name: code.op_name(),
                    version: code.version,
                });
            }
        }

        let values = vec![None; subgraph.tensors.len()];
        Ok(Self { model, values })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::new(parse_model(bytes)?)
    }

    fn subgraph(&self) -> &SubGraph {
        // new() already rejected models without subgraphs
        &self.model.subgraphs[0]
    }

    pub fn input_details(&self) -> Result<Vec<TensorDetail>> {
        let sg = self.subgraph();
        tensor_details(sg, &sg.inputs)
    }

    pub fn output_details(&self) -> Result<Vec<TensorDetail>> {
        let sg = self.subgraph();
        tensor_details(sg, &sg.outputs)
    }

    fn tensor(&self, idx: i32) -> Result<&Tensor> {
        usize::try_from(idx)
            .ok()
            .and_then(|i| self.subgraph().tensors.get(i))
            .ok_or_else(|| inference_error(format!("tensor {} does not exist", idx)))
    }

    pub fn set_input(&mut self, input: usize, data: ArrayD<f32>) -> Result<()> {
        let idx = *self
            .subgraph()
            .inputs
            .get(input)
            .ok_or_else(|| inference_error(format!("model has no input {}", input)))?;
        let tensor = self.tensor(idx)?;
        let expected: Vec<usize> = tensor.shape.iter().map(|&d| d.max(0) as usize).collect();
        if data.shape() != expected.as_slice() {
            return Err(inference_error(format!(
                "input '{}' expects shape {:?}, got {:?}",
                tensor.name,
                tensor.shape,
                data.shape()
            )));
        }
        self.values[idx as usize] = Some(data);
        Ok(())
    }

    pub fn output(&self, output: usize) -> Result<ArrayD<f32>> {
        let idx = *self
            .subgraph()
            .outputs
            .get(output)
            .ok_or_else(|| inference_error(format!("model has no output {}", output)))?;
        self.values
            .get(idx as usize)
            .and_then(|v| v.clone())
            .ok_or_else(|| inference_error("invoke() has not produced this output yet"))
    }

    pub fn invoke(&mut self) -> Result<()> {
        let operators = self.subgraph().operators.clone();
        for (i, op) in operators.iter().enumerate() {
            let result = self.eval(op)?;
            let out = *op
                .outputs
                .first()
                .ok_or_else(|| inference_error(format!("operator {} has no output", i)))?;
            self.tensor(out)?;
            self.values[out as usize] = Some(result);
        }
        Ok(())
    }

    /// Runtime value of a tensor: an earlier result or a constant buffer.
    fn value(&self, idx: i32) -> Result<ArrayD<f32>> {
        if let Some(Some(v)) = usize::try_from(idx).ok().and_then(|i| self.values.get(i)) {
            return Ok(v.clone());
        }
        let tensor = self.tensor(idx)?;
        let data = self.constant_data(tensor)?;
        let values = match tensor.dtype {
            TensorType::Float32 => le_f32(data),
            TensorType::Int8 => dequantize(tensor, bytemuck::cast_slice::<u8, i8>(data)),
            TensorType::Int32 => le_i32(data).into_iter().map(|v| v as f32).collect(),
            other => {
                return Err(inference_error(format!(
                    "constant '{}' has unsupported type {}",
                    tensor.name, other
                )))
            }
        };
        let shape: Vec<usize> = tensor.shape.iter().map(|&d| d.max(0) as usize).collect();
        Ok(ArrayD::from_shape_vec(IxDyn(&shape), values)?)
    }

    fn constant_data<'a>(&'a self, tensor: &Tensor) -> Result<&'a [u8]> {
        match self.model.buffers.get(tensor.buffer as usize) {
            Some(data) if !data.is_empty() => Ok(data.as_slice()),
            _ => Err(inference_error(format!(
                "tensor '{}' has no value; was set_input() called?",
                tensor.name
            ))),
        }
    }

    fn const_i32(&self, idx: i32) -> Result<Vec<i32>> {
        let tensor = self.tensor(idx)?;
        if tensor.dtype != TensorType::Int32 {
            return Err(inference_error(format!("'{}' is not an int32 constant", tensor.name)));
        }
        Ok(le_i32(self.constant_data(tensor)?))
    }

    fn input(&self, op: &Operator, n: usize) -> Result<ArrayD<f32>> {
        let idx = *op
            .inputs
            .get(n)
            .ok_or_else(|| inference_error(format!("operator is missing input {}", n)))?;
        self.value(idx)
    }

    fn eval(&self, op: &Operator) -> Result<ArrayD<f32>> {
        let code = &self.model.operator_codes[op.opcode_index as usize];
        let builtin = BuiltinOperator::from_code(code.builtin_code).ok_or_else(|| {
            CompatError::UnsupportedOperator {
                op_name: code.op_name(),
                version: code.version,
            }
        })?;
        tracing::trace!("eval {} v{}", builtin.name(), code.version);

        match builtin {
            BuiltinOperator::Mean => {
                let keep_dims = matches!(op.options, BuiltinOptions::Reducer { keep_dims: true });
                let axes = self.const_i32(op.inputs.get(1).copied().unwrap_or(-1))?;
                mean(self.input(op, 0)?, &axes, keep_dims)
            }
            BuiltinOperator::Reshape => {
                let shape = match &op.options {
                    BuiltinOptions::Reshape { new_shape } if !new_shape.is_empty() => new_shape.clone(),
                    _ => self.const_i32(op.inputs.get(1).copied().unwrap_or(-1))?,
                };
                reshape(self.input(op, 0)?, &shape)
            }
            BuiltinOperator::FullyConnected => {
                let activation = match op.options {
                    BuiltinOptions::FullyConnected { fused_activation, .. } => fused_activation,
                    _ => ActivationFunction::None,
                };
                let bias = match op.inputs.get(2) {
                    Some(&idx) if idx >= 0 => Some(self.value(idx)?),
                    _ => None,
                };
                let out = fully_connected(self.input(op, 0)?, self.input(op, 1)?, bias)?;
                apply_activation(out, activation)
            }
            BuiltinOperator::Softmax => {
                let beta = match op.options {
                    BuiltinOptions::Softmax { beta } => beta,
                    _ => 1.0,
                };
                softmax(self.input(op, 0)?, beta)
            }
            BuiltinOperator::Relu => Ok(self.input(op, 0)?.mapv(|v| v.max(0.0))),
            BuiltinOperator::Relu6 => Ok(self.input(op, 0)?.mapv(|v| v.clamp(0.0, 6.0))),
            BuiltinOperator::Logistic => Ok(self.input(op, 0)?.mapv(|v| 1.0 / (1.0 + (-v).exp()))),
            BuiltinOperator::Tanh => Ok(self.input(op, 0)?.mapv(f32::tanh)),
        }
    }
}

/// Per-tensor, or per-channel along axis 0 when there is one scale per row.
fn dequantize(tensor: &Tensor, data: &[i8]) -> Vec<f32> {
    let (scales, zero_points) = match &tensor.quantization {
        Some(q) if !q.scale.is_empty() => (q.scale.clone(), q.zero_point.clone()),
        _ => (vec![1.0], vec![0]),
    };
    let chunk = (data.len() / scales.len()).max(1);
    data.iter()
        .enumerate()
        .map(|(i, &q)| {
            let c = (i / chunk).min(scales.len() - 1);
            let zp = zero_points.get(c).copied().unwrap_or(0) as f32;
            (q as f32 - zp) * scales[c]
        })
        .collect()
}

fn mean(x: ArrayD<f32>, axes: &[i32], keep_dims: bool) -> Result<ArrayD<f32>> {
    let rank = x.ndim() as i32;
    let mut axes: Vec<usize> = axes
        .iter()
        .map(|&a| {
            let a = if a < 0 { a + rank } else { a };
            if (0..rank).contains(&a) {
                Ok(a as usize)
            } else {
                Err(inference_error(format!("MEAN axis {} out of range for rank {}", a, rank)))
            }
        })
        .collect::<Result<_>>()?;
    axes.sort_unstable();
    axes.dedup();

    let mut out = x;
    for &axis in axes.iter().rev() {
        out = out
            .mean_axis(Axis(axis))
            .ok_or_else(|| inference_error("MEAN over an empty axis"))?;
        if keep_dims {
            out = out.insert_axis(Axis(axis));
        }
    }
    Ok(out)
}

fn reshape(x: ArrayD<f32>, shape: &[i32]) -> Result<ArrayD<f32>> {
    let total = x.len();
    let known: usize = shape.iter().filter(|&&d| d >= 0).map(|&d| d as usize).product();
    let dims: Vec<usize> = shape
        .iter()
        .map(|&d| if d < 0 { total / known.max(1) } else { d as usize })
        .collect();
    let standard = x.as_standard_layout().into_owned();
    Ok(standard.into_shape(IxDyn(&dims))?)
}

/// `weights` is `[units, in]`; inputs of higher rank are flattened to
/// `[-1, in]` like the runtime does.
fn fully_connected(x: ArrayD<f32>, weights: ArrayD<f32>, bias: Option<ArrayD<f32>>) -> Result<ArrayD<f32>> {
    let w: Array2<f32> = weights.into_dimensionality::<Ix2>()?;
    let in_features = w.ncols();
    if in_features == 0 || x.len() % in_features != 0 {
        return Err(inference_error(format!(
            "FULLY_CONNECTED input of {} values does not fit {} features",
            x.len(),
            in_features
        )));
    }
    let rows = x.len() / in_features;
    let x2 = reshape(x, &[rows as i32, in_features as i32])?.into_dimensionality::<Ix2>()?;

    let mut out = x2.dot(&w.t());
    if let Some(b) = bias {
        let b = b.into_dimensionality::<ndarray::Ix1>()?;
        out += &b;
    }
    Ok(out.into_dyn())
}

fn apply_activation(x: ArrayD<f32>, activation: ActivationFunction) -> Result<ArrayD<f32>> {
    match activation {
        ActivationFunction::None => Ok(x),
        ActivationFunction::Relu => Ok(x.mapv(|v| v.max(0.0))),
        ActivationFunction::ReluN1To1 => Ok(x.mapv(|v| v.clamp(-1.0, 1.0))),
        ActivationFunction::Relu6 => Ok(x.mapv(|v| v.clamp(0.0, 6.0))),
        ActivationFunction::Tanh => Ok(x.mapv(f32::tanh)),
        ActivationFunction::SignBit => Err(inference_error("SIGN_BIT activation is not supported")),
    }
}

fn softmax(x: ArrayD<f32>, beta: f32) -> Result<ArrayD<f32>> {
    if x.ndim() == 0 {
        return Err(inference_error("SOFTMAX needs at least one dimension"));
    }
    let last = Axis(x.ndim() - 1);
    let mut out = x;
    for mut lane in out.lanes_mut(last) {
        let max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        lane.mapv_inplace(|v| ((v - max) * beta).exp());
        let sum = lane.sum();
        lane.mapv_inplace(|v| v / sum);
    }
    Ok(out)
}

/// Uniform `[0, 1)` values, the usual random smoke-test input.
pub fn random_input(shape: &[i32], seed: u64) -> ArrayD<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let dims: Vec<usize> = shape.iter().map(|&d| d.max(1) as usize).collect();
    ArrayD::from_shape_simple_fn(IxDyn(&dims), || rng.gen::<f32>())
}

/// Runs one random input through `bytes` and returns the first output.
pub fn smoke_test(bytes: &[u8], seed: u64) -> Result<ArrayD<f32>> {
    let mut interpreter = Interpreter::from_bytes(bytes)?;
    let input = interpreter
        .input_details()?
        .into_iter()
        .next()
        .ok_or_else(|| inference_error("model has no inputs"))?;
    interpreter.set_input(0, random_input(&input.shape, seed))?;
    interpreter.invoke()?;
    interpreter.output(0)
}
