//! The subset of the TensorFlow Lite schema (`schema.fbs`) this crate reads
//! and writes.

use std::fmt;

pub const TFLITE_FILE_IDENTIFIER: &[u8; 4] = b"TFL3";
pub const TFLITE_SCHEMA_VERSION: u32 = 3;

/// `OperatorCode.deprecated_builtin_code` value telling the reader to look at
/// the 32-bit `builtin_code` field instead.
pub const PLACEHOLDER_FOR_GREATER_OP_CODES: i32 = 127;

pub const MIN_RUNTIME_VERSION_KEY: &str = "min_runtime_version";

// table field ids, in schema declaration order
pub(crate) mod fields {
    pub mod model {
        pub const VERSION: usize = 0;
        pub const OPERATOR_CODES: usize = 1;
        pub const SUBGRAPHS: usize = 2;
        pub const DESCRIPTION: usize = 3;
        pub const BUFFERS: usize = 4;
        pub const METADATA: usize = 6;
    }
    pub mod operator_code {
        pub const DEPRECATED_BUILTIN_CODE: usize = 0;
        pub const CUSTOM_CODE: usize = 1;
        pub const VERSION: usize = 2;
        pub const BUILTIN_CODE: usize = 3;
    }
    pub mod subgraph {
        pub const TENSORS: usize = 0;
        pub const INPUTS: usize = 1;
        pub const OUTPUTS: usize = 2;
        pub const OPERATORS: usize = 3;
        pub const NAME: usize = 4;
    }
    pub mod tensor {
        pub const SHAPE: usize = 0;
        pub const TYPE: usize = 1;
        pub const BUFFER: usize = 2;
        pub const NAME: usize = 3;
        pub const QUANTIZATION: usize = 4;
        pub const SHAPE_SIGNATURE: usize = 7;
    }
    pub mod quantization {
        pub const SCALE: usize = 2;
        pub const ZERO_POINT: usize = 3;
    }
    pub mod operator {
        pub const OPCODE_INDEX: usize = 0;
        pub const INPUTS: usize = 1;
        pub const OUTPUTS: usize = 2;
        pub const BUILTIN_OPTIONS_TYPE: usize = 3;
        pub const BUILTIN_OPTIONS: usize = 4;
    }
    pub mod buffer {
        pub const DATA: usize = 0;
    }
    pub mod metadata {
        pub const NAME: usize = 0;
        pub const BUFFER: usize = 1;
    }
}

/// Builtin operator codes, indexed by code.
const BUILTIN_OPERATOR_NAMES: &[&str] = &[
    "ADD",
    "AVERAGE_POOL_2D",
    "CONCATENATION",
    "CONV_2D",
    "DEPTHWISE_CONV_2D",
    "DEPTH_TO_SPACE",
    "DEQUANTIZE",
    "EMBEDDING_LOOKUP",
    "FLOOR",
    "FULLY_CONNECTED",
    "HASHTABLE_LOOKUP",
    "L2_NORMALIZATION",
    "L2_POOL_2D",
    "LOCAL_RESPONSE_NORMALIZATION",
    "LOGISTIC",
    "LSH_PROJECTION",
    "LSTM",
    "MAX_POOL_2D",
    "MUL",
    "RELU",
    "RELU_N1_TO_1",
    "RELU6",
    "RESHAPE",
    "RESIZE_BILINEAR",
    "RNN",
    "SOFTMAX",
    "SPACE_TO_DEPTH",
    "SVDF",
    "TANH",
    "CONCAT_EMBEDDINGS",
    "SKIP_GRAM",
    "CALL",
    "CUSTOM",
    "EMBEDDING_LOOKUP_SPARSE",
    "PAD",
    "UNIDIRECTIONAL_SEQUENCE_RNN",
    "GATHER",
    "BATCH_TO_SPACE_ND",
    "SPACE_TO_BATCH_ND",
    "TRANSPOSE",
    "MEAN",
    "SUB",
    "DIV",
    "SQUEEZE",
    "UNIDIRECTIONAL_SEQUENCE_LSTM",
    "STRIDED_SLICE",
    "BIDIRECTIONAL_SEQUENCE_RNN",
    "EXP",
    "TOPK_V2",
    "SPLIT",
    "LOG_SOFTMAX",
    "DELEGATE",
    "BIDIRECTIONAL_SEQUENCE_LSTM",
    "CAST",
    "PRELU",
    "MAXIMUM",
    "ARG_MAX",
    "MINIMUM",
    "LESS",
    "NEG",
    "PADV2",
    "GREATER",
    "GREATER_EQUAL",
    "LESS_EQUAL",
    "SELECT",
    "SLICE",
    "SIN",
    "TRANSPOSE_CONV",
    "SPARSE_TO_DENSE",
    "TILE",
    "EXPAND_DIMS",
    "EQUAL",
    "NOT_EQUAL",
    "LOG",
    "SUM",
    "SQRT",
    "RSQRT",
    "SHAPE",
    "POW",
    "ARG_MIN",
    "FAKE_QUANT",
    "REDUCE_PROD",
    "REDUCE_MAX",
    "PACK",
    "LOGICAL_OR",
    "ONE_HOT",
    "LOGICAL_AND",
    "LOGICAL_NOT",
    "UNPACK",
    "REDUCE_MIN",
    "FLOOR_DIV",
    "REDUCE_ANY",
    "SQUARE",
    "ZEROS_LIKE",
    "FILL",
    "FLOOR_MOD",
    "RANGE",
    "RESIZE_NEAREST_NEIGHBOR",
    "LEAKY_RELU",
    "SQUARED_DIFFERENCE",
    "MIRROR_PAD",
    "ABS",
    "SPLIT_V",
    "UNIQUE",
    "CEIL",
    "REVERSE_V2",
    "ADD_N",
    "GATHER_ND",
    "COS",
    "WHERE",
    "RANK",
    "ELU",
    "REVERSE_SEQUENCE",
    "MATRIX_DIAG",
    "QUANTIZE",
    "MATRIX_SET_DIAG",
    "ROUND",
    "HARD_SWISH",
    "IF",
    "WHILE",
    "NON_MAX_SUPPRESSION_V4",
    "NON_MAX_SUPPRESSION_V5",
    "SCATTER_ND",
    "SELECT_V2",
    "DENSIFY",
    "SEGMENT_SUM",
    "BATCH_MATMUL",
    "PLACEHOLDER_FOR_GREATER_OP_CODES",
    "CUMSUM",
    "CALL_ONCE",
    "BROADCAST_TO",
    "RFFT2D",
    "CONV_3D",
    "IMAG",
    "REAL",
    "COMPLEX_ABS",
    "HASHTABLE",
    "HASHTABLE_FIND",
    "HASHTABLE_IMPORT",
    "HASHTABLE_SIZE",
    "REDUCE_ALL",
    "CONV_3D_TRANSPOSE",
    "VAR_HANDLE",
    "READ_VARIABLE",
    "ASSIGN_VARIABLE",
    "BROADCAST_ARGS",
    "RANDOM_STANDARD_NORMAL",
    "BUCKETIZE",
    "RANDOM_UNIFORM",
    "MULTINOMIAL",
    "GELU",
    "DYNAMIC_UPDATE_SLICE",
    "RELU_0_TO_1",
    "UNSORTED_SEGMENT_PROD",
    "UNSORTED_SEGMENT_MAX",
    "UNSORTED_SEGMENT_SUM",
    "ATAN2",
    "UNSORTED_SEGMENT_MIN",
    "SIGN",
    "BITCAST",
    "BITWISE_XOR",
    "RIGHT_SHIFT",
];

/// The builtin operators the graph builder and the interpreter know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinOperator {
    FullyConnected,
    Logistic,
    Mean,
    Relu,
    Relu6,
    Reshape,
    Softmax,
    Tanh,
}

impl BuiltinOperator {
    pub fn code(self) -> i32 {
        match self {
            BuiltinOperator::FullyConnected => 9,
            BuiltinOperator::Logistic => 14,
            BuiltinOperator::Relu => 19,
            BuiltinOperator::Relu6 => 21,
            BuiltinOperator::Reshape => 22,
            BuiltinOperator::Softmax => 25,
            BuiltinOperator::Tanh => 28,
            BuiltinOperator::Mean => 40,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            9 => Some(BuiltinOperator::FullyConnected),
            14 => Some(BuiltinOperator::Logistic),
            19 => Some(BuiltinOperator::Relu),
            21 => Some(BuiltinOperator::Relu6),
            22 => Some(BuiltinOperator::Reshape),
            25 => Some(BuiltinOperator::Softmax),
            28 => Some(BuiltinOperator::Tanh),
            40 => Some(BuiltinOperator::Mean),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        builtin_operator_name(self.code())
    }
}

/// Schema name of a builtin code, empty for codes newer than this table.
pub fn builtin_operator_name(code: i32) -> &'static str {
    usize::try_from(code)
        .ok()
        .and_then(|idx| BUILTIN_OPERATOR_NAMES.get(idx))
        .copied()
        .unwrap_or("")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorType {
    Float32,
    Float16,
    Int32,
    Uint8,
    Int64,
    String,
    Bool,
    Int16,
    Complex64,
    Int8,
    Float64,
    Other(u8),
}

impl TensorType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => TensorType::Float32,
            1 => TensorType::Float16,
            2 => TensorType::Int32,
            3 => TensorType::Uint8,
            4 => TensorType::Int64,
            5 => TensorType::String,
            6 => TensorType::Bool,
            7 => TensorType::Int16,
            8 => TensorType::Complex64,
            9 => TensorType::Int8,
            10 => TensorType::Float64,
            other => TensorType::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            TensorType::Float32 => 0,
            TensorType::Float16 => 1,
            TensorType::Int32 => 2,
            TensorType::Uint8 => 3,
            TensorType::Int64 => 4,
            TensorType::String => 5,
            TensorType::Bool => 6,
            TensorType::Int16 => 7,
            TensorType::Complex64 => 8,
            TensorType::Int8 => 9,
            TensorType::Float64 => 10,
            TensorType::Other(v) => v,
        }
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TensorType::Float32 => "float32",
            TensorType::Float16 => "float16",
            TensorType::Int32 => "int32",
            TensorType::Uint8 => "uint8",
            TensorType::Int64 => "int64",
            TensorType::String => "string",
            TensorType::Bool => "bool",
            TensorType::Int16 => "int16",
            TensorType::Complex64 => "complex64",
            TensorType::Int8 => "int8",
            TensorType::Float64 => "float64",
            TensorType::Other(v) => return write!(f, "type{}", v),
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationFunction {
    #[default]
    None,
    Relu,
    ReluN1To1,
    Relu6,
    Tanh,
    SignBit,
}

impl ActivationFunction {
    pub fn from_i8(v: i8) -> Self {
        match v {
            1 => ActivationFunction::Relu,
            2 => ActivationFunction::ReluN1To1,
            3 => ActivationFunction::Relu6,
            4 => ActivationFunction::Tanh,
            5 => ActivationFunction::SignBit,
            _ => ActivationFunction::None,
        }
    }

    pub fn as_i8(self) -> i8 {
        match self {
            ActivationFunction::None => 0,
            ActivationFunction::Relu => 1,
            ActivationFunction::ReluN1To1 => 2,
            ActivationFunction::Relu6 => 3,
            ActivationFunction::Tanh => 4,
            ActivationFunction::SignBit => 5,
        }
    }
}

/// `BuiltinOptions` union members this crate understands.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum BuiltinOptions {
    #[default]
    None,
    FullyConnected {
        fused_activation: ActivationFunction,
        keep_num_dims: bool,
        asymmetric_quantize_inputs: bool,
    },
    Softmax {
        beta: f32,
    },
    Reshape {
        new_shape: Vec<i32>,
    },
    Reducer {
        keep_dims: bool,
    },
    /// Any union member we do not decode, kept by tag.
    Other(u8),
}

impl BuiltinOptions {
    pub const FULLY_CONNECTED_TAG: u8 = 8;
    pub const SOFTMAX_TAG: u8 = 9;
    pub const RESHAPE_TAG: u8 = 17;
    pub const REDUCER_TAG: u8 = 27;

    pub fn tag(&self) -> u8 {
        match self {
            BuiltinOptions::None => 0,
            BuiltinOptions::FullyConnected { .. } => Self::FULLY_CONNECTED_TAG,
            BuiltinOptions::Softmax { .. } => Self::SOFTMAX_TAG,
            BuiltinOptions::Reshape { .. } => Self::RESHAPE_TAG,
            BuiltinOptions::Reducer { .. } => Self::REDUCER_TAG,
            BuiltinOptions::Other(tag) => *tag,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorCode {
    pub builtin_code: i32,
    pub custom_code: Option<String>,
    pub version: u32,
}

impl OperatorCode {
    pub fn builtin(op: BuiltinOperator, version: u32) -> Self {
        Self {
            builtin_code: op.code(),
            custom_code: None,
            version,
        }
    }

    /// Name as the runtime reports it: the custom code for custom ops,
    /// otherwise the schema name of the builtin.
    pub fn op_name(&self) -> String {
        if let Some(custom) = &self.custom_code {
            if self.builtin_code == 32 {
                return custom.clone();
            }
        }
        match builtin_operator_name(self.builtin_code) {
            "" => format!("BUILTIN_{}", self.builtin_code),
            name => name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Quantization {
    pub scale: Vec<f32>,
    pub zero_point: Vec<i64>,
}

impl Quantization {
    pub fn is_empty(&self) -> bool {
        self.scale.is_empty() && self.zero_point.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub name: String,
    pub shape: Vec<i32>,
    pub shape_signature: Option<Vec<i32>>,
    pub dtype: TensorType,
    pub buffer: u32,
    pub quantization: Option<Quantization>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operator {
    pub opcode_index: u32,
    pub inputs: Vec<i32>,
    pub outputs: Vec<i32>,
    pub options: BuiltinOptions,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubGraph {
    pub name: Option<String>,
    pub tensors: Vec<Tensor>,
    pub inputs: Vec<i32>,
    pub outputs: Vec<i32>,
    pub operators: Vec<Operator>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub name: String,
    pub buffer: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TfliteModel {
    pub version: u32,
    pub description: Option<String>,
    pub operator_codes: Vec<OperatorCode>,
    pub subgraphs: Vec<SubGraph>,
    pub buffers: Vec<Vec<u8>>,
    pub metadata: Vec<Metadata>,
}

impl TfliteModel {
    /// The subgraph the runtime executes.
    pub fn primary_subgraph(&self) -> Option<&SubGraph> {
        self.subgraphs.first()
    }

    /// Value of the `min_runtime_version` metadata entry, if present.
    pub fn min_runtime_version(&self) -> Option<String> {
        let entry = self
            .metadata
            .iter()
            .find(|m| m.name == MIN_RUNTIME_VERSION_KEY)?;
        let data = self.buffers.get(entry.buffer as usize)?;
        let text = String::from_utf8_lossy(data);
        let trimmed = text.trim_end_matches('\0').trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names() {
        assert_eq!(builtin_operator_name(9), "FULLY_CONNECTED");
        assert_eq!(builtin_operator_name(40), "MEAN");
        assert_eq!(builtin_operator_name(126), "BATCH_MATMUL");
        assert_eq!(builtin_operator_name(150), "GELU");
        for op in [
            BuiltinOperator::FullyConnected,
            BuiltinOperator::Logistic,
            BuiltinOperator::Mean,
            BuiltinOperator::Relu,
            BuiltinOperator::Relu6,
            BuiltinOperator::Reshape,
            BuiltinOperator::Softmax,
            BuiltinOperator::Tanh,
        ] {
            assert_eq!(BuiltinOperator::from_code(op.code()), Some(op));
        }
    }

    #[test]
    fn test_unknown_and_custom_op_names() {
        let future = OperatorCode {
            builtin_code: 4000,
            custom_code: None,
            version: 1,
        };
        assert_eq!(future.op_name(), "BUILTIN_4000");

        let custom = OperatorCode {
            builtin_code: 32,
            custom_code: Some("TFLite_Detection_PostProcess".to_string()),
            version: 1,
        };
        assert_eq!(custom.op_name(), "TFLite_Detection_PostProcess");
    }

    #[test]
    fn test_tensor_type_display() {
        assert_eq!(TensorType::Float32.to_string(), "float32");
        assert_eq!(TensorType::Int8.to_string(), "int8");
        assert_eq!(TensorType::from_u8(42).to_string(), "type42");
    }
}
