//! TensorFlow Lite model file format.

pub mod codec;
pub mod flatbuffer;
pub mod schema;

pub use codec::{encode_model, parse_model};
pub use schema::{
    ActivationFunction, BuiltinOperator, BuiltinOptions, Metadata, Operator, OperatorCode,
    Quantization, SubGraph, Tensor, TensorType, TfliteModel,
};
