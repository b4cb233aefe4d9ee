use crate::format::flatbuffer::{file_identifier, Builder, Table, WIPOffset};
use crate::format::schema::{
    fields, ActivationFunction, BuiltinOptions, Metadata, Operator, OperatorCode, Quantization,
    SubGraph, Tensor, TensorType, TfliteModel, TFLITE_FILE_IDENTIFIER,
    PLACEHOLDER_FOR_GREATER_OP_CODES,
};
use crate::utils::error::{CompatError, Result};

/// Decodes a `.tflite` flatbuffer.
pub fn parse_model(bytes: &[u8]) -> Result<TfliteModel> {
    match file_identifier(bytes) {
        Some(id) if id == TFLITE_FILE_IDENTIFIER => {}
        Some(id) => {
            return Err(CompatError::malformed(format!(
                "file identifier {:?} is not TFL3",
                String::from_utf8_lossy(id)
            )))
        }
        None => {
            return Err(CompatError::malformed(format!(
                "file too short ({} bytes)",
                bytes.len()
            )))
        }
    }

    let root = Table::root(bytes)?;
    let version = root.get_u32(fields::model::VERSION, 0)?;
    tracing::debug!("Decoding TFLite model, schema version {}", version);

    let operator_codes = root
        .get_vec_tables(fields::model::OPERATOR_CODES)?
        .iter()
        .map(decode_operator_code)
        .collect::<Result<Vec<_>>>()?;

    let buffers = root
        .get_vec_tables(fields::model::BUFFERS)?
        .iter()
        .map(|t| Ok(t.get_bytes(fields::buffer::DATA)?.map(<[u8]>::to_vec).unwrap_or_default()))
        .collect::<Result<Vec<_>>>()?;

    let subgraphs = root
        .get_vec_tables(fields::model::SUBGRAPHS)?
        .iter()
        .enumerate()
        .map(|(idx, t)| decode_subgraph(idx, t, operator_codes.len(), buffers.len()))
        .collect::<Result<Vec<_>>>()?;

    let metadata = root
        .get_vec_tables(fields::model::METADATA)?
        .iter()
        .map(|t| {
            Ok(Metadata {
                name: t.get_str(fields::metadata::NAME)?.unwrap_or_default().to_string(),
                buffer: t.get_u32(fields::metadata::BUFFER, 0)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(TfliteModel {
        version,
        description: root
            .get_str(fields::model::DESCRIPTION)?
            .map(str::to_string),
        operator_codes,
        subgraphs,
        buffers,
        metadata,
    })
}

fn decode_operator_code(t: &Table<'_>) -> Result<OperatorCode> {
    use fields::operator_code as f;

    let deprecated = t.get_i8(f::DEPRECATED_BUILTIN_CODE, 0)? as i32;
    let extended = t.get_i32(f::BUILTIN_CODE, 0)?;
    // 舊版轉換器只寫 deprecated 欄位，新版在 127 以上只寫 builtin_code
    let builtin_code = if deprecated == PLACEHOLDER_FOR_GREATER_OP_CODES {
        extended
    } else {
        deprecated.max(extended)
    };

    let raw_version = t.get_i32(f::VERSION, 1)?;
    let version = u32::try_from(raw_version).map_err(|_| {
        CompatError::malformed(format!(
            "operator code {} has negative version {}",
            builtin_code, raw_version
        ))
    })?;

    Ok(OperatorCode {
        builtin_code,
        custom_code: t.get_str(f::CUSTOM_CODE)?.map(str::to_string),
        version,
    })
}

fn check_tensor_refs(what: &str, refs: &[i32], tensor_count: usize, optional: bool) -> Result<()> {
    for &idx in refs {
        let in_range = idx >= 0 && (idx as usize) < tensor_count;
        if !(in_range || (optional && idx == -1)) {
            return Err(CompatError::malformed(format!(
                "{} references tensor {} but the subgraph has {} tensors",
                what, idx, tensor_count
            )));
        }
    }
    Ok(())
}

fn decode_subgraph(
    index: usize,
    t: &Table<'_>,
    opcode_count: usize,
    buffer_count: usize,
) -> Result<SubGraph> {
    use fields::subgraph as f;

    let tensors = t
        .get_vec_tables(f::TENSORS)?
        .iter()
        .map(|tt| decode_tensor(tt, buffer_count))
        .collect::<Result<Vec<_>>>()?;

    let inputs = t.get_vec_i32(f::INPUTS)?.unwrap_or_default();
    let outputs = t.get_vec_i32(f::OUTPUTS)?.unwrap_or_default();
    check_tensor_refs(&format!("subgraph {} inputs", index), &inputs, tensors.len(), false)?;
    check_tensor_refs(&format!("subgraph {} outputs", index), &outputs, tensors.len(), false)?;

    let mut operators = Vec::new();
    for (node, ot) in t.get_vec_tables(f::OPERATORS)?.iter().enumerate() {
        let op = decode_operator(ot)?;
        if op.opcode_index as usize >= opcode_count {
            return Err(CompatError::malformed(format!(
                "node {} of subgraph {} uses opcode index {} but only {} operator codes exist",
                node, index, op.opcode_index, opcode_count
            )));
        }
        let label = format!("node {} of subgraph {}", node, index);
        check_tensor_refs(&label, &op.inputs, tensors.len(), true)?;
        check_tensor_refs(&label, &op.outputs, tensors.len(), false)?;
        operators.push(op);
    }

    Ok(SubGraph {
        name: t.get_str(f::NAME)?.map(str::to_string),
        tensors,
        inputs,
        outputs,
        operators,
    })
}

fn decode_tensor(t: &Table<'_>, buffer_count: usize) -> Result<Tensor> {
    use fields::tensor as f;

    let buffer = t.get_u32(f::BUFFER, 0)?;
    if buffer_count > 0 && buffer as usize >= buffer_count {
        return Err(CompatError::malformed(format!(
            "tensor references buffer {} of {}",
            buffer, buffer_count
        )));
    }

    let quantization = match t.get_table(f::QUANTIZATION)? {
        Some(q) => {
            let params = Quantization {
                scale: q.get_vec_f32(fields::quantization::SCALE)?.unwrap_or_default(),
                zero_point: q
                    .get_vec_i64(fields::quantization::ZERO_POINT)?
                    .unwrap_or_default(),
            };
            (!params.is_empty()).then_some(params)
        }
        None => None,
    };

    Ok(Tensor {
        name: t.get_str(f::NAME)?.unwrap_or_default().to_string(),
        shape: t.get_vec_i32(f::SHAPE)?.unwrap_or_default(),
        shape_signature: t.get_vec_i32(f::SHAPE_SIGNATURE)?,
        dtype: TensorType::from_u8(t.get_u8(f::TYPE, 0)?),
        buffer,
        quantization,
    })
}

fn decode_operator(t: &Table<'_>) -> Result<Operator> {
    use fields::operator as f;

    let tag = t.get_u8(f::BUILTIN_OPTIONS_TYPE, 0)?;
    let table = t.get_table(f::BUILTIN_OPTIONS)?;
    let options = match (tag, table) {
        (0, _) => BuiltinOptions::None,
        (BuiltinOptions::FULLY_CONNECTED_TAG, opts) => BuiltinOptions::FullyConnected {
            fused_activation: ActivationFunction::from_i8(match &opts {
                Some(o) => o.get_i8(0, 0)?,
                None => 0,
            }),
            keep_num_dims: match &opts {
                Some(o) => o.get_bool(2, false)?,
                None => false,
            },
            asymmetric_quantize_inputs: match &opts {
                Some(o) => o.get_bool(3, false)?,
                None => false,
            },
        },
        (BuiltinOptions::SOFTMAX_TAG, opts) => BuiltinOptions::Softmax {
            beta: match &opts {
                Some(o) => o.get_f32(0, 0.0)?,
                None => 0.0,
            },
        },
        (BuiltinOptions::RESHAPE_TAG, opts) => BuiltinOptions::Reshape {
            new_shape: match &opts {
                Some(o) => o.get_vec_i32(0)?.unwrap_or_default(),
                None => Vec::new(),
            },
        },
        (BuiltinOptions::REDUCER_TAG, opts) => BuiltinOptions::Reducer {
            keep_dims: match &opts {
                Some(o) => o.get_bool(0, false)?,
                None => false,
            },
        },
        (other, _) => BuiltinOptions::Other(other),
    };

    Ok(Operator {
        opcode_index: t.get_u32(f::OPCODE_INDEX, 0)?,
        inputs: t.get_vec_i32(f::INPUTS)?.unwrap_or_default(),
        outputs: t.get_vec_i32(f::OUTPUTS)?.unwrap_or_default(),
        options,
    })
}

/// Encodes a model into a `.tflite` flatbuffer.
pub fn encode_model(model: &TfliteModel) -> Vec<u8> {
    let mut b = Builder::new();

    let buffers: Vec<WIPOffset> = model
        .buffers
        .iter()
        .map(|data| {
            let data_off = (!data.is_empty()).then(|| b.create_byte_vector(data, 16));
            b.start_table();
            if let Some(off) = data_off {
                b.add_offset(fields::buffer::DATA, off);
            }
            b.end_table()
        })
        .collect();
    let buffers = b.create_vector_offsets(&buffers);

    let codes: Vec<WIPOffset> = model
        .operator_codes
        .iter()
        .map(|code| encode_operator_code(&mut b, code))
        .collect();
    let codes = b.create_vector_offsets(&codes);

    let subgraphs: Vec<WIPOffset> = model
        .subgraphs
        .iter()
        .map(|sg| encode_subgraph(&mut b, sg))
        .collect();
    let subgraphs = b.create_vector_offsets(&subgraphs);

    let metadata: Vec<WIPOffset> = model
        .metadata
        .iter()
        .map(|m| {
            let name = b.create_string(&m.name);
            b.start_table();
            b.add_offset(fields::metadata::NAME, name);
            b.add_u32(fields::metadata::BUFFER, m.buffer);
            b.end_table()
        })
        .collect();
    let metadata = (!metadata.is_empty()).then(|| b.create_vector_offsets(&metadata));

    let description = model.description.as_deref().map(|d| b.create_string(d));

    b.start_table();
    b.add_u32(fields::model::VERSION, model.version);
    b.add_offset(fields::model::OPERATOR_CODES, codes);
    b.add_offset(fields::model::SUBGRAPHS, subgraphs);
    if let Some(d) = description {
        b.add_offset(fields::model::DESCRIPTION, d);
    }
    b.add_offset(fields::model::BUFFERS, buffers);
    if let Some(m) = metadata {
        b.add_offset(fields::model::METADATA, m);
    }
    let root = b.end_table();
    b.finish(root, TFLITE_FILE_IDENTIFIER)
}

fn encode_operator_code(b: &mut Builder, code: &OperatorCode) -> WIPOffset {
    use fields::operator_code as f;

    let custom = code.custom_code.as_deref().map(|c| b.create_string(c));
    b.start_table();
    b.add_i8(
        f::DEPRECATED_BUILTIN_CODE,
        code.builtin_code.min(PLACEHOLDER_FOR_GREATER_OP_CODES) as i8,
    );
    if let Some(c) = custom {
        b.add_offset(f::CUSTOM_CODE, c);
    }
    b.add_i32(f::VERSION, code.version as i32);
    b.add_i32(f::BUILTIN_CODE, code.builtin_code);
    b.end_table()
}

fn encode_subgraph(b: &mut Builder, sg: &SubGraph) -> WIPOffset {
    use fields::subgraph as f;

    let tensors: Vec<WIPOffset> = sg.tensors.iter().map(|t| encode_tensor(b, t)).collect();
    let tensors = b.create_vector_offsets(&tensors);
    let inputs = b.create_vector_i32(&sg.inputs);
    let outputs = b.create_vector_i32(&sg.outputs);
    let operators: Vec<WIPOffset> = sg.operators.iter().map(|op| encode_operator(b, op)).collect();
    let operators = b.create_vector_offsets(&operators);
    let name = sg.name.as_deref().map(|n| b.create_string(n));

    b.start_table();
    b.add_offset(f::TENSORS, tensors);
    b.add_offset(f::INPUTS, inputs);
    b.add_offset(f::OUTPUTS, outputs);
    b.add_offset(f::OPERATORS, operators);
    if let Some(n) = name {
        b.add_offset(f::NAME, n);
    }
    b.end_table()
}

fn encode_tensor(b: &mut Builder, t: &Tensor) -> WIPOffset {
    use fields::tensor as f;

    let shape = b.create_vector_i32(&t.shape);
    let signature = t.shape_signature.as_deref().map(|s| b.create_vector_i32(s));
    let name = b.create_string(&t.name);
    let quantization = t.quantization.as_ref().map(|q| {
        let scale = b.create_vector_f32(&q.scale);
        let zero_point = b.create_vector_i64(&q.zero_point);
        b.start_table();
        b.add_offset(fields::quantization::SCALE, scale);
        b.add_offset(fields::quantization::ZERO_POINT, zero_point);
        b.end_table()
    });

    b.start_table();
    b.add_offset(f::SHAPE, shape);
    b.add_u8(f::TYPE, t.dtype.as_u8());
    b.add_u32(f::BUFFER, t.buffer);
    b.add_offset(f::NAME, name);
    if let Some(q) = quantization {
        b.add_offset(f::QUANTIZATION, q);
    }
    if let Some(s) = signature {
        b.add_offset(f::SHAPE_SIGNATURE, s);
    }
    b.end_table()
}

fn encode_options(b: &mut Builder, options: &BuiltinOptions) -> Option<WIPOffset> {
    match options {
        BuiltinOptions::None | BuiltinOptions::Other(_) => None,
        BuiltinOptions::FullyConnected {
            fused_activation,
            keep_num_dims,
            asymmetric_quantize_inputs,
        } => {
            b.start_table();
            b.add_i8(0, fused_activation.as_i8());
            b.add_bool(2, *keep_num_dims);
            b.add_bool(3, *asymmetric_quantize_inputs);
            Some(b.end_table())
        }
        BuiltinOptions::Softmax { beta } => {
            b.start_table();
            b.add_f32(0, *beta);
            Some(b.end_table())
        }
        BuiltinOptions::Reshape { new_shape } => {
            let shape = b.create_vector_i32(new_shape);
            b.start_table();
            b.add_offset(0, shape);
            Some(b.end_table())
        }
        BuiltinOptions::Reducer { keep_dims } => {
            b.start_table();
            b.add_bool(0, *keep_dims);
            Some(b.end_table())
        }
    }
}

fn encode_operator(b: &mut Builder, op: &Operator) -> WIPOffset {
    use fields::operator as f;

    let options = encode_options(b, &op.options);
    let inputs = b.create_vector_i32(&op.inputs);
    let outputs = b.create_vector_i32(&op.outputs);

    b.start_table();
    b.add_u32(f::OPCODE_INDEX, op.opcode_index);
    b.add_offset(f::INPUTS, inputs);
    b.add_offset(f::OUTPUTS, outputs);
    if let Some(opts) = options {
        b.add_u8(f::BUILTIN_OPTIONS_TYPE, op.options.tag());
        b.add_offset(f::BUILTIN_OPTIONS, opts);
    }
    b.end_table()
}
