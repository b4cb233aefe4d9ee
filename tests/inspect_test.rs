use tflite_compat::app::presets;
use tflite_compat::core::inspect::{check_artifact, inspect_artifact};
use tflite_compat::core::report::{render_batch, ReportFormat};
use tflite_compat::domain::model::{FailedModel, Verdict};
use tflite_compat::domain::ports::Storage;
use tflite_compat::format::{ActivationFunction, BuiltinOperator, BuiltinOptions};
use tflite_compat::{
    encode_model, parse_model, GraphBuilder, Interpreter, LocalStorage, RuntimeProfile, TfliteModel,
};
use tempfile::TempDir;

fn storage_in(dir: &TempDir) -> LocalStorage {
    LocalStorage::new(dir.path().to_string_lossy())
}

/// A two-node model laid out by hand the way a converter would: shared
/// vtables, the root vtable stored after its table, default scalars
/// omitted. FULLY_CONNECTED v12 (relu, no bias) feeds SOFTMAX v1.
const HAND_BUILT_MODEL: &[u8] = &[
    // 0: root offset and "TFL3" identifier
    0x68, 0x00, 0x00, 0x00, 0x54, 0x46, 0x4c, 0x33,
    // 8: vtable shared by both operator codes
    0x0c, 0x00, 0x10, 0x00, 0x0c, 0x00, 0x00, 0x00, 0x04, 0x00, 0x08, 0x00,
    // 20: vtable shared by tensors x, h, y (type and buffer left at defaults)
    0x0c, 0x00, 0x0c, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08, 0x00,
    // 32: vtable for tensor w (buffer 1)
    0x0c, 0x00, 0x10, 0x00, 0x04, 0x00, 0x00, 0x00, 0x08, 0x00, 0x0c, 0x00,
    // 44: vtable for the FULLY_CONNECTED node (opcode_index left at 0)
    0x0e, 0x00, 0x14, 0x00, 0x00, 0x00, 0x04, 0x00, 0x08, 0x00, 0x10, 0x00, 0x0c, 0x00,
    // 58: vtable for the SOFTMAX node
    0x0e, 0x00, 0x18, 0x00, 0x04, 0x00, 0x08, 0x00, 0x0c, 0x00, 0x14, 0x00, 0x10, 0x00,
    // 72: vtable shared by both option tables
    0x06, 0x00, 0x08, 0x00, 0x04, 0x00,
    // 78: subgraph vtable
    0x0e, 0x00, 0x18, 0x00, 0x04, 0x00, 0x08, 0x00, 0x0c, 0x00, 0x10, 0x00, 0x14, 0x00,
    // 92: vtable for the empty buffer 0
    0x04, 0x00, 0x04, 0x00,
    // 96: vtable for buffer 1
    0x06, 0x00, 0x08, 0x00, 0x04, 0x00, 0x00, 0x00,
    // 104: Model table: version 3, codes, subgraphs, description, buffers
    0xe8, 0xff, 0xff, 0xff, 0x03, 0x00, 0x00, 0x00, 0x20, 0x00, 0x00, 0x00, 0x48, 0x00, 0x00, 0x00,
    0x4c, 0x00, 0x00, 0x00, 0x58, 0x00, 0x00, 0x00,
    // 128: Model vtable, placed after its table
    0x0e, 0x00, 0x18, 0x00, 0x04, 0x00, 0x08, 0x00, 0x0c, 0x00, 0x10, 0x00, 0x14, 0x00, 0x00, 0x00,
    // 144: operator_codes vector
    0x02, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x14, 0x00, 0x00, 0x00,
    // 156: FULLY_CONNECTED (9) v12
    0x94, 0x00, 0x00, 0x00, 0x0c, 0x00, 0x00, 0x00, 0x09, 0x00, 0x00, 0x00, 0x09, 0x00, 0x00, 0x00,
    // 172: SOFTMAX (25) v1
    0xa4, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x19, 0x00, 0x00, 0x00, 0x19, 0x00, 0x00, 0x00,
    // 188: subgraphs vector
    0x01, 0x00, 0x00, 0x00, 0x50, 0x00, 0x00, 0x00,
    // 196: description "hand built"
    0x0a, 0x00, 0x00, 0x00, 0x68, 0x61, 0x6e, 0x64, 0x20, 0x62, 0x75, 0x69, 0x6c, 0x74, 0x00, 0x00,
    // 212: buffers vector
    0x02, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00,
    // 224: buffer 0
    0x84, 0x00, 0x00, 0x00,
    // 228: buffer 1
    0x84, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00,
    // 236: buffer 1 data: w = [[1,0,0,0],[0,0,0,-1]] as f32 LE
    0x20, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80, 0x3f, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x80, 0xbf,
    // 272: SubGraph table
    0xc2, 0x00, 0x00, 0x00, 0x14, 0x00, 0x00, 0x00, 0xa8, 0x00, 0x00, 0x00, 0xac, 0x00, 0x00, 0x00,
    0xb0, 0x00, 0x00, 0x00, 0x1c, 0x01, 0x00, 0x00,
    // 296: tensors vector
    0x04, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x18, 0x00, 0x00, 0x00, 0x24, 0x00, 0x00, 0x00,
    0x2c, 0x00, 0x00, 0x00,
    // 316: tensor x
    0x28, 0x01, 0x00, 0x00, 0x30, 0x00, 0x00, 0x00, 0x38, 0x00, 0x00, 0x00,
    // 328: tensor w
    0x28, 0x01, 0x00, 0x00, 0x38, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x3c, 0x00, 0x00, 0x00,
    // 344: tensor h
    0x44, 0x01, 0x00, 0x00, 0x3c, 0x00, 0x00, 0x00, 0x44, 0x00, 0x00, 0x00,
    // 356: tensor y
    0x50, 0x01, 0x00, 0x00, 0x44, 0x00, 0x00, 0x00, 0x4c, 0x00, 0x00, 0x00,
    // 368: shape of x
    0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00,
    // 380: name "x"
    0x01, 0x00, 0x00, 0x00, 0x78, 0x00, 0x00, 0x00,
    // 388: shape of w
    0x02, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00,
    // 400: name "w"
    0x01, 0x00, 0x00, 0x00, 0x77, 0x00, 0x00, 0x00,
    // 408: shape of h
    0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00,
    // 420: name "h"
    0x01, 0x00, 0x00, 0x00, 0x68, 0x00, 0x00, 0x00,
    // 428: shape of y
    0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00,
    // 440: name "y"
    0x01, 0x00, 0x00, 0x00, 0x79, 0x00, 0x00, 0x00,
    // 448: subgraph inputs [0]
    0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    // 456: subgraph outputs [3]
    0x01, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00,
    // 464: operators vector
    0x02, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x18, 0x00, 0x00, 0x00,
    // 476: node 0: FULLY_CONNECTED x, w, no bias -> h, relu
    0xb0, 0x01, 0x00, 0x00, 0x28, 0x00, 0x00, 0x00, 0x34, 0x00, 0x00, 0x00, 0x48, 0x00, 0x00, 0x00,
    0x08, 0x00, 0x00, 0x00,
    // 496: node 1: SOFTMAX h -> y
    0xb6, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x28, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00, 0x00,
    0x38, 0x00, 0x00, 0x00, 0x09, 0x00, 0x00, 0x00,
    // 520: node 0 inputs
    0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff,
    // 536: node 0 outputs
    0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00,
    // 544: node 1 inputs
    0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00,
    // 552: node 1 outputs
    0x01, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00,
    // 560: FullyConnectedOptions: fused RELU
    0xe8, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
    // 568: SoftmaxOptions: beta 1.0
    0xf0, 0x01, 0x00, 0x00, 0x00, 0x00, 0x80, 0x3f,
    // 576: subgraph name "main"
    0x04, 0x00, 0x00, 0x00, 0x6d, 0x61, 0x69, 0x6e, 0x00, 0x00, 0x00, 0x00,
];

/// The tf212 preset with its FULLY_CONNECTED code bumped the way a TF 2.15+
/// converter would emit it.
fn newer_converter_model() -> anyhow::Result<TfliteModel> {
    let mut model = GraphBuilder::build(&presets::tf212_recipe())?;
    for code in &mut model.operator_codes {
        if code.builtin_code == BuiltinOperator::FullyConnected.code() {
            code.version = 12;
        }
    }
    Ok(model)
}

#[tokio::test]
async fn test_entries_follow_loader_order() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let storage = storage_in(&dir);
    let model = GraphBuilder::build(&presets::minimal_recipe())?;
    storage
        .write_file("minimal.tflite", &encode_model(&model))
        .await?;

    let report = inspect_artifact(&storage, "minimal.tflite", &RuntimeProfile::default()).await?;
    let names: Vec<&str> = report.operators.iter().map(|op| op.op_name.as_str()).collect();
    assert_eq!(names, vec!["MEAN", "RESHAPE", "FULLY_CONNECTED", "SOFTMAX"]);
    for (i, op) in report.operators.iter().enumerate() {
        assert_eq!(op.subgraph, 0);
        assert_eq!(op.index, i);
        assert!(!op.op_name.is_empty());
        assert!(op.version >= 1);
    }
    assert!(report.is_compatible());
    Ok(())
}

#[tokio::test]
async fn test_newer_converter_output_is_flagged() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let storage = storage_in(&dir);
    storage
        .write_file("best_model.tflite", &encode_model(&newer_converter_model()?))
        .await?;

    let report = check_artifact(&storage, "best_model.tflite", &RuntimeProfile::default())
        .await
        .expect("model should parse");
    let flagged = report.incompatible_operators();
    assert_eq!(flagged.len(), 3);
    assert!(flagged
        .iter()
        .all(|op| op.op_name == "FULLY_CONNECTED" && op.version == 12));
    assert_eq!(
        flagged[0].verdict,
        Verdict::Incompatible { max_supported: 11 }
    );
    assert_eq!(report.max_version_of("FULLY_CONNECTED"), Some(12));
    Ok(())
}

#[tokio::test]
async fn test_missing_artifact_ends_with_diagnostic() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let storage = storage_in(&dir);

    let report = check_artifact(&storage, "assets/models/best_model.tflite", &RuntimeProfile::default()).await;
    assert!(report.is_none());
    Ok(())
}

#[tokio::test]
async fn test_malformed_artifacts_end_with_diagnostic() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let storage = storage_in(&dir);
    let profile = RuntimeProfile::default();

    storage.write_file("empty.tflite", b"").await?;
    storage
        .write_file("text.tflite", b"this is a README, not a model")
        .await?;

    let good = encode_model(&GraphBuilder::build(&presets::simple_recipe())?);
    storage
        .write_file("truncated.tflite", &good[..good.len() / 3])
        .await?;

    for path in ["empty.tflite", "text.tflite", "truncated.tflite"] {
        assert!(
            check_artifact(&storage, path, &profile).await.is_none(),
            "{} should not produce a report",
            path
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_custom_profile_from_toml() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let storage = storage_in(&dir);
    let profile_path = dir.path().join("legacy.toml");
    std::fs::write(
        &profile_path,
        r#"
name = "legacy"
runtime_version = "1.13.0"

[max_versions]
SOFTMAX = 1
FULLY_CONNECTED = 2
"#,
    )?;
    let profile = RuntimeProfile::load_or_default(profile_path.to_str())?;

    let mut recipe = presets::simple_recipe();
    recipe.convert.quantize_weights = true;
    storage
        .write_file("hybrid.tflite", &encode_model(&GraphBuilder::build(&recipe)?))
        .await?;

    let report = inspect_artifact(&storage, "hybrid.tflite", &profile).await?;
    assert_eq!(report.profile, "legacy");
    assert_eq!(report.max_version_of("FULLY_CONNECTED"), Some(3));
    assert_eq!(report.incompatible_operators().len(), 3);
    // hybrid FULLY_CONNECTED 需要 1.14.0
    assert_eq!(report.min_runtime_version.as_deref(), Some("1.14.0"));
    assert_eq!(report.runtime_version_ok, Some(false));
    Ok(())
}

#[tokio::test]
async fn test_converter_style_layout_decodes() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let storage = storage_in(&dir);
    storage.write_file("hand_built.tflite", HAND_BUILT_MODEL).await?;

    let report = inspect_artifact(&storage, "hand_built.tflite", &RuntimeProfile::default()).await?;
    assert_eq!(report.schema_version, 3);
    assert_eq!(report.description.as_deref(), Some("hand built"));
    let ops: Vec<(&str, u32)> = report
        .operators
        .iter()
        .map(|op| (op.op_name.as_str(), op.version))
        .collect();
    assert_eq!(ops, vec![("FULLY_CONNECTED", 12), ("SOFTMAX", 1)]);
    assert_eq!(
        report.operators[0].verdict,
        Verdict::Incompatible { max_supported: 11 }
    );
    assert_eq!(report.inputs[0].name, "x");
    assert_eq!(report.inputs[0].dtype, "float32");
    assert_eq!(report.primary_input_shape(), Some(&[1, 4][..]));
    assert_eq!(report.primary_output_shape(), Some(&[1, 2][..]));
    assert_eq!(report.min_runtime_version, None);

    let model = parse_model(HAND_BUILT_MODEL)?;
    let subgraph = &model.subgraphs[0];
    assert_eq!(subgraph.name.as_deref(), Some("main"));
    assert_eq!(subgraph.tensors[1].buffer, 1);
    assert_eq!(model.buffers[0].len(), 0);
    assert_eq!(model.buffers[1].len(), 32);
    assert_eq!(subgraph.operators[0].inputs, vec![0, 1, -1]);
    match &subgraph.operators[0].options {
        BuiltinOptions::FullyConnected { fused_activation, .. } => {
            assert_eq!(*fused_activation, ActivationFunction::Relu)
        }
        other => panic!("unexpected options: {:?}", other),
    }
    assert_eq!(subgraph.operators[1].options, BuiltinOptions::Softmax { beta: 1.0 });

    // 自己的 writer 重新編碼後仍是同一個模型
    assert_eq!(parse_model(&encode_model(&model))?, model);

    // h = relu([1, -1]) = [1, 0]
    let mut interpreter = Interpreter::new(model)?;
    interpreter.set_input(0, ndarray::arr2(&[[1.0f32, 1.0, 1.0, 1.0]]).into_dyn())?;
    interpreter.invoke()?;
    let output: Vec<f32> = interpreter.output(0)?.iter().copied().collect();
    let e = 1.0f32.exp();
    assert!((output[0] - e / (e + 1.0)).abs() < 1e-5);
    assert!((output[1] - 1.0 / (e + 1.0)).abs() < 1e-5);
    Ok(())
}

#[tokio::test]
async fn test_json_batch_lists_unreadable_models() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let storage = storage_in(&dir);
    let profile = RuntimeProfile::default();
    storage.write_file("hand_built.tflite", HAND_BUILT_MODEL).await?;

    let mut reports = Vec::new();
    let mut failed = Vec::new();
    for path in ["hand_built.tflite", "assets/models/missing.tflite"] {
        match inspect_artifact(&storage, path, &profile).await {
            Ok(report) => reports.push(report),
            Err(e) => failed.push(FailedModel::new(path, &e)),
        }
    }

    let out = render_batch(&reports, &failed, ReportFormat::Json)?;
    let value: serde_json::Value = serde_json::from_str(&out)?;
    assert_eq!(value["reports"][0]["source"], "hand_built.tflite");
    assert_eq!(value["failed"][0]["source"], "assets/models/missing.tflite");
    Ok(())
}
