use crate::config::profile::RuntimeProfile;
use crate::config::recipe::RECIPE_TEMPLATE;
use crate::core::inspect::inspect_bytes;
use crate::domain::model::ModelReport;
use crate::domain::ports::Storage;
use crate::utils::error::{CompatError, Result};

pub const DEFAULT_SOURCE_MODEL: &str = "assets/models/best_model.tflite";
pub const DEFAULT_COMPATIBLE_MODEL: &str = "assets/models/best_model_compatible.tflite";
pub const DEFAULT_RECIPE_PATH: &str = "model_recipe.toml";

#[derive(Debug, Clone)]
pub struct DowngradeOutcome {
    pub output_path: String,
    pub report: ModelReport,
}

/// Operator versions are fixed when a model is compiled, so the only
/// "downgrade" possible is confirming nothing needs one. Anything above the
/// profile ends in [`CompatError::DowngradeUnsupported`].
pub async fn attempt_downgrade<S: Storage>(
    storage: &S,
    input_path: &str,
    output_path: &str,
    profile: &RuntimeProfile,
) -> Result<DowngradeOutcome> {
    let bytes = storage.read_file(input_path).await?;
    let report = inspect_bytes(input_path, &bytes, profile)?;

    println!("Original model details:");
    if let Some(shape) = report.primary_input_shape() {
        println!("Input shape: {:?}", shape);
    }
    if let Some(shape) = report.primary_output_shape() {
        println!("Output shape: {:?}", shape);
    }

    // 每組 (op, version) 只列一次，保留載入順序
    let mut offenders: Vec<String> = Vec::new();
    for op in report.incompatible_operators() {
        let label = format!("{} v{}", op.op_name, op.version);
        if !offenders.contains(&label) {
            offenders.push(label);
        }
    }
    if report.runtime_version_ok == Some(false) {
        if let Some(min) = &report.min_runtime_version {
            offenders.push(format!("min_runtime_version {}", min));
        }
    }

    if !offenders.is_empty() {
        tracing::warn!("{} exceeds {}: {:?}", input_path, profile.name, offenders);
        println!("❌ Cannot directly convert TFLite to compatible TFLite");
        println!(
            "You need to rebuild the model with operator versions {} accepts",
            profile.name
        );
        return Err(CompatError::DowngradeUnsupported {
            path: input_path.to_string(),
            operators: offenders,
        });
    }

    storage.write_file(output_path, &bytes).await?;
    tracing::info!("{} already fits {}; copied to {}", input_path, profile.name, output_path);
    println!("{}", no_downgrade_note(&profile.name));
    println!("✅ Model already compatible with {}", profile.name);
    println!("📁 Copied to: {}", output_path);

    Ok(DowngradeOutcome {
        output_path: output_path.to_string(),
        report,
    })
}

/// Printed when the input already fits: the file is copied as-is.
pub fn no_downgrade_note(profile_name: &str) -> String {
    format!(
        "💡 No downgrade performed: every operator already fits {}, so the file is copied unchanged",
        profile_name
    )
}

/// Writes the starter recipe unless the user already has one there.
/// Returns whether a file was written.
pub async fn write_recipe_template<S: Storage>(storage: &S, path: &str) -> Result<bool> {
    if storage.exists(path).await {
        tracing::info!("Recipe {} already exists, leaving it untouched", path);
        println!("💡 '{}' already exists; edit it instead of starting over", path);
        return Ok(false);
    }

    storage.write_file(path, RECIPE_TEMPLATE.as_bytes()).await?;
    tracing::info!("Recipe template written to {}", path);
    println!("✅ Created '{}' template", path);
    println!("Edit it with your original model architecture and run it");
    Ok(true)
}

pub fn next_steps(recipe_path: &str, source_path: &str, output_path: &str) -> String {
    let rule = "=".repeat(50);
    format!(
        "\n{rule}\nSOLUTION:\n\
         1. Edit '{recipe}' with your original model architecture\n\
         2. Run: cargo run --bin create_compatible_model -- --recipe {recipe}\n\
         3. Replace {source} with {output}\n{rule}\n",
        rule = rule,
        recipe = recipe_path,
        source = source_path,
        output = output_path,
    )
}
