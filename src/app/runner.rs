//! Glue shared by the tool binaries.

use crate::app::RecipePipeline;
use crate::config::cli::LocalStorage;
use crate::config::profile::RuntimeProfile;
use crate::config::recipe::ModelRecipe;
use crate::core::export::ExportEngine;
use crate::core::interpreter::smoke_test;
use crate::core::report::render_graph_summary;
use crate::domain::model::ExportOutcome;
use crate::domain::ports::Storage;
use crate::format::parse_model;
use crate::utils::error::{CompatError, Result};

/// Builds `recipe`, writes it under `base_path` and re-checks the result.
/// With `smoke` set, random input is pushed through the saved file; a
/// failure there is logged but does not fail the export.
pub async fn export_recipe(
    recipe: ModelRecipe,
    base_path: &str,
    profile: RuntimeProfile,
    smoke: bool,
) -> Result<ExportOutcome> {
    let storage = LocalStorage::new(base_path);
    let seed = recipe.seed();
    let pipeline = RecipePipeline::new(storage.clone(), recipe);
    let engine = ExportEngine::new(pipeline, storage.clone(), profile);

    let outcome = engine.run().await?;
    let bytes = storage.read_file(&outcome.output_path).await?;
    print!("{}", render_graph_summary(&parse_model(&bytes)?));

    if let Some(shape) = outcome.report.primary_input_shape() {
        println!("Input shape: {:?}", shape);
    }
    if let Some(shape) = outcome.report.primary_output_shape() {
        println!("Output shape: {:?}", shape);
    }

    if smoke {
        match smoke_test(&bytes, seed) {
            Ok(output) => println!("Test output: {:?}", output.as_slice().unwrap_or(&[])),
            Err(e) => {
                tracing::warn!("Smoke test failed: {}", e);
                println!("⚠️ Smoke test skipped: {}", e.user_friendly_message());
            }
        }
    }

    Ok(outcome)
}

/// Logs `e`, prints the friendly message and exits with the code its
/// severity maps to. Low severity errors return so the caller can go on.
pub fn report_failure(context: &str, e: &CompatError) {
    tracing::error!(
        "❌ {}: {} (Category: {:?}, Severity: {:?})",
        context,
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}: {}", context, e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());

    let exit_code = e.exit_code();
    if exit_code > 0 {
        std::process::exit(exit_code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::presets;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_export_minimal_preset() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().to_string_lossy().to_string();

        let outcome = export_recipe(presets::minimal_recipe(), &base, RuntimeProfile::default(), true)
            .await
            .unwrap();
        assert_eq!(outcome.output_path, presets::MINIMAL_MODEL_PATH);
        assert!(outcome.size_bytes > 0);
        assert!(outcome.report.is_compatible());
        assert!(temp_dir.path().join(presets::MINIMAL_MODEL_PATH).exists());
    }
}
