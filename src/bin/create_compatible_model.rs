use clap::Parser;
use tflite_compat::app::runner::{export_recipe, report_failure};
use tflite_compat::utils::{logger, validation::Validate};
use tflite_compat::{LocalStorage, ModelRecipe, RecipeConfig, RuntimeProfile};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = RecipeConfig::parse();
    logger::init(config.common.verbose, config.common.log_json);

    tracing::info!("Starting create_compatible_model");
    if let Err(e) = config.validate() {
        report_failure("Configuration validation failed", &e);
    }

    let recipe_path = LocalStorage::new(config.common.base_path.clone()).resolve(&config.recipe);
    let mut recipe = match ModelRecipe::from_file(&recipe_path) {
        Ok(recipe) => recipe,
        Err(e) => {
            println!("💡 Run convert_model_compatible first to get a '{}' template", config.recipe);
            report_failure(&format!("Could not read {}", recipe_path.display()), &e);
            return Ok(());
        }
    };
    config.build.apply(&mut recipe);

    // 配方可以指定 profile，命令列優先
    let profile_path = config
        .common
        .profile
        .clone()
        .or_else(|| recipe.convert.profile.clone());
    let profile = match RuntimeProfile::load_or_default(profile_path.as_deref()) {
        Ok(profile) => profile,
        Err(e) => {
            report_failure("Could not load runtime profile", &e);
            RuntimeProfile::default()
        }
    };

    println!("Building '{}' ({} layers)", recipe.model.name, recipe.layers.len());
    match export_recipe(recipe, &config.common.base_path, profile, !config.build.no_smoke_test).await {
        Ok(outcome) => {
            if outcome.report.is_compatible() {
                println!("✅ Compatible model created!");
            } else {
                println!("⚠️ Model created, but it is not loadable by {}", outcome.report.profile);
            }
            println!("📁 File: {}", outcome.output_path);
        }
        Err(e) => report_failure("Conversion failed", &e),
    }

    Ok(())
}
