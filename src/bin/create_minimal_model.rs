use clap::Parser;
use tflite_compat::app::presets;
use tflite_compat::app::runner::{export_recipe, report_failure};
use tflite_compat::utils::{logger, validation::Validate};
use tflite_compat::{BuildConfig, RuntimeProfile};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = BuildConfig::parse();
    logger::init(config.common.verbose, config.common.log_json);

    tracing::info!("Starting create_minimal_model");
    if let Err(e) = config.validate() {
        report_failure("Configuration validation failed", &e);
    }

    let profile = match RuntimeProfile::load_or_default(config.common.profile.as_deref()) {
        Ok(profile) => profile,
        Err(e) => {
            report_failure("Could not load runtime profile", &e);
            RuntimeProfile::default()
        }
    };

    let mut recipe = presets::minimal_recipe();
    config.build.apply(&mut recipe);

    match export_recipe(recipe, &config.common.base_path, profile, !config.build.no_smoke_test).await {
        Ok(outcome) => {
            println!("✅ Minimal TFLite model created!");
            println!("\n{}", "=".repeat(50));
            println!("SUCCESS! Created {}", outcome.output_path);
            println!("This is a basic model that should work with {}", outcome.report.profile);
            println!("Point the app at '{}'", outcome.output_path);
            println!("{}", "=".repeat(50));
        }
        Err(e) => report_failure("Failed to create minimal model", &e),
    }

    Ok(())
}
