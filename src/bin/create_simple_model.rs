use clap::Parser;
use tflite_compat::app::presets;
use tflite_compat::app::runner::{export_recipe, report_failure};
use tflite_compat::utils::{logger, validation::Validate};
use tflite_compat::{BuildConfig, RuntimeProfile};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = BuildConfig::parse();
    logger::init(config.common.verbose, config.common.log_json);

    tracing::info!("Starting create_simple_model");
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

    let mut recipe = presets::simple_recipe();
    config.build.apply(&mut recipe);

    match export_recipe(recipe, &config.common.base_path, profile, !config.build.no_smoke_test).await {
        Ok(outcome) => {
            println!("✅ Simple compatible model created!");
            println!("📁 File: {}", outcome.output_path);
            println!("\n{}", "=".repeat(50));
            println!("NEXT STEPS:");
            println!("1. Point the app at '{}'", outcome.output_path);
            println!("2. Test the app");
            println!("3. This model gives random predictions - replace it with your trained model");
            println!("{}", "=".repeat(50));
        }
        Err(e) => report_failure("Failed to create model", &e),
    }

    Ok(())
}
