use clap::Parser;
use tflite_compat::app::presets;
use tflite_compat::app::runner::{export_recipe, report_failure};
use tflite_compat::core::report::separator;
use tflite_compat::utils::{logger, validation::Validate};
use tflite_compat::{BuildConfig, RuntimeProfile};

const FULLY_CONNECTED: &str = "FULLY_CONNECTED";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = BuildConfig::parse();
    logger::init(config.common.verbose, config.common.log_json);

    tracing::info!("Starting create_tf212_compatible");
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
    let fc_limit = profile.max_versions.get(FULLY_CONNECTED).copied();

    let mut recipe = presets::tf212_recipe();
    config.build.apply(&mut recipe);

    println!("Converting model...");
    match export_recipe(recipe, &config.common.base_path, profile, !config.build.no_smoke_test).await {
        Ok(outcome) => {
            println!("✅ Compatible model saved to: {}", outcome.output_path);

            println!("Operations used:");
            for op in &outcome.report.operators {
                println!("  - {} (v{})", op.op_name, op.version);
            }

            if let Some(max_fc) = outcome.report.max_version_of(FULLY_CONNECTED) {
                match fc_limit {
                    Some(limit) if max_fc > limit => {
                        println!("❌ {} version {} - INCOMPATIBLE!", FULLY_CONNECTED, max_fc)
                    }
                    _ => println!("✅ {} version {} - COMPATIBLE!", FULLY_CONNECTED, max_fc),
                }
            }

            println!("\n{}", separator());
            println!("SUCCESS! Your compatible model is ready.");
            println!("1. Point the app at '{}'", outcome.output_path);
            println!("2. Or rename it to 'best_model.tflite' to replace the old one");
            println!("{}", separator());
        }
        Err(e) => {
            println!("\n❌ Failed to create compatible model");
            report_failure("Conversion failed", &e);
        }
    }

    Ok(())
}
