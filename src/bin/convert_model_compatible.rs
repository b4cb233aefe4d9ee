use clap::Parser;
use tflite_compat::app::runner::report_failure;
use tflite_compat::core::downgrade::{attempt_downgrade, next_steps, write_recipe_template};
use tflite_compat::utils::{logger, validation::Validate};
use tflite_compat::{CompatError, ConvertConfig, LocalStorage, RuntimeProfile};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ConvertConfig::parse();
    logger::init(config.common.verbose, config.common.log_json);

    tracing::info!("Starting convert_model_compatible");
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
    let storage = LocalStorage::new(config.common.base_path.clone());

    match attempt_downgrade(&storage, &config.input, &config.output, &profile).await {
        Ok(outcome) => {
            println!("✅ Compatible model ready: {}", outcome.output_path);
            return Ok(());
        }
        Err(CompatError::DowngradeUnsupported { operators, .. }) => {
            tracing::warn!("Downgrade impossible: {}", operators.join(", "));
        }
        Err(e) => {
            println!("Error: {}", e);
            tracing::error!("❌ Could not analyze {}: {}", config.input, e);
        }
    }

    // 無法直接轉換時，產生模型配方範本讓使用者手動重建
    if let Err(e) = write_recipe_template(&storage, &config.recipe).await {
        report_failure("Could not write recipe template", &e);
    }
    print!("{}", next_steps(&config.recipe, &config.input, &config.output));

    Ok(())
}
