use clap::Parser;
use tflite_compat::app::runner::report_failure;
use tflite_compat::core::inspect::{analysis_failure, check_artifact, inspect_artifact};
use tflite_compat::domain::model::FailedModel;
use tflite_compat::core::report::{self, ReportFormat};
use tflite_compat::utils::{logger, validation::Validate};
use tflite_compat::{CheckConfig, LocalStorage, RuntimeProfile};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = CheckConfig::parse();

    // 初始化日誌
    logger::init(config.common.verbose, config.common.log_json);

    tracing::info!("Starting check_model_versions");
    if config.common.verbose {
        tracing::debug!("CLI config: {:?}", config);
    }

    // 驗證配置
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
    let text = config.format == ReportFormat::Text;

    if text {
        print!("{}", report::profile_header(&profile));
        println!("\n{}", report::separator());
    }

    let mut reports = Vec::new();
    let mut failed: Vec<FailedModel> = Vec::new();
    for path in &config.models {
        if text {
            println!("\nAnalyzing {}...", path);
            match check_artifact(&storage, path, &profile).await {
                Some(report) => {
                    print!("{}", report::render_text(&report));
                    reports.push(report);
                }
                None => failed.push(FailedModel::new(path.clone(), "could not be analyzed")),
            }
            println!("\n{}", report::separator());
            continue;
        }

        // JSON/CSV 模式下 stdout 只放報表，診斷訊息走 stderr
        match inspect_artifact(&storage, path, &profile).await {
            Ok(report) => reports.push(report),
            Err(e) => {
                eprintln!("{}", analysis_failure(path, &e));
                failed.push(FailedModel::new(path.clone(), &e));
            }
        }
    }

    if text {
        let failed_paths: Vec<String> = failed.iter().map(|f| f.source.clone()).collect();
        print!("{}", report::render_summary(&profile, &reports, &failed_paths));
    } else {
        match report::render_batch(&reports, &failed, config.format) {
            Ok(out) => print!("{}", out),
            Err(e) => report_failure("Could not render report", &e),
        }
    }

    tracing::info!(
        "Checked {} models: {} analyzed, {} failed",
        config.models.len(),
        reports.len(),
        failed.len()
    );
    Ok(())
}
