use crate::config::profile::RuntimeProfile;
use crate::core::inspect::inspect_bytes;
use crate::domain::model::ExportOutcome;
use crate::domain::ports::{ModelPipeline, Storage};
use crate::utils::error::Result;

/// Runs a [`ModelPipeline`] and checks what it wrote.
pub struct ExportEngine<P: ModelPipeline, S: Storage> {
    pipeline: P,
    storage: S,
    profile: RuntimeProfile,
}

impl<P: ModelPipeline, S: Storage> ExportEngine<P, S> {
    pub fn new(pipeline: P, storage: S, profile: RuntimeProfile) -> Self {
        Self {
            pipeline,
            storage,
            profile,
        }
    }

    pub async fn run(&self) -> Result<ExportOutcome> {
        println!("Starting model export...");

        // Build
        println!("Building model...");
        let model = self.pipeline.build().await?;
        let op_count: usize = model.subgraphs.iter().map(|sg| sg.operators.len()).sum();
        println!("Built graph with {} operators", op_count);
        tracing::info!("Graph built: {} operators, {} buffers", op_count, model.buffers.len());

        // Convert
        println!("Converting to TensorFlow Lite...");
        let converted = self.pipeline.convert(model).await?;
        println!("Serialized {} ({} bytes)", converted.name, converted.bytes.len());

        // Save
        println!("Saving model...");
        let output_path = self.pipeline.save(&converted).await?;
        println!("Model saved to: {}", output_path);

        // 重新讀取剛寫出的檔案，確認可以被解析
        println!("Verifying saved model...");
        let bytes = self.storage.read_file(&output_path).await?;
        let report = inspect_bytes(&output_path, &bytes, &self.profile)?;
        tracing::info!(
            "📁 {} verified: {} bytes, compatible with {} = {}",
            output_path,
            bytes.len(),
            self.profile.name,
            report.is_compatible()
        );

        Ok(ExportOutcome {
            output_path,
            size_bytes: bytes.len(),
            report,
        })
    }
}
