use crate::domain::model::ConvertedModel;
use crate::format::TfliteModel;
use crate::utils::error::Result;
use async_trait::async_trait;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    fn exists(&self, path: &str) -> impl std::future::Future<Output = bool> + Send;
}

/// build → convert → save, one model per run.
#[async_trait]
pub trait ModelPipeline: Send + Sync {
    async fn build(&self) -> Result<TfliteModel>;
    async fn convert(&self, model: TfliteModel) -> Result<ConvertedModel>;
    async fn save(&self, converted: &ConvertedModel) -> Result<String>;
}
