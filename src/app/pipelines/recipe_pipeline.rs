use crate::config::recipe::ModelRecipe;
use crate::core::graph_builder::GraphBuilder;
use crate::domain::model::ConvertedModel;
use crate::domain::ports::{ModelPipeline, Storage};
use crate::format::{encode_model, parse_model, TfliteModel};
use crate::utils::error::{CompatError, Result};
use crate::utils::validation::Validate;

/// Builds the model a [`ModelRecipe`] describes and writes it through `S`.
pub struct RecipePipeline<S: Storage> {
    pub(crate) storage: S,
    pub(crate) recipe: ModelRecipe,
}

impl<S: Storage> RecipePipeline<S> {
    pub fn new(storage: S, recipe: ModelRecipe) -> Self {
        Self { storage, recipe }
    }

    pub fn recipe(&self) -> &ModelRecipe {
        &self.recipe
    }
}

#[async_trait::async_trait]
impl<S: Storage> ModelPipeline for RecipePipeline<S> {
    async fn build(&self) -> Result<TfliteModel> {
        self.recipe.validate()?;
        tracing::debug!(
            "Building '{}' from {} layers, input {:?}",
            self.recipe.model.name,
            self.recipe.layers.len(),
            self.recipe.input.shape
        );
        GraphBuilder::build(&self.recipe)
    }

    async fn convert(&self, model: TfliteModel) -> Result<ConvertedModel> {
        let bytes = encode_model(&model);

        // 寫出前先確認序列化結果能被讀回
        let decoded = parse_model(&bytes)?;
        if decoded != model {
            return Err(CompatError::malformed(
                "serialized model does not decode back to the built graph",
            ));
        }
        tracing::debug!("Serialized '{}' to {} bytes", self.recipe.model.name, bytes.len());

        Ok(ConvertedModel {
            name: self.recipe.model.name.clone(),
            output_path: self.recipe.model.output_path.clone(),
            model,
            bytes,
        })
    }

    async fn save(&self, converted: &ConvertedModel) -> Result<String> {
        self.storage
            .write_file(&converted.output_path, &converted.bytes)
            .await?;
        tracing::info!(
            "Wrote {} ({} bytes)",
            converted.output_path,
            converted.bytes.len()
        );
        Ok(converted.output_path.clone())
    }
}
