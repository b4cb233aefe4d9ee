use super::DEFAULT_MODELS;
use crate::config::recipe::ModelRecipe;
use crate::core::downgrade::{DEFAULT_COMPATIBLE_MODEL, DEFAULT_RECIPE_PATH, DEFAULT_SOURCE_MODEL};
use crate::core::report::ReportFormat;
use crate::utils::error::Result;
use crate::utils::validation::{validate_file_extensions, validate_path, Validate};
use clap::{Args, Parser};
use serde::{Deserialize, Serialize};

/// Flags every tool shares.
#[derive(Debug, Clone, Serialize, Deserialize, Args)]
pub struct CommonArgs {
    /// Directory the model paths are relative to
    #[arg(long, default_value = ".")]
    pub base_path: String,

    /// Runtime profile TOML; the tflite_flutter 0.11.0 table is used when omitted
    #[arg(long)]
    pub profile: Option<String>,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON lines on stderr")]
    pub log_json: bool,
}

impl Validate for CommonArgs {
    fn validate(&self) -> Result<()> {
        validate_path("base_path", &self.base_path)?;
        if let Some(profile) = &self.profile {
            validate_path("profile", profile)?;
            validate_file_extensions("profile", std::slice::from_ref(profile), &["toml"])?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "check_model_versions")]
#[command(about = "Print operator versions of .tflite models and flag the ones an older runtime rejects")]
pub struct CheckConfig {
    /// Model files to analyze, in order
    #[arg(long = "model", default_values_t = DEFAULT_MODELS.map(String::from))]
    pub models: Vec<String>,

    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl Validate for CheckConfig {
    fn validate(&self) -> Result<()> {
        self.common.validate()?;
        for model in &self.models {
            validate_path("model", model)?;
        }
        validate_file_extensions("model", &self.models, &["tflite"])?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "convert_model_compatible")]
#[command(about = "Try to retarget a compiled model to an older runtime; writes a recipe template when that is impossible")]
pub struct ConvertConfig {
    #[arg(long, default_value = DEFAULT_SOURCE_MODEL)]
    pub input: String,

    #[arg(long, default_value = DEFAULT_COMPATIBLE_MODEL)]
    pub output: String,

    /// Where the fallback recipe template is written
    #[arg(long, default_value = DEFAULT_RECIPE_PATH)]
    pub recipe: String,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl Validate for ConvertConfig {
    fn validate(&self) -> Result<()> {
        self.common.validate()?;
        validate_path("input", &self.input)?;
        validate_path("output", &self.output)?;
        validate_file_extensions("output", std::slice::from_ref(&self.output), &["tflite"])?;
        validate_path("recipe", &self.recipe)?;
        validate_file_extensions("recipe", std::slice::from_ref(&self.recipe), &["toml"])?;
        Ok(())
    }
}

/// Overrides for the `create_*` tools; anything left out keeps the recipe's value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Args)]
pub struct BuildArgs {
    /// Write the model here instead of the recipe's output path
    #[arg(long)]
    pub output: Option<String>,

    /// Store dense weights as int8
    #[arg(long)]
    pub quantize_weights: bool,

    /// Seed for generated weights and the smoke-test input
    #[arg(long)]
    pub seed: Option<u64>,

    /// Skip running random input through the saved model
    #[arg(long)]
    pub no_smoke_test: bool,
}

impl BuildArgs {
    pub fn apply(&self, recipe: &mut ModelRecipe) {
        if let Some(output) = &self.output {
            recipe.model.output_path = output.clone();
        }
        if self.quantize_weights {
            recipe.convert.quantize_weights = true;
        }
        if let Some(seed) = self.seed {
            recipe.model.seed = Some(seed);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(about = "Build one of the fixed toy models and export it as .tflite")]
pub struct BuildConfig {
    #[command(flatten)]
    pub build: BuildArgs,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl Validate for BuildConfig {
    fn validate(&self) -> Result<()> {
        self.common.validate()?;
        if let Some(output) = &self.build.output {
            validate_path("output", output)?;
            validate_file_extensions("output", std::slice::from_ref(output), &["tflite"])?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "create_compatible_model")]
#[command(about = "Build the model described by a recipe TOML")]
pub struct RecipeConfig {
    #[arg(long, default_value = DEFAULT_RECIPE_PATH)]
    pub recipe: String,

    #[command(flatten)]
    pub build: BuildArgs,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl Validate for RecipeConfig {
    fn validate(&self) -> Result<()> {
        self.common.validate()?;
        validate_path("recipe", &self.recipe)?;
        validate_file_extensions("recipe", std::slice::from_ref(&self.recipe), &["toml"])?;
        if let Some(output) = &self.build.output {
            validate_path("output", output)?;
            validate_file_extensions("output", std::slice::from_ref(output), &["tflite"])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_config_defaults() {
        let config = CheckConfig::parse_from(["check_model_versions"]);
        assert_eq!(config.models, DEFAULT_MODELS.map(String::from).to_vec());
        assert_eq!(config.format, ReportFormat::Text);
        assert!(config.common.profile.is_none());
        assert!(config.validate().is_ok());

        let config = CheckConfig::parse_from(["check_model_versions", "--model", "model.onnx"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_convert_config_defaults() {
        let config = ConvertConfig::parse_from(["convert_model_compatible"]);
        assert_eq!(config.input, DEFAULT_SOURCE_MODEL);
        assert_eq!(config.output, DEFAULT_COMPATIBLE_MODEL);
        assert_eq!(config.recipe, DEFAULT_RECIPE_PATH);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_build_overrides() {
        let config = BuildConfig::parse_from([
            "create_simple_model",
            "--output",
            "out/simple.tflite",
            "--quantize-weights",
            "--seed",
            "9",
        ]);
        assert!(config.validate().is_ok());

        let mut recipe = ModelRecipe::template();
        recipe.convert.quantize_weights = false;
        config.build.apply(&mut recipe);
        assert_eq!(recipe.model.output_path, "out/simple.tflite");
        assert!(recipe.convert.quantize_weights);
        assert_eq!(recipe.seed(), 9);
    }

    #[test]
    fn test_recipe_config_rejects_wrong_extension() {
        let config = RecipeConfig::parse_from(["create_compatible_model", "--recipe", "recipe.yaml"]);
        assert!(config.validate().is_err());
    }
}
