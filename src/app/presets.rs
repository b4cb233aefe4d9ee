//! Fixed recipes behind the `create_*` tools.

use crate::config::recipe::{
    Activation, ConvertSection, InputSection, LayerSpec, ModelRecipe, ModelSection,
};

pub const MINIMAL_MODEL_PATH: &str = "assets/models/minimal_model.tflite";
pub const SIMPLE_MODEL_PATH: &str = "assets/models/simple_compatible_model.tflite";
pub const TF212_MODEL_PATH: &str = "assets/models/best_model_compatible.tflite";

/// `[1, 32000, 1]` mono audio, the input every preset shares.
pub const AUDIO_INPUT_SHAPE: [i32; 3] = [1, 32000, 1];

fn dense(units: usize, activation: Activation, name: Option<&str>) -> LayerSpec {
    LayerSpec::Dense {
        units,
        activation,
        name: name.map(str::to_string),
        kernel: None,
        bias: None,
    }
}

fn audio_recipe(name: &str, description: &str, output_path: &str, layers: Vec<LayerSpec>) -> ModelRecipe {
    ModelRecipe {
        model: ModelSection {
            name: name.to_string(),
            description: Some(description.to_string()),
            output_path: output_path.to_string(),
            seed: None,
        },
        input: InputSection {
            name: "audio_input".to_string(),
            shape: AUDIO_INPUT_SHAPE.to_vec(),
        },
        convert: ConvertSection::default(),
        layers,
    }
}

/// mean over time, reshape, a fixed `[[0.1, 0.2, 0.3]]` matmul and softmax.
pub fn minimal_recipe() -> ModelRecipe {
    let mut recipe = audio_recipe(
        "minimal_model",
        "Minimal model for older TFLite runtimes",
        MINIMAL_MODEL_PATH,
        vec![
            LayerSpec::ReduceMean {
                axis: 1,
                keep_dims: false,
                name: Some("global_average".to_string()),
            },
            LayerSpec::Reshape {
                shape: vec![1, 1],
                name: Some("reshape".to_string()),
            },
            LayerSpec::Matmul {
                weights: vec![vec![0.1, 0.2, 0.3]],
                name: Some("matmul".to_string()),
            },
            LayerSpec::Softmax { beta: 1.0 },
        ],
    );
    recipe.input.name = "x".to_string();
    recipe
}

pub fn simple_recipe() -> ModelRecipe {
    audio_recipe(
        "simple_compatible_model",
        "Simple compatible model with random weights",
        SIMPLE_MODEL_PATH,
        vec![
            LayerSpec::GlobalAveragePooling1d { name: None },
            dense(64, Activation::Relu, None),
            dense(32, Activation::Relu, None),
            dense(3, Activation::Softmax, Some("predictions")),
        ],
    )
}

pub fn tf212_recipe() -> ModelRecipe {
    audio_recipe(
        "audio_classifier",
        "Audio classifier restricted to FULLY_CONNECTED v11 or lower",
        TF212_MODEL_PATH,
        vec![
            LayerSpec::GlobalAveragePooling1d { name: None },
            dense(128, Activation::Relu, Some("dense1")),
            LayerSpec::Dropout { rate: 0.2 },
            dense(64, Activation::Relu, Some("dense2")),
            LayerSpec::Dropout { rate: 0.2 },
            dense(3, Activation::Softmax, Some("predictions")),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::validation::Validate;

    #[test]
    fn test_presets_validate() {
        for recipe in [minimal_recipe(), simple_recipe(), tf212_recipe()] {
            assert!(recipe.validate().is_ok(), "{} is invalid", recipe.model.name);
            assert_eq!(recipe.input.shape, AUDIO_INPUT_SHAPE.to_vec());
            assert!(!recipe.convert.quantize_weights);
        }
    }

    #[test]
    fn test_preset_output_paths() {
        assert_eq!(minimal_recipe().model.output_path, MINIMAL_MODEL_PATH);
        assert_eq!(simple_recipe().model.output_path, SIMPLE_MODEL_PATH);
        assert_eq!(tf212_recipe().model.output_path, TF212_MODEL_PATH);
    }
}
