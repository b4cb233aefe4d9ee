pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod format;
pub mod utils;

pub use app::RecipePipeline;
pub use config::cli::LocalStorage;
pub use config::profile::RuntimeProfile;
pub use config::recipe::ModelRecipe;

#[cfg(feature = "cli")]
pub use config::{BuildConfig, CheckConfig, ConvertConfig, RecipeConfig};

pub use core::export::ExportEngine;
pub use core::graph_builder::GraphBuilder;
pub use core::interpreter::Interpreter;
pub use format::{encode_model, parse_model, TfliteModel};
pub use utils::error::{CompatError, Result};
