pub mod pipelines;
pub mod presets;
pub mod runner;

pub use pipelines::recipe_pipeline::RecipePipeline;
