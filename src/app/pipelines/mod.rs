pub mod recipe_pipeline;
