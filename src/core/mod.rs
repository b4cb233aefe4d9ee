pub mod downgrade;
pub mod export;
pub mod graph_builder;
pub mod inspect;
pub mod interpreter;
pub mod report;

pub use crate::domain::model::{ExportOutcome, ModelReport};
pub use crate::domain::ports::{ModelPipeline, Storage};
pub use crate::utils::error::Result;
