mod pipeline;
mod state;

pub use pipeline::{run_analysis, AnalysisRequest, AppError, PipelineEvent};
pub use state::Session;
