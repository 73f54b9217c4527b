pub mod results;
pub mod runs;
pub mod stages;
pub mod system;
pub mod uploads;

use crate::core::error::PipelineError;
use crate::core::stage::Stage;

use super::error::ApiError;

/// Resolve a path segment to a canonical stage; anything else is a 404.
pub(crate) fn parse_stage(name: &str) -> Result<Stage, ApiError> {
    Stage::from_name(name).ok_or_else(|| ApiError(PipelineError::UnknownStage(name.to_string())))
}
