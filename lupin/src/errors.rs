use thiserror::Error;

/// Failure classes of the pipeline. Usage errors are handled by the
/// argument parser; everything else is raised through `anyhow` and
/// mapped back to a process exit code in `main`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("data error: {0}")]
    Data(String),

    #[error("parameter error: {0}")]
    Param(String),

    #[error("consistency error: {0}")]
    Consistency(String),
}

impl PipelineError {
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Io(_) => 2,
            _ => 1,
        }
    }
}
