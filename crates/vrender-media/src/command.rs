//! Render invocations and the command builder seam.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use vrender_models::{JobId, RenderSpec};

use crate::error::MediaResult;

/// A fully specified rendering process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderInvocation {
    /// Executable to run
    pub program: PathBuf,
    /// Arguments, passed verbatim (never through a shell)
    pub args: Vec<String>,
    /// File the process is expected to produce
    pub output_path: PathBuf,
}

impl RenderInvocation {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            output_path: output_path.into(),
        }
    }

    /// Command line for logging.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Inputs a builder needs besides the render spec.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub job_id: JobId,
    /// Job-private scratch directory for downloads and the render output
    pub work_dir: PathBuf,
    /// Requested output file name
    pub output_filename: String,
}

impl BuildContext {
    pub fn new(job_id: JobId, work_dir: impl AsRef<Path>, output_filename: impl Into<String>) -> Self {
        Self {
            job_id,
            work_dir: work_dir.as_ref().to_path_buf(),
            output_filename: output_filename.into(),
        }
    }

    /// Where the render output should be written.
    pub fn output_path(&self) -> PathBuf {
        self.work_dir.join(&self.output_filename)
    }
}

/// Turns a render spec into a concrete process invocation.
///
/// This is the only place rendering-engine details live. The orchestrator
/// runs whatever invocation comes back and checks the declared output.
#[async_trait]
pub trait RenderCommandBuilder: Send + Sync {
    async fn build(&self, spec: &RenderSpec, ctx: &BuildContext) -> MediaResult<RenderInvocation>;
}
