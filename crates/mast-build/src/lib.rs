//! Image builds for commits, via the external `hlb` tool.
//!
//! A commit's member changesets each name an image; the generated build file
//! imports every member, stacks their `stake` targets into one filesystem,
//! and publishes the result under the repository's artifact name.
//!
//! Builds are fire-and-forget: dispatch returns immediately, the build runs
//! with its own timeout, and its outcome never feeds back into
//! reconciliation state. On failure the build directory is kept on disk and
//! its path logged for inspection.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{error, info};

use mast_core::build::{BuildDispatcher, BuildRequest};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(900);

const BUILD_FILE: &str = "build.hlb";
const OUTPUT_FILE: &str = "output.log";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("build timed out")]
    Timeout,

    #[error("hlb returned status code: {0}")]
    Failed(i32),
}

/// Render the hlb build file for one commit.
///
/// `build()` stacks every member's stake; `publish()` pushes the combined
/// filesystem under the repository's artifact name.
pub fn generate_build_file(request: &BuildRequest) -> String {
    let mut out = String::new();

    for changeset in &request.changesets {
        out.push_str(&format!(
            "import {} from fs {{ image \"{}\"; }}\n",
            changeset.name, changeset.image
        ));
    }

    out.push_str("\nfs build() {\n");
    for changeset in &request.changesets {
        out.push_str(&format!("  {}.stake\n", changeset.name));
    }
    out.push_str("}\n");

    out.push_str("\nfs publish() {\n  build\n");
    out.push_str(&format!("  dockerPush \"{}\"\n", request.artifact_name));
    out.push_str("}\n");

    out
}

/// Runs `hlb` builds as background tasks.
#[derive(Clone)]
pub struct HlbBuilder {
    command: String,
    timeout: Duration,
}

impl HlbBuilder {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            command: command.into(),
            timeout,
        })
    }

    async fn run(&self, request: BuildRequest) {
        let artifact = request.artifact_name.clone();
        info!(artifact = %artifact, members = request.changesets.len(), "starting image build");

        let dir = match tempfile::Builder::new().prefix("mast").tempdir() {
            Ok(dir) => dir,
            Err(err) => {
                error!(artifact = %artifact, error = %err, "failed to create build directory");
                return;
            }
        };

        match self.execute(&request, dir.path()).await {
            Ok(()) => {
                info!(artifact = %artifact, "image build published");
            }
            Err(err) => {
                // Keep the directory so the build file and output survive for
                // debugging.
                let kept = dir.keep();
                error!(
                    artifact = %artifact,
                    error = %err,
                    dir = %kept.display(),
                    "image build failed"
                );
            }
        }
    }

    async fn execute(&self, request: &BuildRequest, dir: &Path) -> Result<(), BuildError> {
        let build_file = generate_build_file(request);
        tokio::fs::write(dir.join(BUILD_FILE), build_file).await?;

        let output = std::fs::File::create(dir.join(OUTPUT_FILE))?;
        let stderr = output.try_clone()?;

        let mut child = Command::new(&self.command)
            .args(["run", "--log-output=plain", "--target=publish", BUILD_FILE])
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(output))
            .stderr(Stdio::from(stderr))
            .spawn()?;

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(BuildError::Failed(status.code().unwrap_or(-1))),
            Ok(Err(err)) => Err(BuildError::Io(err)),
            Err(_) => {
                let _ = child.kill().await;
                Err(BuildError::Timeout)
            }
        }
    }
}

impl BuildDispatcher for HlbBuilder {
    fn dispatch(&self, request: BuildRequest) {
        let builder = self.clone();
        tokio::spawn(async move { builder.run(request).await });
    }
}
