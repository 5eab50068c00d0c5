//! Intermediate audio inspection
//!
//! Lets operators capture the backend's raw answer and the resampled PCM of
//! a segment for offline listening. Failures here are logged and never
//! affect the segment.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::container;
use crate::types::RequestId;

/// Point in the pipeline an inspected buffer comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InspectStage {
    /// Response body exactly as received
    Response,
    /// Mono 16-bit PCM after resampling (little-endian)
    Resampled,
}

impl fmt::Display for InspectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Response => write!(f, "response"),
            Self::Resampled => write!(f, "resampled"),
        }
    }
}

/// Sink receiving intermediate buffers
pub trait AudioInspector: Send + Sync + fmt::Debug {
    /// Whether buffers should be collected for this sink at all
    fn enabled(&self) -> bool {
        true
    }

    /// Observe one buffer; `sample_rate` describes `Resampled` PCM
    fn inspect(&self, stage: InspectStage, request_id: &RequestId, bytes: &[u8], sample_rate: u32);
}

/// Inspector that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInspector;

impl AudioInspector for NoopInspector {
    fn enabled(&self) -> bool {
        false
    }

    fn inspect(&self, _stage: InspectStage, _request_id: &RequestId, _bytes: &[u8], _sample_rate: u32) {}
}

/// Inspector writing one file per stage into a directory
///
/// Files are named `<request_id>-<stage>.<ext>`. The resampled stage is
/// wrapped in a wave header so it can be played directly.
#[derive(Debug, Clone)]
pub struct DirectoryInspector {
    dir: PathBuf,
}

impl DirectoryInspector {
    /// Create an inspector writing into `dir` (created on first write)
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Target directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a stage of a request is written to
    #[must_use]
    pub fn path_for(&self, stage: InspectStage, request_id: &RequestId) -> PathBuf {
        let ext = match stage {
            InspectStage::Response => "bin",
            InspectStage::Resampled => "wav",
        };
        self.dir.join(format!("{request_id}-{stage}.{ext}"))
    }

    fn write(
        &self,
        stage: InspectStage,
        request_id: &RequestId,
        bytes: &[u8],
        sample_rate: u32,
    ) -> Result<PathBuf, String> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| format!("cannot create {}: {e}", self.dir.display()))?;

        let path = self.path_for(stage, request_id);
        let contents = match stage {
            InspectStage::Response => bytes.to_vec(),
            InspectStage::Resampled => {
                let samples: Vec<i16> = bytes
                    .chunks_exact(2)
                    .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                container::encode_wav(&samples, sample_rate).map_err(|e| e.to_string())?
            },
        };

        std::fs::write(&path, contents)
            .map_err(|e| format!("cannot write {}: {e}", path.display()))?;
        Ok(path)
    }
}

impl AudioInspector for DirectoryInspector {
    fn inspect(&self, stage: InspectStage, request_id: &RequestId, bytes: &[u8], sample_rate: u32) {
        match self.write(stage, request_id, bytes, sample_rate) {
            Ok(path) => debug!(%stage, path = %path.display(), len = bytes.len(), "Wrote audio dump"),
            Err(e) => warn!(%stage, %request_id, error = %e, "Audio dump failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::container::ContainerAudio;

    #[test]
    fn stage_names() {
        assert_eq!(InspectStage::Response.to_string(), "response");
        assert_eq!(InspectStage::Resampled.to_string(), "resampled");
    }

    #[test]
    fn response_is_written_verbatim() {
        let dir = TempDir::new().unwrap();
        let inspector = DirectoryInspector::new(dir.path());
        let request_id = RequestId::generate();

        inspector.inspect(InspectStage::Response, &request_id, b"\xFF\xFBraw", 48_000);

        let path = inspector.path_for(InspectStage::Response, &request_id);
        assert!(path.ends_with(format!("{request_id}-response.bin")));
        assert_eq!(std::fs::read(path).unwrap(), b"\xFF\xFBraw");
    }

    #[test]
    fn resampled_pcm_is_wrapped_as_wave() {
        let dir = TempDir::new().unwrap();
        let inspector = DirectoryInspector::new(dir.path().join("nested"));
        let request_id = RequestId::generate();
        let pcm: Vec<u8> = [100i16, -100, 0].iter().flat_map(|s| s.to_le_bytes()).collect();

        inspector.inspect(InspectStage::Resampled, &request_id, &pcm, 24_000);

        let bytes = std::fs::read(inspector.path_for(InspectStage::Resampled, &request_id)).unwrap();
        let audio = ContainerAudio::parse(&bytes).unwrap();
        assert_eq!(audio.spec().sample_rate, 24_000);
        assert_eq!(audio.frames(), 3);
    }

    #[test]
    fn unwritable_directory_is_only_logged() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let inspector = DirectoryInspector::new(blocker.join("sub"));
        inspector.inspect(InspectStage::Response, &RequestId::generate(), b"abc", 48_000);

        assert!(!blocker.join("sub").exists());
    }

    #[test]
    fn noop_accepts_anything() {
        assert!(!NoopInspector.enabled());
        assert!(DirectoryInspector::new("/tmp").enabled());
        NoopInspector.inspect(InspectStage::Resampled, &RequestId::generate(), &[], 48_000);
    }
}
