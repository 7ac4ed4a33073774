//! Model loading for ONNX Runtime
//!
//! Reads model files, verifies optional checksums and picks the compute device
//! once per session.

use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider};
use ort::session::{builder::GraphOptimizationLevel, Session};
use parking_lot::{Mutex, MutexGuard};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::error::ModelLoadError;

/// Compute device a session runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cuda,
    Cpu,
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cuda => write!(f, "CUDA"),
            Device::Cpu => write!(f, "CPU"),
        }
    }
}

/// Decide the device for a new session
pub fn select_device(use_gpu: bool) -> Device {
    if !use_gpu {
        return Device::Cpu;
    }

    match CUDAExecutionProvider::default().is_available() {
        Ok(true) => {
            info!("CUDA available - using GPU for inference");
            Device::Cuda
        }
        Ok(false) => {
            info!("GPU not available - falling back to CPU for inference");
            Device::Cpu
        }
        Err(e) => {
            warn!("Could not query CUDA availability, using CPU: {}", e);
            Device::Cpu
        }
    }
}

/// SHA-256 of a byte buffer as lowercase hex
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Read a model file and check it against an expected SHA-256, if one is given
pub fn read_model_file(path: &Path, expected_sha256: Option<&str>) -> Result<Vec<u8>, ModelLoadError> {
    let bytes = std::fs::read(path).map_err(|source| ModelLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    if let Some(expected) = expected_sha256 {
        let actual = sha256_hex(&bytes);
        if !actual.eq_ignore_ascii_case(expected.trim()) {
            return Err(ModelLoadError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected: expected.to_string(),
                actual,
            });
        }
        info!("Checksum verified for {:?}", path);
    }

    Ok(bytes)
}

/// ONNX Runtime session wrapper.
///
/// `Session::run` needs exclusive access, so the session sits behind a mutex and
/// concurrent callers take turns.
pub struct OnnxSession {
    session: Mutex<Session>,
    path: PathBuf,
    device: Device,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl std::fmt::Debug for OnnxSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxSession")
            .field("path", &self.path)
            .field("device", &self.device)
            .field("input_names", &self.input_names)
            .field("output_names", &self.output_names)
            .finish_non_exhaustive()
    }
}

impl OnnxSession {
    /// Load a session from a model file
    pub fn load(
        model_path: &Path,
        expected_sha256: Option<&str>,
        runtime: &RuntimeConfig,
    ) -> Result<Self, ModelLoadError> {
        info!("Loading ONNX model from {:?}", model_path);

        let bytes = read_model_file(model_path, expected_sha256)?;
        let device = select_device(runtime.use_gpu);

        let runtime_err = |source: ort::Error| ModelLoadError::Runtime {
            path: model_path.to_path_buf(),
            source,
        };

        let builder = Session::builder()
            .map_err(runtime_err)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(runtime_err)?
            .with_intra_threads(runtime.intra_threads)
            .map_err(runtime_err)?;

        let builder = match device {
            Device::Cuda => builder
                .with_execution_providers([CUDAExecutionProvider::default().build()])
                .map_err(runtime_err)?,
            Device::Cpu => builder
                .with_execution_providers([CPUExecutionProvider::default().build()])
                .map_err(runtime_err)?,
        };

        let session = builder.commit_from_memory(&bytes).map_err(runtime_err)?;

        let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();

        debug!(
            "Model loaded on {}. Inputs: {:?}, Outputs: {:?}",
            device, input_names, output_names
        );

        Ok(Self {
            session: Mutex::new(session),
            path: model_path.to_path_buf(),
            device,
            input_names,
            output_names,
        })
    }

    /// Exclusive access to the session for one inference call
    pub fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    /// Fail with `InvalidModel` unless the session exposes the named input
    pub fn require_input(&self, name: &str) -> Result<(), ModelLoadError> {
        if self.input_names.iter().any(|n| n == name) {
            Ok(())
        } else {
            Err(ModelLoadError::InvalidModel {
                path: self.path.clone(),
                reason: format!("missing input '{}' (has {:?})", name, self.input_names),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_cpu_when_gpu_disabled() {
        assert_eq!(select_device(false), Device::Cpu);
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_read_model_file_checks_sha256() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();

        let ok = read_model_file(
            file.path(),
            Some("BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD"),
        );
        assert_eq!(ok.unwrap(), b"abc");

        let err = read_model_file(file.path(), Some("deadbeef")).unwrap_err();
        assert!(matches!(err, ModelLoadError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_missing_model_file_is_io_error() {
        let err = read_model_file(Path::new("/nonexistent/model.onnx"), None).unwrap_err();
        assert!(matches!(err, ModelLoadError::Io { .. }));
    }

    #[test]
    fn test_session_load_fails_for_missing_file() {
        let err = OnnxSession::load(
            Path::new("/nonexistent/display.onnx"),
            None,
            &RuntimeConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ModelLoadError::Io { .. }));
    }
}
