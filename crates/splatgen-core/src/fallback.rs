//! Prediction with backend fallback.
//!
//! Some accelerators reject a model only when it runs, so a failed
//! prediction is retried on the next backend in a fixed order. The controller
//! owns at most one loaded session and replaces it wholesale when the backend
//! changes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use splatgen_inference::{
    BackendPreference, InferenceError, InferenceSession, NamedInputs, NamedOutputs, SessionLoader,
};
use tokio::task::{spawn_blocking, JoinError};
use tracing::{debug, info, warn};

use crate::device::DeviceClass;
use crate::error::{Result, SplatError};

/// Backend selection as configured by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComputeMode {
    /// Platform default order.
    #[default]
    Auto,
    NeuralEngineAndCpu,
    AllAvailable,
    CpuOnly,
}

impl ComputeMode {
    /// Ordered backend candidates for a device class.
    ///
    /// An explicit backend still falls back to CPU.
    pub fn candidates(self, class: DeviceClass) -> Vec<BackendPreference> {
        let preferred = match self {
            ComputeMode::Auto => {
                return match class {
                    DeviceClass::MemoryConstrained => vec![
                        BackendPreference::NeuralEngineAndCpu,
                        BackendPreference::AllAvailable,
                        BackendPreference::CpuOnly,
                    ],
                    DeviceClass::Desktop => {
                        vec![BackendPreference::AllAvailable, BackendPreference::CpuOnly]
                    }
                };
            }
            ComputeMode::NeuralEngineAndCpu => BackendPreference::NeuralEngineAndCpu,
            ComputeMode::AllAvailable => BackendPreference::AllAvailable,
            ComputeMode::CpuOnly => BackendPreference::CpuOnly,
        };

        if preferred == BackendPreference::CpuOnly {
            vec![preferred]
        } else {
            vec![preferred, BackendPreference::CpuOnly]
        }
    }
}

impl std::str::FromStr for ComputeMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "auto" => Ok(ComputeMode::Auto),
            "neural-engine-and-cpu" => Ok(ComputeMode::NeuralEngineAndCpu),
            "all-available" => Ok(ComputeMode::AllAvailable),
            "cpu-only" => Ok(ComputeMode::CpuOnly),
            other => Err(format!("unknown compute mode '{other}'")),
        }
    }
}

/// Where the controller is in its attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackState {
    Idle,
    Attempting(BackendPreference),
    Succeeded(BackendPreference),
    ExhaustedFailed,
}

/// Runs predictions across an ordered list of backends.
pub struct BackendFallbackController {
    loader: Arc<dyn SessionLoader>,
    session: Option<Box<dyn InferenceSession>>,
    /// Path the loaded session was created from.
    loaded_from: Option<PathBuf>,
    state: FallbackState,
}

impl BackendFallbackController {
    pub fn new(loader: Arc<dyn SessionLoader>) -> Self {
        Self {
            loader,
            session: None,
            loaded_from: None,
            state: FallbackState::Idle,
        }
    }

    pub fn state(&self) -> FallbackState {
        self.state
    }

    /// Currently loaded session, if any.
    pub fn session(&self) -> Option<&dyn InferenceSession> {
        self.session.as_deref()
    }

    /// Backend of the loaded session.
    pub fn loaded_backend(&self) -> Option<BackendPreference> {
        self.session.as_ref().map(|s| s.backend())
    }

    /// Release the loaded session.
    pub fn unload(&mut self) {
        if self.session.take().is_some() {
            debug!("Released inference session");
        }
        self.loaded_from = None;
        self.state = FallbackState::Idle;
    }

    /// Load `model_path` for `backend`, reusing the current session when it
    /// was loaded from the same path with exactly that backend.
    pub async fn ensure_loaded(
        &mut self,
        model_path: &Path,
        backend: BackendPreference,
    ) -> std::result::Result<&dyn InferenceSession, InferenceError> {
        let reusable = self.loaded_backend() == Some(backend)
            && self.loaded_from.as_deref() == Some(model_path);

        if !reusable {
            self.unload();
            info!("Loading model {} with backend {}", model_path.display(), backend);

            let loader = Arc::clone(&self.loader);
            let path = model_path.to_path_buf();
            let session = spawn_blocking(move || loader.load(&path, backend))
                .await
                .map_err(worker_failed)??;

            self.session = Some(session);
            self.loaded_from = Some(model_path.to_path_buf());
        }

        self.session
            .as_deref()
            .ok_or_else(|| InferenceError::SessionCreate("session not loaded".into()))
    }

    /// Predict, trying each candidate backend in order.
    ///
    /// A failed load or prediction discards the session before moving on.
    /// When every candidate fails the last error is returned inside
    /// [`SplatError::PredictionFailed`].
    pub async fn predict(
        &mut self,
        model_path: &Path,
        candidates: &[BackendPreference],
        inputs: Arc<NamedInputs>,
    ) -> Result<NamedOutputs> {
        let mut attempts = Vec::with_capacity(candidates.len());
        let mut last_error = InferenceError::NoBackendCandidates;

        for &backend in candidates {
            self.state = FallbackState::Attempting(backend);
            attempts.push(backend);

            match self.attempt(model_path, backend, Arc::clone(&inputs)).await {
                Ok(outputs) => {
                    info!("Prediction succeeded on {}", backend);
                    self.state = FallbackState::Succeeded(backend);
                    return Ok(outputs);
                }
                Err(e) => {
                    warn!("Prediction failed on {}: {}", backend, e);
                    self.unload();
                    last_error = e;
                }
            }
        }

        self.state = FallbackState::ExhaustedFailed;
        Err(SplatError::PredictionFailed {
            attempts,
            source: last_error,
        })
    }

    async fn attempt(
        &mut self,
        model_path: &Path,
        backend: BackendPreference,
        inputs: Arc<NamedInputs>,
    ) -> std::result::Result<NamedOutputs, InferenceError> {
        self.ensure_loaded(model_path, backend).await?;

        let session = self
            .session
            .take()
            .ok_or_else(|| InferenceError::SessionCreate("session not loaded".into()))?;

        // The session moves to the blocking pool and comes back with the
        // result; a panicking predict loses it.
        let (session, result) = spawn_blocking(move || {
            let result = session.predict(&inputs);
            (session, result)
        })
        .await
        .map_err(worker_failed)?;

        self.session = Some(session);
        result
    }
}

fn worker_failed(e: JoinError) -> InferenceError {
    InferenceError::InferenceFailed(format!("inference worker failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Outcome, ScriptedLoader};
    use pretty_assertions::assert_eq;

    use BackendPreference::{AllAvailable, CpuOnly, NeuralEngineAndCpu};

    fn model() -> PathBuf {
        PathBuf::from("model.onnx")
    }

    #[test]
    fn test_candidates() {
        assert_eq!(
            ComputeMode::Auto.candidates(DeviceClass::MemoryConstrained),
            vec![NeuralEngineAndCpu, AllAvailable, CpuOnly]
        );
        assert_eq!(
            ComputeMode::Auto.candidates(DeviceClass::Desktop),
            vec![AllAvailable, CpuOnly]
        );
        assert_eq!(
            ComputeMode::NeuralEngineAndCpu.candidates(DeviceClass::Desktop),
            vec![NeuralEngineAndCpu, CpuOnly]
        );
        assert_eq!(ComputeMode::CpuOnly.candidates(DeviceClass::MemoryConstrained), vec![CpuOnly]);
    }

    #[test]
    fn test_compute_mode_from_str() {
        assert_eq!("cpu-only".parse::<ComputeMode>().unwrap(), ComputeMode::CpuOnly);
        assert!("gpu".parse::<ComputeMode>().is_err());
    }

    #[tokio::test]
    async fn test_third_candidate_succeeds() {
        let loader = Arc::new(
            ScriptedLoader::new(4)
                .with(NeuralEngineAndCpu, Outcome::FailPredict)
                .with(AllAvailable, Outcome::FailLoad)
                .with(CpuOnly, Outcome::Succeed),
        );
        let mut controller = BackendFallbackController::new(loader.clone());

        let outputs = controller
            .predict(&model(), &[NeuralEngineAndCpu, AllAvailable, CpuOnly], Arc::new(Vec::new()))
            .await
            .unwrap();

        assert_eq!(outputs.len(), 5);
        assert_eq!(loader.loads(), vec![NeuralEngineAndCpu, AllAvailable, CpuOnly]);
        assert_eq!(loader.predictions(), vec![NeuralEngineAndCpu, CpuOnly]);
        // The failed neural-engine session was dropped before moving on.
        assert_eq!(loader.dropped(), 1);
        assert_eq!(controller.state(), FallbackState::Succeeded(CpuOnly));
        assert_eq!(controller.loaded_backend(), Some(CpuOnly));
    }

    #[tokio::test]
    async fn test_all_candidates_fail() {
        let loader = Arc::new(
            ScriptedLoader::new(4)
                .with(NeuralEngineAndCpu, Outcome::FailPredict)
                .with(AllAvailable, Outcome::FailPredict)
                .with(CpuOnly, Outcome::FailLoad),
        );
        let mut controller = BackendFallbackController::new(loader.clone());

        let err = controller
            .predict(&model(), &[NeuralEngineAndCpu, AllAvailable, CpuOnly], Arc::new(Vec::new()))
            .await
            .unwrap_err();

        match err {
            SplatError::PredictionFailed { attempts, source } => {
                assert_eq!(attempts, vec![NeuralEngineAndCpu, AllAvailable, CpuOnly]);
                assert!(source.to_string().contains("cpu-only"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(controller.state(), FallbackState::ExhaustedFailed);
        assert!(controller.session().is_none());
        assert_eq!(loader.dropped(), 2);
    }

    #[tokio::test]
    async fn test_no_candidates() {
        let loader = Arc::new(ScriptedLoader::new(1));
        let mut controller = BackendFallbackController::new(loader);

        let err = controller
            .predict(&model(), &[], Arc::new(Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SplatError::PredictionFailed {
                source: InferenceError::NoBackendCandidates,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_session_reused_for_same_backend() {
        let loader = Arc::new(ScriptedLoader::new(2));
        let mut controller = BackendFallbackController::new(loader.clone());

        controller.ensure_loaded(&model(), AllAvailable).await.unwrap();
        controller
            .predict(&model(), &[AllAvailable], Arc::new(Vec::new()))
            .await
            .unwrap();
        controller
            .predict(&model(), &[AllAvailable], Arc::new(Vec::new()))
            .await
            .unwrap();

        assert_eq!(loader.loads(), vec![AllAvailable]);
        assert_eq!(loader.predictions(), vec![AllAvailable, AllAvailable]);

        controller.ensure_loaded(&model(), CpuOnly).await.unwrap();
        assert_eq!(loader.loads(), vec![AllAvailable, CpuOnly]);
        assert_eq!(loader.dropped(), 1);

        controller.unload();
        assert!(controller.session().is_none());
        assert_eq!(loader.dropped(), 2);
        assert_eq!(controller.state(), FallbackState::Idle);
    }
}
