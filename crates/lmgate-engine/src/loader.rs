//! Engine construction with backend fallback.
//!
//! GPU initialization is the one failure with an automatic recovery: it is
//! retried on CPU exactly once. Everything else propagates. Construction is
//! bounded by a timeout; a runtime that cannot come up in that window is a
//! fatal initialization error.

use std::path::Path;
use std::time::Duration;

use tracing::warn;

use lmgate_core::error::EngineError;
use lmgate_core::ports::{Engine, EngineBackend, EngineConfig, EngineLoader};

/// Construct an engine, falling back from GPU to CPU once. Returns the
/// engine and the backend it actually came up on.
pub(crate) async fn load_engine(
    loader: &dyn EngineLoader,
    model_path: &Path,
    backend: EngineBackend,
    timeout: Duration,
) -> Result<(Box<dyn Engine>, EngineBackend), EngineError> {
    match load_once(loader, model_path, backend, timeout).await {
        Ok(engine) => Ok((engine, backend)),
        Err(e) if backend == EngineBackend::Gpu => {
            warn!(error = %e, "GPU engine initialization failed, retrying on CPU");
            let engine = load_once(loader, model_path, EngineBackend::Cpu, timeout).await?;
            Ok((engine, EngineBackend::Cpu))
        }
        Err(e) => Err(e),
    }
}

async fn load_once(
    loader: &dyn EngineLoader,
    model_path: &Path,
    backend: EngineBackend,
    timeout: Duration,
) -> Result<Box<dyn Engine>, EngineError> {
    let config = EngineConfig {
        model_path: model_path.to_path_buf(),
        backend,
        vision_backend: EngineBackend::Gpu,
        audio_backend: EngineBackend::Cpu,
    };
    tokio::time::timeout(timeout, loader.load(config))
        .await
        .map_err(|_| EngineError::LoadTimeout(timeout.as_secs()))?
}
