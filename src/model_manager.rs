use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use candle_core::{Device, Tensor};
use pylate_rs::ColBERT;

use crate::{
    embedding::{EmbeddingProvider, check_batch},
    error::{Error, ProviderErrorKind, Result},
    similarity::normalize,
    store::run_bounded,
};

pub const DEFAULT_MODEL_ID: &str = "lightonai/GTE-ModernColBERT-v1";
pub const MODEL_ENV_VAR: &str = "LITVEC_MODEL";

const BACKEND: &str = "local";

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

/// In-process ColBERT model used as a single-vector embedder.
///
/// ColBERT emits one vector per token; those are mean-pooled and
/// L2-normalised so every text maps to one vector of the model's hidden
/// size.
pub struct ModelManager {
    model: Arc<Mutex<ColBERT>>,
    model_id: String,
    tag: String,
    timeout: Duration,
}

impl ModelManager {
    /// Load `model_id` (a HuggingFace id or local path) right away, so a bad
    /// id fails here rather than on the first embedding call.
    ///
    /// Loading may download weights; it and every later `embed` call give
    /// up after `timeout`.
    pub fn load(model_id: String, timeout: Duration) -> Result<Self> {
        Self::load_with(model_id, timeout, |id| {
            let colbert: ColBERT = ColBERT::from(id)
                .with_device(default_device())
                .try_into()
                .map_err(|e| {
                    Error::Config(format!("cannot load model '{id}': {e}"))
                })?;
            Ok(colbert)
        })
    }

    fn load_with<F>(
        model_id: String,
        timeout: Duration,
        loader: F,
    ) -> Result<Self>
    where
        F: FnOnce(&str) -> Result<ColBERT> + Send + 'static,
    {
        if model_id.trim().is_empty() {
            return Err(Error::Config("local model id is empty".into()));
        }

        let id = model_id.clone();
        let colbert = run_bounded("model load", timeout, move || loader(&id))
            .map_err(worker_error)?;

        tracing::info!(model = %model_id, "loaded local embedding model");
        Ok(Self {
            model: Arc::new(Mutex::new(colbert)),
            tag: format!("colbert:{model_id}"),
            model_id,
            timeout,
        })
    }

    /// Returns the model ID that was loaded.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

fn encode(model: &Mutex<ColBERT>, texts: &[String]) -> Result<Tensor> {
    let mut model = model.lock().map_err(|_| {
        Error::provider(
            BACKEND,
            ProviderErrorKind::Backend,
            "model lock poisoned",
        )
    })?;
    model.encode(texts, false).map_err(|e| {
        Error::provider(
            BACKEND,
            ProviderErrorKind::MalformedInput,
            e.to_string(),
        )
    })
}

/// A worker that died without answering is a backend failure here, not a
/// store one.
fn worker_error(err: Error) -> Error {
    match err {
        Error::Store(message) => {
            Error::provider(BACKEND, ProviderErrorKind::Backend, message)
        }
        other => other,
    }
}

/// Mean-pool a `[batch, tokens, dim]` tensor into normalised row vectors.
fn pool(embeddings: &Tensor) -> Result<Vec<Vec<f32>>> {
    let mut rows = embeddings
        .mean(1)
        .and_then(|pooled| pooled.to_vec2::<f32>())
        .map_err(map_candle_err)?;
    rows.iter_mut().for_each(|row| normalize(row));
    Ok(rows)
}

fn map_candle_err(e: candle_core::Error) -> Error {
    Error::provider(
        BACKEND,
        ProviderErrorKind::Backend,
        format!("unexpected embedding tensor: {e}"),
    )
}

impl EmbeddingProvider for ModelManager {
    fn model_tag(&self) -> &str {
        &self.tag
    }

    fn dimension(&self) -> Option<usize> {
        None
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = Arc::clone(&self.model);
        let batch = texts.to_vec();
        let vectors = run_bounded("local embedding", self.timeout, move || {
            pool(&encode(&model, &batch)?)
        })
        .map_err(worker_error)?;
        check_batch(BACKEND, texts.len(), &vectors)?;
        Ok(vectors)
    }
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("model_id", &self.model_id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
