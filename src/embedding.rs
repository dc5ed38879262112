use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, ProviderErrorKind, Result},
    hashing::HashingEmbedder,
    hosted::HostedEmbedder,
    model_manager::{self, ModelManager},
};

pub const DEFAULT_EMBEDDING_TIMEOUT: Duration = Duration::from_secs(30);

/// Turns text into fixed-length vectors.
///
/// Implementations are chosen once, at construction, and callers only ever
/// see this trait.
pub trait EmbeddingProvider: Send + Sync {
    /// Tag recorded on collections created with this provider, e.g.
    /// `openai:text-embedding-3-small`.
    fn model_tag(&self) -> &str;

    /// Vector length, when it is known without calling the backend.
    fn dimension(&self) -> Option<usize>;

    /// Embed `texts`, returning one vector per input in input order.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()])?;
        match vectors.pop() {
            Some(vector) if vectors.is_empty() => Ok(vector),
            _ => Err(Error::provider(
                "embedding",
                ProviderErrorKind::Backend,
                "expected exactly one vector for a single query",
            )),
        }
    }
}

/// Which backend serves embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Hosted OpenAI-compatible API.
    OpenAi,
    /// Azure OpenAI deployment.
    Azure,
    /// ColBERT model loaded in-process.
    Local,
    /// Deterministic feature hashing, no network or model.
    Hashing,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::OpenAi => "openai",
            Backend::Azure => "azure",
            Backend::Local => "local",
            Backend::Hashing => "hashing",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Backend::OpenAi),
            "azure" | "azure-openai" => Ok(Backend::Azure),
            "local" | "colbert" => Ok(Backend::Local),
            "hashing" => Ok(Backend::Hashing),
            other => Err(Error::Config(format!(
                "unknown embedding backend '{other}' \
                 (expected openai, azure, local or hashing)"
            ))),
        }
    }
}

/// Everything needed to construct a provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub backend: Backend,
    /// Model (or Azure deployment) name. Each backend has a default.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    /// API key. Falls back to the backend's environment variable.
    #[serde(default, skip_serializing)]
    pub credentials: Option<String>,
    /// Requested output size, for backends that support choosing it.
    #[serde(default)]
    pub dimensions: Option<usize>,
    #[serde(default = "default_timeout", with = "secs")]
    pub timeout: Duration,
}

fn default_timeout() -> Duration {
    DEFAULT_EMBEDDING_TIMEOUT
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        d: &Duration,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

impl EmbeddingConfig {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            model: None,
            endpoint: None,
            api_version: None,
            credentials: None,
            dimensions: None,
            timeout: DEFAULT_EMBEDDING_TIMEOUT,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

impl fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("backend", &self.backend)
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("api_version", &self.api_version)
            .field(
                "credentials",
                &self.credentials.as_ref().map(|_| "<redacted>"),
            )
            .field("dimensions", &self.dimensions)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Build the provider described by `config`, validating it up front.
pub fn build_provider(
    config: &EmbeddingConfig,
) -> Result<Box<dyn EmbeddingProvider>> {
    if config.timeout.is_zero() {
        return Err(Error::Config("embedding timeout must be non-zero".into()));
    }
    if config.dimensions == Some(0) {
        return Err(Error::Config(
            "embedding dimensions must be positive".into(),
        ));
    }

    let provider: Box<dyn EmbeddingProvider> = match config.backend {
        Backend::OpenAi => Box::new(HostedEmbedder::openai(config)?),
        Backend::Azure => Box::new(HostedEmbedder::azure(config)?),
        Backend::Local => {
            let model_id = config
                .model
                .clone()
                .or_else(|| std::env::var(model_manager::MODEL_ENV_VAR).ok())
                .unwrap_or_else(|| model_manager::DEFAULT_MODEL_ID.into());
            Box::new(ModelManager::load(model_id, config.timeout)?)
        }
        Backend::Hashing => Box::new(HashingEmbedder::new(
            config
                .dimensions
                .unwrap_or(crate::hashing::DEFAULT_DIMENSION),
        )?),
    };

    tracing::debug!(
        backend = %config.backend,
        model = provider.model_tag(),
        "embedding provider ready"
    );
    Ok(provider)
}

/// Check a batch response against the request it answers.
pub(crate) fn check_batch(
    backend: &'static str,
    requested: usize,
    vectors: &[Vec<f32>],
) -> Result<()> {
    if vectors.len() != requested {
        return Err(Error::provider(
            backend,
            ProviderErrorKind::Backend,
            format!(
                "requested {requested} embeddings, received {}",
                vectors.len()
            ),
        ));
    }
    if let Some(first) = vectors.first()
        && vectors.iter().any(|v| v.len() != first.len())
    {
        return Err(Error::provider(
            backend,
            ProviderErrorKind::Backend,
            "embeddings in one response have different lengths",
        ));
    }
    Ok(())
}
