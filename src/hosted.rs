use std::time::Duration;

use reqwest::{
    StatusCode,
    Url,
    blocking::{Client, RequestBuilder},
};
use serde::{Deserialize, Serialize};

use crate::{
    embedding::{EmbeddingConfig, EmbeddingProvider, check_batch},
    error::{Error, ProviderErrorKind, Result},
};

pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const AZURE_API_KEY_ENV: &str = "AZURE_OPENAI_API_KEY";
pub const OPENAI_DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const OPENAI_DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Output sizes of the well-known OpenAI embedding models.
fn known_dimension(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
enum Flavor {
    OpenAi,
    Azure,
}

impl Flavor {
    fn name(self) -> &'static str {
        match self {
            Flavor::OpenAi => "openai",
            Flavor::Azure => "azure",
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// Client for the OpenAI embeddings API and Azure OpenAI deployments.
///
/// Both speak the same request/response shape; they differ in URL layout
/// and in how the key is sent.
pub struct HostedEmbedder {
    flavor: Flavor,
    client: Client,
    url: Url,
    model: String,
    api_key: String,
    dimensions: Option<usize>,
    timeout: Duration,
    tag: String,
}

impl HostedEmbedder {
    /// Hosted OpenAI backend. Requires an API key in the config or in
    /// `OPENAI_API_KEY`.
    pub fn openai(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| OPENAI_DEFAULT_MODEL.to_string());
        let endpoint = config
            .endpoint
            .as_deref()
            .unwrap_or(OPENAI_DEFAULT_ENDPOINT);
        let url = parse_endpoint(endpoint, "embeddings")?;
        let api_key = resolve_key(config, OPENAI_API_KEY_ENV, "openai")?;

        Self::build(Flavor::OpenAi, config, url, model, api_key)
    }

    /// Azure OpenAI backend. `model` names the deployment; endpoint and
    /// api_version are required.
    pub fn azure(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            Error::Config("azure embeddings need a deployment name".into())
        })?;
        let endpoint = config.endpoint.as_deref().ok_or_else(|| {
            Error::Config("azure embeddings need an endpoint".into())
        })?;
        let api_version = config.api_version.as_deref().ok_or_else(|| {
            Error::Config("azure embeddings need an api_version".into())
        })?;

        let mut url = parse_endpoint(
            endpoint,
            &format!("openai/deployments/{model}/embeddings"),
        )?;
        url.query_pairs_mut().append_pair("api-version", api_version);
        let api_key = resolve_key(config, AZURE_API_KEY_ENV, "azure")?;

        Self::build(Flavor::Azure, config, url, model, api_key)
    }

    fn build(
        flavor: Flavor,
        config: &EmbeddingConfig,
        url: Url,
        model: String,
        api_key: String,
    ) -> Result<Self> {
        if model.trim().is_empty() {
            return Err(Error::Config("embedding model name is empty".into()));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| {
                Error::Config(format!("cannot build HTTP client: {e}"))
            })?;

        Ok(Self {
            tag: format!("{}:{model}", flavor.name()),
            flavor,
            client,
            url,
            model,
            api_key,
            dimensions: config.dimensions,
            timeout: config.timeout,
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.flavor {
            Flavor::OpenAi => request.bearer_auth(&self.api_key),
            Flavor::Azure => request.header("api-key", &self.api_key),
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                operation: "embedding request",
                after: self.timeout,
            }
        } else {
            Error::provider(
                self.flavor.name(),
                ProviderErrorKind::Backend,
                err.to_string(),
            )
        }
    }

    fn request_body<'a>(&'a self, texts: &'a [String]) -> EmbeddingRequest<'a> {
        EmbeddingRequest {
            // Azure takes the model from the deployment in the URL.
            model: match self.flavor {
                Flavor::OpenAi => Some(self.model.as_str()),
                Flavor::Azure => None,
            },
            input: texts,
            dimensions: self.dimensions,
        }
    }
}

impl EmbeddingProvider for HostedEmbedder {
    fn model_tag(&self) -> &str {
        &self.tag
    }

    fn dimension(&self) -> Option<usize> {
        self.dimensions.or_else(|| known_dimension(&self.model))
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let backend = self.flavor.name();

        let response = self
            .authorize(self.client.post(self.url.clone()))
            .json(&self.request_body(texts))
            .send()
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::provider(
                backend,
                classify_status(status),
                format!("HTTP {status}: {}", body.trim()),
            ));
        }

        let parsed: EmbeddingResponse =
            response.json().map_err(|e| self.transport_error(e))?;
        let vectors = into_ordered(backend, parsed, texts.len())?;
        check_batch(backend, texts.len(), &vectors)?;
        Ok(vectors)
    }
}

fn parse_endpoint(endpoint: &str, path: &str) -> Result<Url> {
    let mut base = Url::parse(endpoint).map_err(|e| {
        Error::Config(format!("invalid embedding endpoint '{endpoint}': {e}"))
    })?;
    if !matches!(base.scheme(), "http" | "https") {
        return Err(Error::Config(format!(
            "embedding endpoint must be http(s): '{endpoint}'"
        )));
    }
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path).map_err(|e| {
        Error::Config(format!("invalid embedding endpoint '{endpoint}': {e}"))
    })
}

fn resolve_key(
    config: &EmbeddingConfig,
    env_var: &str,
    backend: &str,
) -> Result<String> {
    config
        .credentials
        .clone()
        .or_else(|| std::env::var(env_var).ok())
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| {
            Error::Config(format!(
                "{backend} embeddings need an API key (set {env_var})"
            ))
        })
}

fn classify_status(status: StatusCode) -> ProviderErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderErrorKind::Auth
        }
        StatusCode::TOO_MANY_REQUESTS => ProviderErrorKind::RateLimit,
        StatusCode::BAD_REQUEST
        | StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::UNPROCESSABLE_ENTITY => ProviderErrorKind::MalformedInput,
        _ => ProviderErrorKind::Backend,
    }
}

/// Place each embedding at the index the API reports for it.
fn into_ordered(
    backend: &'static str,
    response: EmbeddingResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for datum in response.data {
        let slot = slots.get_mut(datum.index).ok_or_else(|| {
            Error::provider(
                backend,
                ProviderErrorKind::Backend,
                format!("embedding index {} out of range", datum.index),
            )
        })?;
        if slot.replace(datum.embedding).is_some() {
            return Err(Error::provider(
                backend,
                ProviderErrorKind::Backend,
                format!("duplicate embedding index {}", datum.index),
            ));
        }
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| {
            slot.ok_or_else(|| {
                Error::provider(
                    backend,
                    ProviderErrorKind::Backend,
                    format!("missing embedding for input {i}"),
                )
            })
        })
        .collect()
}
