//! Provider-specific configuration and detection.
//!
//! Hosted completion APIs mostly speak the `OpenAI` Chat Completions dialect,
//! but differ in URL layout and in how the credential is presented.

/// Default Azure `OpenAI` API version.
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-08-01-preview";

/// Supported LLM providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    /// `OpenAI` (api.openai.com)
    OpenAI,
    /// Azure `OpenAI` Service
    AzureOpenAI {
        /// Deployment name (required for Azure)
        deployment_name: String,
        /// API version (e.g., "2024-08-01-preview")
        api_version: String,
    },
    /// `OpenRouter` (openrouter.ai), served under `/api/v1`
    OpenRouter,
    /// Groq (groq.com), served under `/openai/v1`
    Groq,
    /// Generic OpenAI-compatible provider (Together, vLLM, Ollama, ...)
    Generic,
}

/// How the API key is attached to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `api-key: <key>` (Azure)
    ApiKeyHeader,
}

impl Provider {
    /// Detect provider from base URL.
    ///
    /// # Example
    ///
    /// ```rust
    /// use chat_relay::llm::Provider;
    ///
    /// let provider = Provider::detect_from_url("https://api.openai.com");
    /// assert_eq!(provider, Provider::OpenAI);
    /// ```
    #[must_use]
    pub fn detect_from_url(base_url: &str) -> Self {
        let lower = base_url.to_lowercase();

        if lower.contains("azure.com") {
            Self::AzureOpenAI {
                deployment_name: String::new(),
                api_version: DEFAULT_AZURE_API_VERSION.to_string(),
            }
        } else if lower.contains("openrouter.ai") {
            Self::OpenRouter
        } else if lower.contains("groq.com") {
            Self::Groq
        } else if lower.contains("openai.com") {
            Self::OpenAI
        } else {
            Self::Generic
        }
    }

    /// Fill in Azure deployment details. Other providers are returned unchanged.
    #[must_use]
    pub fn with_azure_deployment(self, deployment: Option<String>, api_version: Option<String>) -> Self {
        match self {
            Self::AzureOpenAI {
                deployment_name,
                api_version: detected_version,
            } => Self::AzureOpenAI {
                deployment_name: deployment.unwrap_or(deployment_name),
                api_version: api_version.unwrap_or(detected_version),
            },
            other => other,
        }
    }

    /// Build the chat completions URL for this provider.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL (trailing slash tolerated). A base that
    ///   already ends in `/v1` is used as the API root as-is.
    /// * `model` - The model name (unused for Azure, which uses deployment name)
    #[must_use]
    pub fn build_chat_url(&self, base_url: &str, _model: &str) -> String {
        let base = base_url.trim_end_matches('/');

        if !matches!(self, Self::AzureOpenAI { .. }) && base.ends_with("/v1") {
            return format!("{base}/chat/completions");
        }

        match self {
            Self::AzureOpenAI {
                deployment_name,
                api_version,
            } => {
                format!(
                    "{base}/openai/deployments/{deployment_name}/chat/completions?api-version={api_version}"
                )
            }
            Self::OpenRouter => format!("{base}/api/v1/chat/completions"),
            Self::Groq => format!("{base}/openai/v1/chat/completions"),
            Self::OpenAI | Self::Generic => format!("{base}/v1/chat/completions"),
        }
    }

    /// Credential scheme expected by this provider.
    #[must_use]
    pub fn auth_scheme(&self) -> AuthScheme {
        match self {
            Self::AzureOpenAI { .. } => AuthScheme::ApiKeyHeader,
            _ => AuthScheme::Bearer,
        }
    }
}
