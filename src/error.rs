use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScanError>;

/// ARM error codes that mean "this subscription cannot serve this resource
/// type", not "the scan is broken".
pub const SKIPPABLE_CODES: &[&str] = &[
    "MissingRegistrationForResourceProvider",
    "MissingSubscriptionRegistration",
    "DisallowedOperation",
];

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Scan cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Filter error: {0}")]
    Filter(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Unknown scanner '{key}'{}", suggestion_hint(.suggestion))]
    UnknownScanner {
        key: String,
        suggestion: Option<String>,
    },

    #[error("Output error: {0}")]
    Output(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn suggestion_hint(suggestion: &Option<String>) -> String {
    suggestion
        .as_ref()
        .map(|s| format!(" (did you mean '{s}'?)"))
        .unwrap_or_default()
}

impl ScanError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_)
            | Self::Filter(_)
            | Self::Credential(_)
            | Self::UnknownScanner { .. }
            | Self::Yaml(_)
            | Self::Toml(_) => 2,
            Self::Cancelled => 3,
            _ => 1,
        }
    }

    /// Whether the error carries one of the benign ARM codes.
    pub fn should_skip(&self) -> bool {
        match self {
            Self::Upstream(e) => e.is_skippable(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A failed upstream call, as reported by the ARM response envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("HTTP {status} from {target}: {code}: {message}")]
    Response {
        status: u16,
        code: String,
        message: String,
        target: String,
    },

    #[error("transport failure calling {target}: {message}")]
    Transport { target: String, message: String },

    #[error("could not decode response from {target}: {message}")]
    Decode { target: String, message: String },
}

impl UpstreamError {
    pub fn response(status: u16, code: impl Into<String>, target: impl Into<String>) -> Self {
        let code = code.into();
        Self::Response {
            status,
            message: code.clone(),
            code,
            target: target.into(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Response { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Response { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_skippable(&self) -> bool {
        self.code()
            .map(|c| SKIPPABLE_CODES.contains(&c))
            .unwrap_or(false)
    }
}
