use std::time::Duration;
use thiserror::Error;

/// Coarse classification shared by every failure the pipeline can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InputInvalid,
    EndpointUnreachable,
    RateLimited,
    NetworkTransient,
    UpstreamDataInvalid,
    ModelInvocationFailed,
}

impl ErrorKind {
    /// Recoverable kinds are absorbed when a fallback path exists.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorKind::EndpointUnreachable | ErrorKind::RateLimited | ErrorKind::NetworkTransient
        )
    }

    /// Process exit status for a run that ended with this kind of failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::InputInvalid => 2,
            ErrorKind::EndpointUnreachable => 3,
            ErrorKind::RateLimited => 4,
            ErrorKind::NetworkTransient => 5,
            ErrorKind::UpstreamDataInvalid => 6,
            ErrorKind::ModelInvocationFailed => 7,
        }
    }

    /// Classify an error that bubbled up to the binary edge. Errors outside
    /// the domain enums (I/O, configuration) have no kind.
    pub fn of(error: &anyhow::Error) -> Option<Self> {
        if let Some(e) = error.downcast_ref::<AcquisitionError>() {
            Some(e.kind())
        } else if let Some(e) = error.downcast_ref::<AuditError>() {
            Some(e.kind())
        } else if let Some(e) = error.downcast_ref::<MonitorError>() {
            Some(e.kind())
        } else {
            error.downcast_ref::<RpcError>().map(RpcError::kind)
        }
    }
}

/// Failure of a single blockchain RPC call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RpcError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("rpc error: {0}")]
    Rpc(String),
}

impl RpcError {
    pub fn timed_out(after: Duration) -> Self {
        RpcError::Timeout(format!("no response within {:?}", after))
    }

    /// Classify a transport error message into a typed failure.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests")
        {
            RpcError::RateLimited(message)
        } else if lower.contains("timeout") || lower.contains("timed out") {
            RpcError::Timeout(message)
        } else if lower.contains("connection")
            || lower.contains("network")
            || lower.contains("dns")
            || lower.contains("error sending request")
            || lower.contains("unreachable")
        {
            RpcError::Network(message)
        } else {
            RpcError::Rpc(message)
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::Timeout(_) => ErrorKind::EndpointUnreachable,
            RpcError::RateLimited(_) => ErrorKind::RateLimited,
            RpcError::Network(_) | RpcError::Rpc(_) => ErrorKind::NetworkTransient,
        }
    }

    /// Short operator-facing explanation of the failure.
    pub fn user_message(&self) -> String {
        match self {
            RpcError::Timeout(_) => {
                "Connection timed out. The RPC endpoint may be congested or unreachable.".to_string()
            }
            RpcError::RateLimited(_) => {
                "Rate limit exceeded (429). Please wait a moment before retrying.".to_string()
            }
            RpcError::Network(_) => {
                "Network error. Check your internet connection and RPC URL configuration."
                    .to_string()
            }
            RpcError::Rpc(message) => format!("RPC error: {}", message),
        }
    }
}

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("Invalid contract address: {0}")]
    InvalidAddress(String),

    #[error("Address {0} is not a contract or does not exist on this network")]
    NotAContract(String),

    #[error("All RPC endpoints failed ({tried} tried). Please check your internet connection.")]
    AllEndpointsUnreachable { tried: usize },

    #[error("Failed to connect to the block explorer API: {0}")]
    ExplorerUnreachable(String),

    #[error("{}", rate_limit_message(.keyed))]
    ExplorerRateLimited { keyed: bool },

    #[error("Block explorer error: {0}")]
    ExplorerError(String),

    #[error("Contract source code is not verified on the block explorer")]
    SourceUnverified,

    #[error("Retrieved source code is empty")]
    EmptySource,
}

fn rate_limit_message(keyed: &bool) -> &'static str {
    if *keyed {
        "Block explorer rate limit exceeded. Check your API key."
    } else {
        "Block explorer rate limit exceeded. Please add a free API key or wait a moment."
    }
}

impl AcquisitionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AcquisitionError::InvalidAddress(_) => ErrorKind::InputInvalid,
            AcquisitionError::AllEndpointsUnreachable { .. } => ErrorKind::EndpointUnreachable,
            AcquisitionError::ExplorerUnreachable(_) => ErrorKind::NetworkTransient,
            AcquisitionError::ExplorerRateLimited { .. } => ErrorKind::RateLimited,
            AcquisitionError::NotAContract(_)
            | AcquisitionError::ExplorerError(_)
            | AcquisitionError::SourceUnverified
            | AcquisitionError::EmptySource => ErrorKind::UpstreamDataInvalid,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Invalid input: {0}")]
    InputInvalid(String),

    #[error("Model API key missing. Set GEMINI_API_KEY or configure [model].api_key")]
    MissingCredentials,

    #[error("Analysis engine failed: primary model ({primary}) and fallback model ({fallback}) both failed: {last_error}")]
    ModelInvocationFailed {
        primary: String,
        fallback: String,
        last_error: String,
    },

    #[error("Failed to parse analysis results: {reason}")]
    MalformedModelOutput { reason: String, raw: String },
}

impl AuditError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuditError::InputInvalid(_) | AuditError::MissingCredentials => ErrorKind::InputInvalid,
            AuditError::ModelInvocationFailed { .. } => ErrorKind::ModelInvocationFailed,
            AuditError::MalformedModelOutput { .. } => ErrorKind::UpstreamDataInvalid,
        }
    }

    /// Raw model text attached to a malformed-output failure.
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            AuditError::MalformedModelOutput { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum MonitorError {
    #[error("Invalid contract address: {0}")]
    InvalidAddress(String),

    #[error("Contract {0} is already being watched")]
    DuplicateContract(String),

    #[error("Contract {0} is not in the watchlist")]
    UnknownContract(String),

    #[error("Monitor task is not running")]
    NotRunning,
}

impl MonitorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MonitorError::InvalidAddress(_)
            | MonitorError::DuplicateContract(_)
            | MonitorError::UnknownContract(_) => ErrorKind::InputInvalid,
            MonitorError::NotRunning => ErrorKind::EndpointUnreachable,
        }
    }
}
