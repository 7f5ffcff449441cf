use std::time::Duration;
use thiserror::Error;

/// Possible errors from the operator runtime
#[derive(Error, Debug)]
pub enum Error {
    /// Building or merging desired state failed
    #[error(transparent)]
    Core(#[from] vmo_core::Error),

    /// A request to the cluster API failed
    #[error("kubernetes api request failed: {0}")]
    Kube(#[source] kube::Error),

    /// A request to the search cluster failed
    #[error("search cluster request failed: {0}")]
    Search(#[source] reqwest::Error),

    /// The search cluster answered with an unexpected status
    #[error("search cluster answered {status} for {path}")]
    SearchStatus {
        /// Request path
        path: String,
        /// HTTP status code
        status: u16,
    },

    /// Data nodes were asked to scale below the resize minimum
    #[error("cannot resize data nodes: {requested} requested but at least {minimum} are required")]
    ResizeBelowMinimum {
        /// Declared data node replicas
        requested: i32,
        /// Configured minimum
        minimum: i32,
    },

    /// The search cluster is not green
    #[error("search cluster health is {0}, not green")]
    ClusterNotGreen(String),

    /// The search cluster's nodes do not match the declared topology
    #[error("search cluster nodes do not match the declared topology: {0}")]
    NodeMismatch(String),

    /// The credentials secret named by the instance does not exist
    #[error("credentials secret {0} not found")]
    MissingSecret(String),

    /// An instance key could not be split into namespace and name
    #[error("invalid resource key {0:?}")]
    InvalidKey(String),

    /// One or more pipeline steps failed
    #[error("pipeline steps failed: {}", failed.join(", "))]
    Pipeline {
        /// Names of the failed steps, in pipeline order
        failed: Vec<&'static str>,
    },

    /// Cached views did not finish their initial listing in time
    #[error("caches did not sync within {0:?}")]
    CacheSyncTimeout(Duration),

    /// A reflector stopped before its cache finished the initial listing
    #[error("a cache stopped before its initial listing completed")]
    CacheSyncFailed,

    /// The policy provisioning task ended without reporting a result
    #[error("policy provisioning task ended without a result")]
    PolicyTaskLost,

    /// Registering or rendering metrics failed
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// The management server could not bind or serve
    #[error("management server failed: {0}")]
    Server(#[source] std::io::Error),
}

impl Error {
    /// Whether retrying the same work later may succeed
    ///
    /// Conflicts, throttling, server errors and network failures are transient. A
    /// malformed key never becomes valid, so it is dropped instead of requeued.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::InvalidKey(_) => false,
            Error::Kube(kube::Error::Api(status)) => {
                status.code == 409 || status.code == 429 || status.code >= 500
            }
            Error::Kube(_) | Error::Search(_) | Error::SearchStatus { .. } => true,
            Error::ClusterNotGreen(_) | Error::NodeMismatch(_) => true,
            Error::Pipeline { .. } | Error::MissingSecret(_) => true,
            Error::ResizeBelowMinimum { .. } | Error::Core(_) => false,
            Error::CacheSyncTimeout(_) | Error::CacheSyncFailed | Error::PolicyTaskLost => false,
            Error::Metrics(_) | Error::Server(_) => false,
        }
    }
}

impl From<kube::Error> for Error {
    fn from(error: kube::Error) -> Self {
        Error::Kube(error)
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Error::Search(error)
    }
}
