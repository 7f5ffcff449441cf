use thiserror::Error;

/// Possible errors from building or merging desired state
#[derive(Error, Debug)]
pub enum Error {
    /// An object did not carry a field that the builders rely on
    #[error("object is missing {0}")]
    MissingObjectKey(&'static str),

    /// The operator configuration could not be parsed
    #[error("invalid operator configuration: {0}")]
    InvalidOperatorConfig(#[source] serde_yaml::Error),

    /// The operator configuration parsed but holds an unusable value
    #[error("invalid operator configuration value for {key}: {reason}")]
    InvalidConfigValue {
        /// The configuration key at fault
        key: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// An existing config artifact holds content that cannot be parsed
    #[error("existing content of {key} is not valid yaml: {source}")]
    UnparsableArtifact {
        /// The artifact key that failed to parse
        key: String,
        /// Parser error
        #[source]
        source: serde_yaml::Error,
    },

    /// Rendering a document back to yaml failed
    #[error("failed to render {key}: {source}")]
    RenderArtifact {
        /// The artifact key being rendered
        key: String,
        /// Serializer error
        #[source]
        source: serde_yaml::Error,
    },

    /// Serializing an object for hashing failed
    #[error("failed to serialize object for hashing: {0}")]
    Hash(#[source] serde_json::Error),
}
