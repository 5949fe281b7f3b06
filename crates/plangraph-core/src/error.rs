use thiserror::Error;

/// Graph misconfiguration, detected when the graph is assembled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Duplicate node name: {0}")]
    DuplicateName(String),

    #[error("Node '{node}' declares unknown successor '{successor}'")]
    UnknownSuccessor { node: String, successor: String },

    #[error("Unknown entry node: {0}")]
    UnknownEntry(String),

    #[error("Graph has no nodes")]
    Empty,

    #[error("Graph contains a cycle through node '{0}'")]
    Cycle(String),
}

#[derive(Debug, Error)]
pub enum PlanGraphError {
    // Generator errors
    #[error("Generator request failed: {0}")]
    GeneratorRequest(String),

    #[error("Generator streaming error: {0}")]
    GeneratorStream(String),

    #[error("Generator timeout after {timeout_ms}ms")]
    GeneratorTimeout { timeout_ms: u64 },


    #[error("Generator provider not supported: {0}")]
    UnsupportedProvider(String),

    // Graph errors
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Node '{node}' failed: {source}")]
    NodeFailed {
        node: String,
        #[source]
        source: Box<PlanGraphError>,
    },

    #[error("Run cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PlanGraphError {
    /// Whether this error came from the external generation call.
    pub fn is_generator_error(&self) -> bool {
        match self {
            Self::GeneratorRequest(_)
            | Self::GeneratorStream(_)
            | Self::GeneratorTimeout { .. } => true,
            Self::NodeFailed { source, .. } => source.is_generator_error(),
            _ => false,
        }
    }

    /// Wrap an error as the failure of a named node.
    pub fn node_failed(node: impl Into<String>, source: PlanGraphError) -> Self {
        Self::NodeFailed {
            node: node.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, PlanGraphError>;
