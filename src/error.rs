// SPDX-License-Identifier: MIT

//! Typed error handling for stategraph-rs
//!
//! Setup-time failures (graph wiring, tool registration) are kept apart
//! from run-time failures so a miswired graph is distinguishable from a
//! run that went wrong. Tool-level failures are the only recoverable
//! kind: they are fed back to the model as failed tool results instead
//! of aborting the run.

use thiserror::Error;

/// Failures raised while a compiled graph is running.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Conversation log violated the tool-call correlation contract
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Liveness guard tripped before the run reached END
    #[error("Step limit exceeded: {limit}")]
    StepLimit { limit: u32 },

    /// A router picked a successor outside its declared allow-list
    #[error("Undeclared edge from '{from}' to '{to}'")]
    UndeclaredEdge { from: String, to: String },

    /// Model invocation failed; fatal for the run, never retried here
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// Generic error wrapper for node implementations
    #[error("{0}")]
    Other(String),
}

/// Failures raised while wiring a graph, before any run starts.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Two nodes were added under the same name
    #[error("Duplicate node name: '{0}'")]
    DuplicateNode(String),

    /// An edge names a node that was never added
    #[error("Edge references unknown node '{0}'")]
    UnknownNode(String),

    /// A node was added under a reserved sentinel name
    #[error("'{0}' is a reserved node name")]
    ReservedName(String),

    /// Nothing connects START to the graph
    #[error("No edge out of START")]
    MissingEntry,

    /// Every node needs exactly one outgoing edge
    #[error("Node '{0}' has no outgoing edge")]
    MissingExit(String),

    /// Every node needs exactly one outgoing edge
    #[error("Node '{0}' has more than one outgoing edge")]
    ConflictingExit(String),

    /// A conditional edge must allow at least one successor
    #[error("Conditional edge from '{0}' allows no successors")]
    EmptyRouteSet(String),
}

/// Failures raised by the tool registry and tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    /// A second tool was registered under an existing name
    #[error("Tool '{0}' is already registered")]
    DuplicateName(String),

    /// Requested tool is not in the registry
    #[error("Tool '{0}' not found")]
    UnknownTool(String),

    /// Arguments did not match the tool's schema; every offending field
    /// is listed, not just the first
    #[error("Invalid arguments for tool '{tool}': {}", .issues.join("; "))]
    InvalidArguments { tool: String, issues: Vec<String> },

    /// The tool itself failed while running
    #[error("Tool '{tool}' failed: {reason}")]
    Execution { tool: String, reason: String },
}

/// Failures raised by model provider adapters.
#[derive(Debug, Error)]
pub enum ModelError {
    /// API key not configured
    #[error("API key not configured for provider: {0}")]
    ApiKeyMissing(String),

    /// Provider returned a non-success status
    #[error("API error from {provider}: {message}")]
    Api { provider: String, message: String },

    /// Rate limit exceeded
    #[error("Rate limit exceeded, retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Transport-level failure
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Provider reply did not have the expected shape
    #[error("Invalid response from model: {0}")]
    InvalidResponse(String),
}

/// Failures decoding or manipulating the demo images.
#[derive(Debug, Error)]
pub enum ImageError {
    /// Bytes were not a binary PPM this crate can read
    #[error("Invalid PPM data: {0}")]
    InvalidPpm(String),

    /// Crop rectangle has zero area
    #[error("Empty crop rectangle {width}x{height}")]
    EmptyCrop { width: u32, height: u32 },

    /// Crop rectangle reaches outside the image
    #[error("Crop rectangle {x},{y} {width}x{height} does not fit in {image_width}x{image_height} image")]
    OutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        image_width: u32,
        image_height: u32,
    },

    /// Attached payload was not valid base64
    #[error("Invalid base64 image payload: {0}")]
    InvalidBase64(String),
}

impl FlowError {
    /// Create a protocol violation error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create from a generic message
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

impl ToolError {
    /// Create a validation error listing the offending fields
    pub fn invalid_arguments(tool: impl Into<String>, issues: Vec<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            issues,
        }
    }

    /// Create an execution failure
    pub fn execution(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Execution {
            tool: tool.into(),
            reason: reason.into(),
        }
    }
}

impl ModelError {
    /// Create an API error
    pub fn api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create an invalid response error
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }
}

impl From<&str> for FlowError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

impl From<String> for FlowError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}
