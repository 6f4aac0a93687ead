//! Unified error type for the widget bridge
//!
//! Every failure that can surface from discovery, view construction,
//! invocation or payload projection is a [`BridgeError`]. The type is `Clone`
//! because a single view construction result is shared by every caller that
//! chained onto it.

use std::fmt;

/// High-level error categories for logging and caller triage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed payloads, unknown callbacks, bad arguments
    Input,
    /// Invalid configuration
    Config,
    /// Element, widget, view or method not found
    NotFound,
    /// View construction or view operation failures
    Operation,
}

impl ErrorCategory {
    /// Get a short label for this category.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Input => "Input",
            Self::Config => "Config",
            Self::NotFound => "Not Found",
            Self::Operation => "Operation",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Unified error type for all bridge operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    /// No document element matches the selector
    #[error("No document element found using selector '{selector}'")]
    ElementNotFound {
        /// Selector that matched nothing
        selector: String,
    },

    /// The element exists but does not carry the widget marker class
    #[error("Document element found using selector '{selector}' does not have class '{marker}'")]
    NotAWidget {
        /// Selector of the unmarked element
        selector: String,
        /// Marker class that was expected
        marker: String,
    },

    /// The element never gained a live widget instance within the retry budget
    #[error("Widget '{selector}' was not attached after {attempts} attempts")]
    DiscoveryTimeout {
        /// Selector being waited on
        selector: String,
        /// Number of lookups performed
        attempts: u32,
    },

    /// The rendering engine rejected the chart spec
    #[error("View construction failed: {message}")]
    ViewConstruction {
        /// Engine error message
        message: String,
    },

    /// The view does not expose the requested method
    #[error("View has no method '{method}'")]
    MethodNotFound {
        /// Requested method name
        method: String,
    },

    /// The widget has not been rendered yet, so it has no view promise
    #[error("Widget '{id}' has not been rendered")]
    NotRendered {
        /// Element id of the widget
        id: String,
    },

    /// A predicate or listener name is not registered
    #[error("No {kind} registered under '{name}'")]
    UnknownCallback {
        /// Kind of callback that was looked up
        kind: String,
        /// Name that was looked up
        name: String,
    },

    /// A data or message payload has the wrong shape
    #[error("Malformed payload: {message}")]
    MalformedPayload {
        /// Description of the problem
        message: String,
    },

    /// The transport delivered a message name with no handler
    #[error("No handler for message '{name}'")]
    UnknownMessage {
        /// Message name as delivered
        name: String,
    },

    /// A view method received arguments it cannot use
    #[error("Invalid argument for '{method}': {message}")]
    InvalidArgument {
        /// Method that rejected its arguments
        method: String,
        /// Description of the problem
        message: String,
    },

    /// A view method failed while executing
    #[error("View operation '{method}' failed: {message}")]
    ViewOperation {
        /// Method that failed
        method: String,
        /// Engine error message
        message: String,
    },

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the problem
        message: String,
    },

    /// The task that would have produced a result went away
    #[error("Operation cancelled: {message}")]
    Cancelled {
        /// What was cancelled
        message: String,
    },
}

impl BridgeError {
    /// Create an element-not-found error
    pub fn element_not_found(selector: impl Into<String>) -> Self {
        Self::ElementNotFound {
            selector: selector.into(),
        }
    }

    /// Create a not-a-widget error
    pub fn not_a_widget(selector: impl Into<String>, marker: impl Into<String>) -> Self {
        Self::NotAWidget {
            selector: selector.into(),
            marker: marker.into(),
        }
    }

    /// Create a view construction error
    pub fn view_construction(message: impl Into<String>) -> Self {
        Self::ViewConstruction {
            message: message.into(),
        }
    }

    /// Create a method-not-found error
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::MethodNotFound {
            method: method.into(),
        }
    }

    /// Create a malformed payload error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedPayload {
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Create a view operation error
    pub fn view_operation(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ViewOperation {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// Category of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ElementNotFound { .. }
            | Self::NotAWidget { .. }
            | Self::DiscoveryTimeout { .. }
            | Self::MethodNotFound { .. }
            | Self::NotRendered { .. } => ErrorCategory::NotFound,
            Self::UnknownCallback { .. }
            | Self::MalformedPayload { .. }
            | Self::UnknownMessage { .. }
            | Self::InvalidArgument { .. } => ErrorCategory::Input,
            Self::Config { .. } => ErrorCategory::Config,
            Self::ViewConstruction { .. } | Self::ViewOperation { .. } | Self::Cancelled { .. } => {
                ErrorCategory::Operation
            }
        }
    }

    /// Whether retrying the same call could succeed without caller changes.
    ///
    /// Only a discovery timeout qualifies: the element was marked correctly
    /// and may still be attached later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DiscoveryTimeout { .. })
    }
}

/// Standard Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_selector() {
        let err = BridgeError::element_not_found("#chart");
        assert_eq!(
            err.to_string(),
            "No document element found using selector '#chart'"
        );

        let err = BridgeError::not_a_widget("#chart", "vegawidget");
        assert!(err.to_string().contains("does not have class 'vegawidget'"));
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            BridgeError::method_not_found("nope").category(),
            ErrorCategory::NotFound
        );
        assert_eq!(BridgeError::malformed("x").category(), ErrorCategory::Input);
        assert_eq!(
            BridgeError::view_construction("bad spec").category(),
            ErrorCategory::Operation
        );
        assert!(!BridgeError::element_not_found("#a").is_retryable());
        assert!(BridgeError::DiscoveryTimeout {
            selector: "#a".into(),
            attempts: 3
        }
        .is_retryable());
    }
}
