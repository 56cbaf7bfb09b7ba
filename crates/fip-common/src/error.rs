//! Error types for the floating IP controller
//!
//! Errors are structured with fields so that log output names the floating IP,
//! instance and phase involved without needing a debugger. Variants fall into
//! three groups:
//!
//! - fatal before the loop starts ([`Error::Configuration`])
//! - transient API failures that are retried ([`Error::Kube`], [`Error::Cloud`])
//!   and then surfaced as [`Error::RetriesExhausted`]
//! - per-cycle failures that abort the current reconciliation cycle only

use std::net::IpAddr;

use thiserror::Error;

/// Main error type for controller operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Cloud API error (transport failure or non-success status on a read)
    #[error("cloud API error [{operation}]: {message}")]
    Cloud {
        /// API operation that failed (e.g., "list_servers")
        operation: String,
        /// Description of what failed
        message: String,
        /// HTTP status code, if a response was received
        status: Option<u16>,
    },

    /// Invalid configuration, rejected before any reconciliation attempt
    #[error("configuration invalid: {message}")]
    Configuration {
        /// Every problem found, joined for display
        message: String,
    },

    /// A retried operation failed on every attempt
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Name of the retried operation
        operation: String,
        /// Number of attempts made
        attempts: u32,
        /// The error returned by the final attempt
        source: Box<Error>,
    },

    /// Neither workload replicas nor healthy machines yielded a target address
    #[error("no eligible targets found using {address_type} addresses")]
    NoEligibleTargets {
        /// Address type that was requested
        address_type: String,
    },

    /// A healthy machine reports no address of the requested type
    #[error("healthy node {node} has no {address_type} address")]
    MissingNodeAddress {
        /// Name of the node
        node: String,
        /// Address type that was requested
        address_type: String,
    },

    /// No cloud instance carries the given target address
    #[error("no instance with address {address} found")]
    NoMatchingInstance {
        /// Target address that could not be resolved
        address: IpAddr,
    },

    /// A configured floating IP address is not allocated in the cloud project
    #[error("floating IP address {address} not allocated")]
    UnallocatedAddress {
        /// The configured address
        address: IpAddr,
    },

    /// The cloud API answered an assignment with an unexpected status code
    #[error("could not assign floating IP {floating_ip} to {instance}: got HTTP {status}, expected one of {expected:?}")]
    UnexpectedResponse {
        /// Floating IP that was being moved
        floating_ip: IpAddr,
        /// Name of the target instance
        instance: String,
        /// Status code returned
        status: u16,
        /// Status codes that mean the request was accepted
        expected: Vec<u16>,
    },

    /// Leadership was lost while a cycle was running
    #[error("leadership lost by {identity}")]
    LeadershipLost {
        /// Identity that held the lease
        identity: String,
    },

    /// An operation was interrupted by cancellation
    #[error("{operation} cancelled")]
    Cancelled {
        /// Name of the interrupted operation
        operation: String,
    },
}

impl Error {
    /// Create a cloud API error without a status code (transport failure)
    pub fn cloud(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Cloud {
            operation: operation.into(),
            message: msg.into(),
            status: None,
        }
    }

    /// Create a cloud API error for a response with a non-success status
    pub fn cloud_status(operation: impl Into<String>, status: u16, msg: impl Into<String>) -> Self {
        Self::Cloud {
            operation: operation.into(),
            message: msg.into(),
            status: Some(status),
        }
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create a cancellation error for the named operation
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Check if this error should stop the process
    ///
    /// Only configuration errors are fatal. Anything else ends at most the
    /// current leadership term and is re-evaluated after re-election.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Configuration { .. } => true,
            Error::RetriesExhausted { source, .. } => source.is_fatal(),
            _ => false,
        }
    }

    /// Check if this error was caused by cancellation
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled { .. } => true,
            Error::RetriesExhausted { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Get the floating IP this error concerns, if any
    pub fn floating_ip(&self) -> Option<IpAddr> {
        match self {
            Error::UnallocatedAddress { address } => Some(*address),
            Error::UnexpectedResponse { floating_ip, .. } => Some(*floating_ip),
            Error::RetriesExhausted { source, .. } => source.floating_ip(),
            _ => None,
        }
    }

    /// Get the HTTP status code carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Cloud { status, .. } => *status,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => Some(ae.code),
            Error::UnexpectedResponse { status, .. } => Some(*status),
            Error::RetriesExhausted { source, .. } => source.status(),
            _ => None,
        }
    }
}
