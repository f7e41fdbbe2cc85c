//! Field-bus abstraction
//!
//! A [`FieldBus`] is one open request/response session to one controller.
//! A [`BusConnector`] opens sessions; the axis client holds a connector so
//! it can reconnect on its own.

pub mod modbus;
pub mod simulation;

use async_trait::async_trait;
use depokit_core::ConnError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Network address and sub-address of one controller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BusEndpoint {
    /// Host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Unit identifier on the bus
    pub slave_id: u8,
}

impl BusEndpoint {
    /// Create an endpoint
    pub fn new(host: impl Into<String>, port: u16, slave_id: u8) -> Self {
        Self {
            host: host.into(),
            port,
            slave_id,
        }
    }
}

impl fmt::Display for BusEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.host, self.port, self.slave_id)
    }
}

/// Transport level failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BusError {
    /// Socket error
    #[error("I/O error: {reason}")]
    Io {
        /// The underlying error message.
        reason: String,
    },

    /// No response in time
    #[error("No response within {timeout_ms}ms")]
    Timeout {
        /// The timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The device answered with an exception
    #[error("Exception response to function 0x{function:02X}: code {code}")]
    Exception {
        /// Function code of the request.
        function: u8,
        /// Exception code.
        code: u8,
    },

    /// Malformed or mismatched frame
    #[error("Protocol error: {reason}")]
    Protocol {
        /// What was wrong with the frame.
        reason: String,
    },
}

impl From<std::io::Error> for BusError {
    fn from(err: std::io::Error) -> Self {
        BusError::Io {
            reason: err.to_string(),
        }
    }
}

impl From<BusError> for ConnError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Exception { function, code } => ConnError::Rejected { function, code },
            other => ConnError::Lost {
                reason: other.to_string(),
            },
        }
    }
}

/// One open session to one controller
#[async_trait]
pub trait FieldBus: Send {
    /// Read `count` consecutive holding registers
    async fn read_holding_registers(&mut self, address: u16, count: u16)
        -> Result<Vec<u16>, BusError>;

    /// Write one holding register
    async fn write_single_register(&mut self, address: u16, value: u16) -> Result<(), BusError>;

    /// Write consecutive holding registers
    async fn write_multiple_registers(
        &mut self,
        address: u16,
        values: &[u16],
    ) -> Result<(), BusError>;
}

/// Opens sessions to endpoints
#[async_trait]
pub trait BusConnector: Send + Sync {
    /// Establish a session
    async fn connect(&self, endpoint: &BusEndpoint) -> Result<Box<dyn FieldBus>, BusError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_error_maps_to_conn_error() {
        let rejected: ConnError = BusError::Exception {
            function: 0x06,
            code: 2,
        }
        .into();
        assert_eq!(
            rejected,
            ConnError::Rejected {
                function: 0x06,
                code: 2
            }
        );
        assert!(!rejected.is_session_loss());

        let lost: ConnError = BusError::Timeout { timeout_ms: 500 }.into();
        assert!(lost.is_session_loss());
        assert_eq!(lost.to_string(), "Connection lost: No response within 500ms");
    }

    #[test]
    fn test_endpoint_display() {
        let endpoint = BusEndpoint::new("169.254.151.255", 502, 2);
        assert_eq!(endpoint.to_string(), "169.254.151.255:502#2");
    }
}
