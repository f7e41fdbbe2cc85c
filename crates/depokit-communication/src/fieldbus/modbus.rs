//! Modbus TCP client
//!
//! Only the three function codes the controllers need are implemented:
//! read holding registers (0x03), write single register (0x06) and write
//! multiple registers (0x10). Requests are strictly sequential per session.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{BusConnector, BusEndpoint, BusError, FieldBus};

/// MBAP header length
pub const MBAP_HEADER_LEN: usize = 7;
/// Largest register count one read may request
pub const MAX_READ_REGISTERS: u16 = 125;
/// Largest register count one write may carry
pub const MAX_WRITE_REGISTERS: u16 = 123;

const FN_READ_HOLDING: u8 = 0x03;
const FN_WRITE_SINGLE: u8 = 0x06;
const FN_WRITE_MULTIPLE: u8 = 0x10;
const EXCEPTION_FLAG: u8 = 0x80;

/// A request PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Function 0x03
    ReadHoldingRegisters {
        /// First register
        address: u16,
        /// Register count
        count: u16,
    },
    /// Function 0x06
    WriteSingleRegister {
        /// Register
        address: u16,
        /// Value
        value: u16,
    },
    /// Function 0x10
    WriteMultipleRegisters {
        /// First register
        address: u16,
        /// Values
        values: Vec<u16>,
    },
}

impl Request {
    /// Function code
    pub fn function_code(&self) -> u8 {
        match self {
            Request::ReadHoldingRegisters { .. } => FN_READ_HOLDING,
            Request::WriteSingleRegister { .. } => FN_WRITE_SINGLE,
            Request::WriteMultipleRegisters { .. } => FN_WRITE_MULTIPLE,
        }
    }

    /// Encode the PDU
    pub fn encode_pdu(&self) -> Result<Vec<u8>, BusError> {
        let mut pdu = vec![self.function_code()];
        match self {
            Request::ReadHoldingRegisters { address, count } => {
                if *count == 0 || *count > MAX_READ_REGISTERS {
                    return Err(BusError::Protocol {
                        reason: format!("cannot read {} registers", count),
                    });
                }
                pdu.extend_from_slice(&address.to_be_bytes());
                pdu.extend_from_slice(&count.to_be_bytes());
            }
            Request::WriteSingleRegister { address, value } => {
                pdu.extend_from_slice(&address.to_be_bytes());
                pdu.extend_from_slice(&value.to_be_bytes());
            }
            Request::WriteMultipleRegisters { address, values } => {
                let count = u16::try_from(values.len())
                    .ok()
                    .filter(|c| *c > 0 && *c <= MAX_WRITE_REGISTERS)
                    .ok_or_else(|| BusError::Protocol {
                        reason: format!("cannot write {} registers", values.len()),
                    })?;
                pdu.extend_from_slice(&address.to_be_bytes());
                pdu.extend_from_slice(&count.to_be_bytes());
                pdu.push((count * 2) as u8);
                for value in values {
                    pdu.extend_from_slice(&value.to_be_bytes());
                }
            }
        }
        Ok(pdu)
    }
}

/// Wrap a PDU in an MBAP header
pub fn encode_frame(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let length = (pdu.len() + 1) as u16;
    let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.push(unit_id);
    frame.extend_from_slice(pdu);
    frame
}

/// Parsed MBAP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    /// Transaction identifier
    pub transaction_id: u16,
    /// Protocol identifier, always 0
    pub protocol_id: u16,
    /// Bytes following the length field, unit id included
    pub length: u16,
    /// Unit identifier
    pub unit_id: u8,
}

impl MbapHeader {
    /// Parse a header
    pub fn parse(bytes: &[u8; MBAP_HEADER_LEN]) -> Self {
        Self {
            transaction_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            protocol_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
            unit_id: bytes[6],
        }
    }
}

/// Decode a response PDU against the request that produced it
///
/// Returns the register words read, or the words echoed for writes.
pub fn decode_response(request: &Request, pdu: &[u8]) -> Result<Vec<u16>, BusError> {
    let protocol = |reason: String| BusError::Protocol { reason };
    let (&function, body) = pdu
        .split_first()
        .ok_or_else(|| protocol("empty response".into()))?;

    if function == request.function_code() | EXCEPTION_FLAG {
        let code = body.first().copied().unwrap_or(0);
        return Err(BusError::Exception {
            function: request.function_code(),
            code,
        });
    }
    if function != request.function_code() {
        return Err(protocol(format!(
            "expected function 0x{:02X}, got 0x{:02X}",
            request.function_code(),
            function
        )));
    }

    match request {
        Request::ReadHoldingRegisters { count, .. } => {
            let (&byte_count, data) = body
                .split_first()
                .ok_or_else(|| protocol("missing byte count".into()))?;
            if byte_count as usize != *count as usize * 2 || data.len() < byte_count as usize {
                return Err(protocol(format!(
                    "expected {} data bytes, got {}",
                    *count as usize * 2,
                    data.len()
                )));
            }
            Ok(data[..byte_count as usize]
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect())
        }
        Request::WriteSingleRegister { address, value } => {
            if body.len() < 4 {
                return Err(protocol("short write echo".into()));
            }
            let echoed_address = u16::from_be_bytes([body[0], body[1]]);
            let echoed_value = u16::from_be_bytes([body[2], body[3]]);
            if echoed_address != *address || echoed_value != *value {
                return Err(protocol("write echo mismatch".into()));
            }
            Ok(vec![*value])
        }
        Request::WriteMultipleRegisters { address, values } => {
            if body.len() < 4 {
                return Err(protocol("short write echo".into()));
            }
            let echoed_address = u16::from_be_bytes([body[0], body[1]]);
            let echoed_count = u16::from_be_bytes([body[2], body[3]]);
            if echoed_address != *address || echoed_count as usize != values.len() {
                return Err(protocol("write echo mismatch".into()));
            }
            Ok(values.clone())
        }
    }
}

/// An open Modbus TCP session to one unit
pub struct ModbusTcpSession {
    stream: TcpStream,
    unit_id: u8,
    next_transaction: u16,
    io_timeout: Duration,
}

impl ModbusTcpSession {
    /// Wrap a connected stream
    pub fn new(stream: TcpStream, unit_id: u8, io_timeout: Duration) -> Self {
        Self {
            stream,
            unit_id,
            next_transaction: 1,
            io_timeout,
        }
    }

    /// Send one request and wait for its response
    pub async fn transact(&mut self, request: &Request) -> Result<Vec<u16>, BusError> {
        let transaction_id = self.next_transaction;
        self.next_transaction = self.next_transaction.wrapping_add(1);
        let frame = encode_frame(transaction_id, self.unit_id, &request.encode_pdu()?);

        match tokio::time::timeout(self.io_timeout, self.exchange(transaction_id, request, &frame))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(BusError::Timeout {
                timeout_ms: self.io_timeout.as_millis() as u64,
            }),
        }
    }

    async fn exchange(
        &mut self,
        transaction_id: u16,
        request: &Request,
        frame: &[u8],
    ) -> Result<Vec<u16>, BusError> {
        self.stream.write_all(frame).await?;
        tracing::trace!("modbus tx {:02X?}", frame);

        let mut header_bytes = [0u8; MBAP_HEADER_LEN];
        self.stream.read_exact(&mut header_bytes).await?;
        let header = MbapHeader::parse(&header_bytes);

        if header.protocol_id != 0 {
            return Err(BusError::Protocol {
                reason: format!("protocol id {}", header.protocol_id),
            });
        }
        if header.length < 2 || header.length > 254 {
            return Err(BusError::Protocol {
                reason: format!("frame length {}", header.length),
            });
        }

        let mut pdu = vec![0u8; header.length as usize - 1];
        self.stream.read_exact(&mut pdu).await?;
        tracing::trace!("modbus rx {:02X?} {:02X?}", header_bytes, pdu);

        if header.transaction_id != transaction_id {
            return Err(BusError::Protocol {
                reason: format!(
                    "transaction id {} does not match request {}",
                    header.transaction_id, transaction_id
                ),
            });
        }
        decode_response(request, &pdu)
    }
}

#[async_trait]
impl FieldBus for ModbusTcpSession {
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, BusError> {
        self.transact(&Request::ReadHoldingRegisters { address, count })
            .await
    }

    async fn write_single_register(&mut self, address: u16, value: u16) -> Result<(), BusError> {
        self.transact(&Request::WriteSingleRegister { address, value })
            .await
            .map(|_| ())
    }

    async fn write_multiple_registers(
        &mut self,
        address: u16,
        values: &[u16],
    ) -> Result<(), BusError> {
        self.transact(&Request::WriteMultipleRegisters {
            address,
            values: values.to_vec(),
        })
        .await
        .map(|_| ())
    }
}

/// Opens Modbus TCP sessions
#[derive(Debug, Clone)]
pub struct ModbusTcpConnector {
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl ModbusTcpConnector {
    /// Create a connector
    pub fn new(connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            io_timeout,
        }
    }
}

impl Default for ModbusTcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(3), Duration::from_millis(500))
    }
}

#[async_trait]
impl BusConnector for ModbusTcpConnector {
    async fn connect(&self, endpoint: &BusEndpoint) -> Result<Box<dyn FieldBus>, BusError> {
        let address = (endpoint.host.as_str(), endpoint.port);
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
        {
            Ok(stream) => stream?,
            Err(_) => {
                return Err(BusError::Timeout {
                    timeout_ms: self.connect_timeout.as_millis() as u64,
                })
            }
        };
        stream.set_nodelay(true)?;
        tracing::debug!("Modbus TCP session opened to {}", endpoint);
        Ok(Box::new(ModbusTcpSession::new(
            stream,
            endpoint.slave_id,
            self.io_timeout,
        )))
    }
}
