//! Client-side communication protocol over one TCP connection per worker.

use std::net::TcpStream;

use log::info;

use crate::error::{Error, Result};
use crate::matrix::Matrix;
use crate::wire::{self, Op};

/// Capability set the operation drivers are written against. `TcpProtocol`
/// talks plaintext frames; `EncryptedProtocol` wraps an inner protocol and
/// swaps matrix payloads for ciphertext frames behind the same interface.
pub trait Protocol {
    /// Number of connected workers; worker ids are `0..worker_count()`.
    fn worker_count(&self) -> usize;

    /// Ask `worker` to perform an operation. Must precede the operand
    /// offloads for that worker.
    fn start(&mut self, worker: usize, op: Op) -> Result<()>;

    /// Send one operand matrix to `worker`.
    fn offload(&mut self, worker: usize, data: &[f64], rows: u32, columns: u32) -> Result<()>;

    fn offload_matrix(&mut self, worker: usize, matrix: &Matrix) -> Result<()> {
        self.offload(
            worker,
            matrix.data(),
            matrix.rows() as u32,
            matrix.columns() as u32,
        )
    }

    /// Block until `worker` returns the result of its last request.
    fn wait_result(&mut self, worker: usize) -> Result<Matrix>;

    /// Push raw bytes down `worker`'s channel, bypassing framing.
    fn send_raw(&mut self, worker: usize, bytes: &[u8]) -> Result<()>;

    /// Pull exactly `len` raw bytes from `worker`'s channel.
    fn receive_raw(&mut self, worker: usize, len: usize) -> Result<Vec<u8>>;

    /// Whether operand payloads leave this protocol encrypted.
    fn encrypted(&self) -> bool {
        false
    }
}

/// Split `host:port` at the last colon. An empty host means `localhost`;
/// a missing or empty port is a parse error.
pub fn parse_worker_addr(addr: &str) -> Result<(String, String)> {
    let idx = addr.rfind(':').ok_or_else(|| Error::Address {
        addr: addr.to_string(),
        reason: "port not specified",
    })?;
    let (host, port) = (&addr[..idx], &addr[idx + 1..]);
    if port.is_empty() {
        return Err(Error::Address {
            addr: addr.to_string(),
            reason: "invalid port",
        });
    }
    let host = if host.is_empty() { "localhost" } else { host };
    Ok((host.to_string(), port.to_string()))
}

/// Direct TCP transport. One persistent connection per worker, strictly
/// synchronous per channel.
pub struct TcpProtocol {
    workers: Vec<TcpStream>,
}

impl TcpProtocol {
    pub fn new() -> Self {
        Self {
            workers: Vec::new(),
        }
    }

    /// Resolve and connect one worker, appending it to the worker list.
    pub fn add_worker(&mut self, addr: &str) -> Result<()> {
        let (host, port) = parse_worker_addr(addr)?;
        let stream = TcpStream::connect(format!("{host}:{port}"))?;
        info!("connected to worker {} at {host}:{port}", self.workers.len());
        self.workers.push(stream);
        Ok(())
    }
}

impl Default for TcpProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for TcpProtocol {
    fn worker_count(&self) -> usize {
        self.workers.len()
    }

    fn start(&mut self, worker: usize, op: Op) -> Result<()> {
        wire::write_op(&mut self.workers[worker], op)
    }

    fn offload(&mut self, worker: usize, data: &[f64], rows: u32, columns: u32) -> Result<()> {
        wire::write_matrix(&mut self.workers[worker], data, rows, columns)
    }

    fn wait_result(&mut self, worker: usize) -> Result<Matrix> {
        wire::read_matrix(&mut self.workers[worker])
    }

    fn send_raw(&mut self, worker: usize, bytes: &[u8]) -> Result<()> {
        use std::io::Write;
        self.workers[worker].write_all(bytes)?;
        Ok(())
    }

    fn receive_raw(&mut self, worker: usize, len: usize) -> Result<Vec<u8>> {
        use std::io::Read;
        let mut buf = vec![0u8; len];
        self.workers[worker].read_exact(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_with_host_and_port() {
        assert_eq!(
            parse_worker_addr("host:9000").unwrap(),
            ("host".to_string(), "9000".to_string())
        );
    }

    #[test]
    fn empty_host_defaults_to_localhost() {
        assert_eq!(
            parse_worker_addr(":9000").unwrap(),
            ("localhost".to_string(), "9000".to_string())
        );
    }

    #[test]
    fn missing_port_is_rejected() {
        assert!(parse_worker_addr("noport").is_err());
        assert!(parse_worker_addr("host:").is_err());
    }

    #[test]
    fn split_happens_at_last_colon() {
        assert_eq!(
            parse_worker_addr("fe80::1:9000").unwrap(),
            ("fe80::1".to_string(), "9000".to_string())
        );
    }
}
