//! Transparent encryption proxy around a plaintext protocol.
//!
//! The proxy satisfies the same `Protocol` interface as the transport it
//! wraps: operation tags are remapped to their homomorphic counterparts,
//! matrix payloads become per-row ciphertext frames, and results are
//! decrypted on receipt. Nothing upstream observes the difference.

use log::{debug, info};

use crate::ckks::{CkksOptions, ClientCrypto};
use crate::error::{Error, Result};
use crate::matrix::Matrix;
use crate::protocol::Protocol;
use crate::wire::{MatrixHeader, Op};

pub struct EncryptedProtocol<P: Protocol> {
    inner: P,
    options: CkksOptions,
    crypto: ClientCrypto,
}

impl<P: Protocol> EncryptedProtocol<P> {
    /// Builds the context and generates the full key set up front; only the
    /// public material ever leaves this object.
    pub fn new(inner: P, options: CkksOptions) -> Result<Self> {
        let crypto = ClientCrypto::new(&options)?;
        info!(
            "encryption proxy ready: {} slots per ciphertext",
            options.slots()
        );
        Ok(Self {
            inner,
            options,
            crypto,
        })
    }
}

impl<P: Protocol> Protocol for EncryptedProtocol<P> {
    fn worker_count(&self) -> usize {
        self.inner.worker_count()
    }

    /// Forward the remapped tag, then the context options and the public
    /// key frame the worker needs before any ciphertext arrives.
    fn start(&mut self, worker: usize, op: Op) -> Result<()> {
        let remapped = match op {
            Op::Add => Op::HAdd,
            Op::Mul => Op::HMul,
            other => return Err(Error::NotEncryptable(other)),
        };
        self.inner.start(worker, remapped)?;
        self.inner.send_raw(worker, &self.options.to_bytes())?;

        let public = self.crypto.public_bytes();
        let mut frame = Vec::with_capacity(4 + public.len());
        frame.extend_from_slice(&(public.len() as u32).to_le_bytes());
        frame.extend_from_slice(public);
        self.inner.send_raw(worker, &frame)?;
        debug!("worker {worker}: sent {} key bytes", public.len());
        Ok(())
    }

    fn offload(&mut self, worker: usize, data: &[f64], rows: u32, columns: u32) -> Result<()> {
        self.inner
            .send_raw(worker, &MatrixHeader::new(rows, columns).to_bytes())?;
        for row in data.chunks_exact(columns as usize) {
            let cipher = self.crypto.encrypt_row(row)?;
            let mut frame = Vec::with_capacity(4 + cipher.len());
            frame.extend_from_slice(&(cipher.len() as u32).to_le_bytes());
            frame.extend_from_slice(&cipher);
            self.inner.send_raw(worker, &frame)?;
        }
        Ok(())
    }

    fn wait_result(&mut self, worker: usize) -> Result<Matrix> {
        let mut header = [0u8; MatrixHeader::SIZE];
        header.copy_from_slice(&self.inner.receive_raw(worker, MatrixHeader::SIZE)?);
        let header = MatrixHeader::from_bytes(&header);

        let columns = header.columns as usize;
        let mut data = Vec::with_capacity(header.rows as usize * columns);
        for _ in 0..header.rows {
            let mut len = [0u8; 4];
            len.copy_from_slice(&self.inner.receive_raw(worker, 4)?);
            let cipher = self.inner.receive_raw(worker, u32::from_le_bytes(len) as usize)?;
            data.extend(self.crypto.decrypt_row(&cipher, columns)?);
        }
        Ok(Matrix::from_vec(data, columns))
    }

    fn send_raw(&mut self, worker: usize, bytes: &[u8]) -> Result<()> {
        self.inner.send_raw(worker, bytes)
    }

    fn receive_raw(&mut self, worker: usize, len: usize) -> Result<Vec<u8>> {
        self.inner.receive_raw(worker, len)
    }

    fn encrypted(&self) -> bool {
        true
    }
}
