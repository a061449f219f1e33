//! Framed binary codec used on every client/worker socket.
//!
//! Three primitives ride on a reliable byte stream: fixed-size reads and
//! writes (looping until the full count has moved), and `u32`-length-prefixed
//! variable frames for opaque ciphertext and key material. All integers and
//! `f64` payloads are little-endian.

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::matrix::Matrix;

/// Operation selector, sent as a `u32` tag at the head of every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Op {
    Echo = 0,
    Add = 1,
    Mul = 2,
    HAdd = 3,
    HMul = 4,
}

impl Op {
    pub fn from_tag(tag: u32) -> Result<Self> {
        match tag {
            0 => Ok(Op::Echo),
            1 => Ok(Op::Add),
            2 => Ok(Op::Mul),
            3 => Ok(Op::HAdd),
            4 => Ok(Op::HMul),
            other => Err(Error::UnknownOp(other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Echo => "echo",
            Op::Add => "add",
            Op::Mul => "mul",
            Op::HAdd => "hadd",
            Op::HMul => "hmul",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Op {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "echo" => Ok(Op::Echo),
            "add" => Ok(Op::Add),
            "mul" => Ok(Op::Mul),
            "hadd" => Ok(Op::HAdd),
            "hmul" => Ok(Op::HMul),
            other => Err(Error::InvalidOpName(other.to_string())),
        }
    }
}

/// `(rows, columns)` prefix carried by every matrix payload, plaintext or
/// ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixHeader {
    pub rows: u32,
    pub columns: u32,
}

impl MatrixHeader {
    pub const SIZE: usize = 8;

    pub fn new(rows: u32, columns: u32) -> Self {
        Self { rows, columns }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[..4].copy_from_slice(&self.rows.to_le_bytes());
        buf[4..].copy_from_slice(&self.columns.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; Self::SIZE]) -> Self {
        Self {
            rows: u32::from_le_bytes(buf[..4].try_into().unwrap()),
            columns: u32::from_le_bytes(buf[4..].try_into().unwrap()),
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.to_bytes())?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut buf = [0u8; Self::SIZE];
        r.read_exact(&mut buf)?;
        Ok(Self::from_bytes(&buf))
    }
}

pub fn write_u32<W: Write>(w: &mut W, value: u32) -> Result<()> {
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn write_op<W: Write>(w: &mut W, op: Op) -> Result<()> {
    write_u32(w, op as u32)
}

/// Read the next operation tag. Returns `Ok(None)` when the peer closed the
/// connection cleanly at a request boundary; EOF mid-tag is an error.
pub fn read_op<R: Read>(r: &mut R) -> Result<Option<Op>> {
    let mut buf = [0u8; 4];
    let n = r.read(&mut buf)?;
    if n == 0 {
        return Ok(None);
    }
    if n < buf.len() {
        r.read_exact(&mut buf[n..])?;
    }
    Op::from_tag(u32::from_le_bytes(buf)).map(Some)
}

/// Write a `u32`-length-prefixed frame.
pub fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> Result<()> {
    write_u32(w, payload.len() as u32)?;
    w.write_all(payload)?;
    Ok(())
}

/// Read one `u32`-length-prefixed frame.
pub fn read_frame<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let len = read_u32(r)? as usize;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    Ok(payload)
}

/// Write a matrix frame: 8-byte header, then `rows * columns` `f64`s row-major.
pub fn write_matrix<W: Write>(w: &mut W, data: &[f64], rows: u32, columns: u32) -> Result<()> {
    debug_assert_eq!(data.len(), rows as usize * columns as usize);
    MatrixHeader::new(rows, columns).write_to(w)?;
    let mut payload = Vec::with_capacity(data.len() * 8);
    for value in data {
        payload.extend_from_slice(&value.to_le_bytes());
    }
    w.write_all(&payload)?;
    Ok(())
}

/// Read one matrix frame.
pub fn read_matrix<R: Read>(r: &mut R) -> Result<Matrix> {
    let header = MatrixHeader::read_from(r)?;
    let count = header.rows as usize * header.columns as usize;
    let mut payload = vec![0u8; count * 8];
    r.read_exact(&mut payload)?;
    let data = payload
        .chunks_exact(8)
        .map(|chunk| f64::from_le_bytes(chunk.try_into().unwrap()))
        .collect();
    Ok(Matrix::from_vec(data, header.columns as usize))
}
