//! Worker side: accept loop and per-connection request sessions.

use std::net::{TcpListener, TcpStream};
use std::thread;

use log::{error, info};

use crate::ckks::{CkksOptions, EvalCrypto};
use crate::error::{Error, Result};
use crate::matrix::{mul_t, Matrix};
use crate::wire::{self, MatrixHeader, Op};

/// Bind `0.0.0.0:port` and serve forever.
pub fn serve(port: u16) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    info!("listening on port {port}");
    serve_on(listener)
}

/// Accept connections on an existing listener, one session per connection.
/// A failing session is logged and dropped; the acceptor keeps going.
pub fn serve_on(listener: TcpListener) -> Result<()> {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                thread::spawn(move || {
                    let mut session = Session::new(stream);
                    if let Err(e) = session.run() {
                        error!("{}: {e}", session.peer);
                    }
                    info!("{}: session ended", session.peer);
                });
            }
            Err(e) => error!("accept failed: {e}"),
        }
    }
    Ok(())
}

/// One accepted connection. Stateless across requests: every request carries
/// its own operands, keys included.
struct Session {
    stream: TcpStream,
    peer: String,
}

impl Session {
    fn new(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());
        Self { stream, peer }
    }

    fn run(&mut self) -> Result<()> {
        info!("{}: session started", self.peer);
        while let Some(op) = wire::read_op(&mut self.stream)? {
            info!("{}: request: {op}", self.peer);
            match op {
                Op::Echo => self.handle_echo()?,
                Op::Add | Op::Mul => self.handle_binop(op)?,
                Op::HAdd | Op::HMul => self.handle_homomorphic(op)?,
            }
            info!("{}: sent result", self.peer);
        }
        Ok(())
    }

    fn read_operand(&mut self) -> Result<Matrix> {
        let matrix = wire::read_matrix(&mut self.stream)?;
        info!(
            "{}: received matrix [{} x {}]",
            self.peer,
            matrix.rows(),
            matrix.columns()
        );
        Ok(matrix)
    }

    fn write_result(&mut self, matrix: &Matrix) -> Result<()> {
        wire::write_matrix(
            &mut self.stream,
            matrix.data(),
            matrix.rows() as u32,
            matrix.columns() as u32,
        )
    }

    fn handle_echo(&mut self) -> Result<()> {
        let matrix = self.read_operand()?;
        self.write_result(&matrix)
    }

    fn handle_binop(&mut self, op: Op) -> Result<()> {
        let a = self.read_operand()?;
        let b = self.read_operand()?;
        let result = match op {
            Op::Add => {
                a.check_same_shape(&b)?;
                &a + &b
            }
            Op::Mul => {
                // b arrives already transposed; row lengths must agree.
                if a.columns() != b.columns() {
                    return Err(Error::ShapeMismatch {
                        left_rows: a.rows(),
                        left_columns: a.columns(),
                        right_rows: b.rows(),
                        right_columns: b.columns(),
                    });
                }
                mul_t(&a, &b)
            }
            _ => unreachable!(),
        };
        self.write_result(&result)
    }

    /// Read one ciphertext matrix: header, then one frame per row.
    fn read_ciphertext_matrix(&mut self) -> Result<(MatrixHeader, Vec<Vec<u8>>)> {
        let header = MatrixHeader::read_from(&mut self.stream)?;
        info!(
            "{}: received matrix [{} x {}]",
            self.peer, header.rows, header.columns
        );
        let rows = (0..header.rows)
            .map(|_| wire::read_frame(&mut self.stream))
            .collect::<Result<_>>()?;
        Ok((header, rows))
    }

    fn handle_homomorphic(&mut self, op: Op) -> Result<()> {
        use std::io::Read;

        let mut options = [0u8; CkksOptions::WIRE_SIZE];
        self.stream.read_exact(&mut options)?;
        let options = CkksOptions::from_bytes(&options);

        let key_bytes = wire::read_frame(&mut self.stream)?;
        let crypto = EvalCrypto::new(&options, &key_bytes)?;

        let (a_header, a_rows) = self.read_ciphertext_matrix()?;
        let (b_header, b_rows) = self.read_ciphertext_matrix()?;

        let result = match op {
            Op::HAdd => {
                if a_header != b_header {
                    return Err(Error::ShapeMismatch {
                        left_rows: a_header.rows as usize,
                        left_columns: a_header.columns as usize,
                        right_rows: b_header.rows as usize,
                        right_columns: b_header.columns as usize,
                    });
                }
                let mut out = Vec::with_capacity(a_rows.len());
                for (a, b) in a_rows.iter().zip(&b_rows) {
                    let sum = crypto.add(&crypto.read_ciphertext(a)?, &crypto.read_ciphertext(b)?)?;
                    out.push(crypto.write_ciphertext(&sum)?);
                }
                out
            }
            Op::HMul => {
                if a_header.columns != b_header.rows {
                    return Err(Error::ShapeMismatch {
                        left_rows: a_header.rows as usize,
                        left_columns: a_header.columns as usize,
                        right_rows: b_header.rows as usize,
                        right_columns: b_header.columns as usize,
                    });
                }
                let bt = b_rows
                    .iter()
                    .map(|bytes| crypto.read_ciphertext(bytes))
                    .collect::<Result<Vec<_>>>()?;
                let mut out = Vec::with_capacity(a_rows.len());
                for row in &a_rows {
                    let v = crypto.read_ciphertext(row)?;
                    let r = crypto.row_times_matrix(&v, &bt)?;
                    out.push(crypto.write_ciphertext(&r)?);
                }
                out
            }
            _ => unreachable!(),
        };

        // The response header advertises the left operand's shape; for the
        // square homomorphic product this equals the product's shape.
        MatrixHeader::new(a_header.rows, a_header.columns).write_to(&mut self.stream)?;
        for cipher in &result {
            wire::write_frame(&mut self.stream, cipher)?;
        }
        Ok(())
    }
}
