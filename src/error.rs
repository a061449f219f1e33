//! Error types shared across the client and worker sides.

/// Errors produced by the protocol, the worker session, and the CKKS layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// Worker address string could not be parsed.
    #[error("worker address '{addr}': {reason}")]
    Address { addr: String, reason: &'static str },

    /// Operation tag on the wire is not one of the five known values.
    #[error("unknown operation tag {0}")]
    UnknownOp(u32),

    /// Operation name given on the command line is not recognized.
    #[error("invalid operation '{0}'")]
    InvalidOpName(String),

    /// Operation has no homomorphic counterpart.
    #[error("operation '{0}' cannot be run through the encryption proxy")]
    NotEncryptable(crate::wire::Op),

    #[error("no workers available")]
    NoWorkers,

    /// Each homomorphic product row lives in one ciphertext's slots, which
    /// ties every dimension to the slot count.
    #[error("homomorphic multiply requires square matrices of equal side")]
    NotSquare,

    #[error("mismatching matrix sizes: {left_rows}x{left_columns} vs {right_rows}x{right_columns}")]
    ShapeMismatch {
        left_rows: usize,
        left_columns: usize,
        right_rows: usize,
        right_columns: usize,
    },

    /// A worker returned a chunk whose shape does not match its work range.
    #[error("worker {worker} returned {rows}x{columns}, expected {expected_rows}x{expected_columns}")]
    BadChunk {
        worker: usize,
        rows: usize,
        columns: usize,
        expected_rows: usize,
        expected_columns: usize,
    },

    /// The 16-byte encryption options block does not describe a usable context.
    #[error("unusable encryption options: {0}")]
    BadOptions(&'static str),

    /// Public key material frame could not be split into its components.
    #[error("malformed public key material")]
    BadKeyMaterial,

    #[error("encryption backend: {0}")]
    Ckks(#[from] seal_fhe::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
