pub mod ckks;
pub mod encrypted;
pub mod error;
pub mod matrix;
pub mod ops;
pub mod protocol;
pub mod session;
pub mod split;
pub mod wire;

pub use encrypted::EncryptedProtocol;
pub use error::{Error, Result};
pub use matrix::Matrix;
pub use protocol::{Protocol, TcpProtocol};
pub use wire::Op;
