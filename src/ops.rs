//! Client-side operation drivers: split, start, offload, collect.

use log::debug;

use crate::error::{Error, Result};
use crate::matrix::Matrix;
use crate::protocol::Protocol;
use crate::split::RowSplit;
use crate::wire::Op;

fn start_all<P: Protocol + ?Sized>(protocol: &mut P, op: Op) -> Result<usize> {
    let workers = protocol.worker_count();
    if workers == 0 {
        return Err(Error::NoWorkers);
    }
    for worker in 0..workers {
        protocol.start(worker, op)?;
    }
    Ok(workers)
}

/// Wait for every worker in id order and place each chunk at its fixed row
/// offset. The output slot mapping is decided before any I/O, so assembly is
/// deterministic regardless of how responses interleave on the wire.
fn collect<P: Protocol + ?Sized>(
    protocol: &mut P,
    split: &RowSplit,
    rows: usize,
    columns: usize,
) -> Result<Matrix> {
    let mut result = Matrix::new(rows, columns);
    for worker in 0..protocol.worker_count() {
        let range = split.range(worker);
        let chunk = protocol.wait_result(worker)?;
        if chunk.rows() != range.size() || chunk.columns() != columns {
            return Err(Error::BadChunk {
                worker,
                rows: chunk.rows(),
                columns: chunk.columns(),
                expected_rows: range.size(),
                expected_columns: columns,
            });
        }
        result.write_rows(range.first, &chunk);
    }
    Ok(result)
}

/// Round-trip `a` through the workers unchanged.
pub fn echo<P: Protocol + ?Sized>(protocol: &mut P, a: &Matrix) -> Result<Matrix> {
    let workers = start_all(protocol, Op::Echo)?;
    let split = RowSplit::new(a.rows(), workers);
    debug!("echo: {} rows over {workers} workers", a.rows());
    for worker in 0..workers {
        let range = split.range(worker);
        protocol.offload(
            worker,
            a.row_slice(range.first..range.last),
            range.size() as u32,
            a.columns() as u32,
        )?;
    }
    collect(protocol, &split, a.rows(), a.columns())
}

/// Distributed `a + b` for equal-shaped operands.
pub fn add<P: Protocol + ?Sized>(protocol: &mut P, a: &Matrix, b: &Matrix) -> Result<Matrix> {
    a.check_same_shape(b)?;
    let workers = start_all(protocol, Op::Add)?;
    let split = RowSplit::new(a.rows(), workers);
    debug!("add: {} rows over {workers} workers", a.rows());
    for worker in 0..workers {
        let range = split.range(worker);
        for operand in [a, b] {
            protocol.offload(
                worker,
                operand.row_slice(range.first..range.last),
                range.size() as u32,
                operand.columns() as u32,
            )?;
        }
    }
    collect(protocol, &split, a.rows(), a.columns())
}

/// Distributed `a * b`. The right operand is transposed once and shipped
/// whole to every worker, which computes its row slice of the product on the
/// transposed layout. The homomorphic path additionally requires both
/// operands square with equal side, since each output row lives in the slots
/// of a single ciphertext.
pub fn multiply<P: Protocol + ?Sized>(protocol: &mut P, a: &Matrix, b: &Matrix) -> Result<Matrix> {
    if a.columns() != b.rows() {
        return Err(Error::ShapeMismatch {
            left_rows: a.rows(),
            left_columns: a.columns(),
            right_rows: b.rows(),
            right_columns: b.columns(),
        });
    }
    if protocol.encrypted()
        && !(a.rows() == a.columns() && b.rows() == b.columns() && a.rows() == b.rows())
    {
        return Err(Error::NotSquare);
    }

    let workers = start_all(protocol, Op::Mul)?;
    let bt = b.transposed();
    let split = RowSplit::new(a.rows(), workers);
    debug!("mul: {} rows over {workers} workers", a.rows());
    for worker in 0..workers {
        let range = split.range(worker);
        protocol.offload(
            worker,
            a.row_slice(range.first..range.last),
            range.size() as u32,
            a.columns() as u32,
        )?;
        protocol.offload_matrix(worker, &bt)?;
    }
    collect(protocol, &split, a.rows(), b.columns())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::mul_t;

    /// In-memory stand-in for a set of workers; applies each request locally
    /// so driver splitting and reassembly can be checked without sockets.
    struct LoopbackProtocol {
        workers: usize,
        pending: Vec<Option<(Op, Vec<Matrix>)>>,
    }

    impl LoopbackProtocol {
        fn new(workers: usize) -> Self {
            Self {
                workers,
                pending: (0..workers).map(|_| None).collect(),
            }
        }
    }

    impl Protocol for LoopbackProtocol {
        fn worker_count(&self) -> usize {
            self.workers
        }

        fn start(&mut self, worker: usize, op: Op) -> Result<()> {
            self.pending[worker] = Some((op, Vec::new()));
            Ok(())
        }

        fn offload(&mut self, worker: usize, data: &[f64], _rows: u32, columns: u32) -> Result<()> {
            let (_, operands) = self.pending[worker].as_mut().expect("start before offload");
            operands.push(Matrix::from_vec(data.to_vec(), columns as usize));
            Ok(())
        }

        fn wait_result(&mut self, worker: usize) -> Result<Matrix> {
            let (op, operands) = self.pending[worker].take().expect("nothing offloaded");
            Ok(match op {
                Op::Echo => operands[0].clone(),
                Op::Add => &operands[0] + &operands[1],
                Op::Mul => mul_t(&operands[0], &operands[1]),
                other => panic!("loopback cannot serve {other}"),
            })
        }

        fn send_raw(&mut self, _worker: usize, _bytes: &[u8]) -> Result<()> {
            unimplemented!("loopback has no raw channel")
        }

        fn receive_raw(&mut self, _worker: usize, _len: usize) -> Result<Vec<u8>> {
            unimplemented!("loopback has no raw channel")
        }
    }

    #[test]
    fn echo_reassembles_in_order() {
        for workers in [1, 2, 3, 5] {
            let mut protocol = LoopbackProtocol::new(workers);
            let a = Matrix::random(7, 3);
            assert_eq!(echo(&mut protocol, &a).unwrap(), a, "N={workers}");
        }
    }

    #[test]
    fn add_matches_reference() {
        let mut protocol = LoopbackProtocol::new(3);
        let a = Matrix::random(10, 4);
        let b = Matrix::random(10, 4);
        assert_eq!(add(&mut protocol, &a, &b).unwrap(), &a + &b);
    }

    #[test]
    fn multiply_matches_reference_including_non_square() {
        let mut protocol = LoopbackProtocol::new(2);
        let a = Matrix::random(5, 3);
        let b = Matrix::random(3, 6);
        assert_eq!(multiply(&mut protocol, &a, &b).unwrap(), &a * &b);
    }

    #[test]
    fn result_is_independent_of_worker_count() {
        let a = Matrix::random(9, 9);
        let b = Matrix::random(9, 9);
        let reference = &a * &b;
        for workers in [1, 2, 3, 5] {
            let mut protocol = LoopbackProtocol::new(workers);
            assert_eq!(multiply(&mut protocol, &a, &b).unwrap(), reference);
        }
    }

    #[test]
    fn no_workers_is_a_configuration_error() {
        let mut protocol = LoopbackProtocol::new(0);
        let a = Matrix::random(2, 2);
        assert!(matches!(echo(&mut protocol, &a), Err(Error::NoWorkers)));
    }

    #[test]
    fn add_rejects_mismatched_shapes() {
        let mut protocol = LoopbackProtocol::new(1);
        let a = Matrix::random(2, 2);
        let b = Matrix::random(3, 2);
        assert!(matches!(
            add(&mut protocol, &a, &b),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn multiply_rejects_inner_dimension_mismatch() {
        let mut protocol = LoopbackProtocol::new(1);
        let a = Matrix::random(2, 3);
        let b = Matrix::random(4, 2);
        assert!(multiply(&mut protocol, &a, &b).is_err());
    }
}
