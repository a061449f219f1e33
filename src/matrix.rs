//! Dense row-major matrices over `f64`.

use std::fmt;
use std::ops::{Add, Mul, Range};

use rand::Rng;

use crate::error::{Error, Result};

/// Dense row-major matrix. The payload length is always `rows * columns`;
/// a matrix with zero rows keeps its column count so wire headers for empty
/// row slices stay meaningful.
#[derive(Clone, PartialEq)]
pub struct Matrix {
    data: Vec<f64>,
    columns: usize,
}

impl Matrix {
    /// Zero-filled `rows x columns` matrix.
    pub fn new(rows: usize, columns: usize) -> Self {
        Self {
            data: vec![0.0; rows * columns],
            columns,
        }
    }

    /// Wrap an existing row-major payload. `data.len()` must be a multiple of
    /// `columns` (or empty).
    pub fn from_vec(data: Vec<f64>, columns: usize) -> Self {
        assert!(
            (columns == 0 && data.is_empty()) || (columns > 0 && data.len() % columns == 0),
            "payload length {} does not fit column count {}",
            data.len(),
            columns
        );
        Self { data, columns }
    }

    /// Matrix with integer-valued entries drawn uniformly from `[-100, 100]`.
    /// Integer entries keep plaintext reference checks exact.
    pub fn random(rows: usize, columns: usize) -> Self {
        let mut rng = rand::thread_rng();
        let data = (0..rows * columns)
            .map(|_| rng.gen_range(-100..=100) as f64)
            .collect();
        Self { data, columns }
    }

    pub fn rows(&self) -> usize {
        if self.columns == 0 {
            0
        } else {
            self.data.len() / self.columns
        }
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// One row as a contiguous slice.
    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.columns..(row + 1) * self.columns]
    }

    /// Contiguous slice covering the half-open row range.
    pub fn row_slice(&self, rows: Range<usize>) -> &[f64] {
        &self.data[rows.start * self.columns..rows.end * self.columns]
    }

    pub fn at(&self, row: usize, column: usize) -> f64 {
        self.data[row * self.columns + column]
    }

    pub fn set(&mut self, row: usize, column: usize, value: f64) {
        self.data[row * self.columns + column] = value;
    }

    /// Overwrite rows starting at `first_row` with the given chunk.
    pub fn write_rows(&mut self, first_row: usize, chunk: &Matrix) {
        debug_assert_eq!(chunk.columns(), self.columns);
        let start = first_row * self.columns;
        self.data[start..start + chunk.len()].copy_from_slice(chunk.data());
    }

    pub fn transposed(&self) -> Matrix {
        let rows = self.rows();
        let mut out = Matrix::new(self.columns, rows);
        for i in 0..rows {
            for j in 0..self.columns {
                out.set(j, i, self.at(i, j));
            }
        }
        out
    }

    /// Fail unless both operands have identical shape.
    pub fn check_same_shape(&self, other: &Matrix) -> Result<()> {
        if self.rows() != other.rows() || self.columns != other.columns {
            return Err(Error::ShapeMismatch {
                left_rows: self.rows(),
                left_columns: self.columns,
                right_rows: other.rows(),
                right_columns: other.columns,
            });
        }
        Ok(())
    }
}

impl Add for &Matrix {
    type Output = Matrix;

    fn add(self, other: &Matrix) -> Matrix {
        assert_eq!(self.rows(), other.rows(), "incompatible matrices");
        assert_eq!(self.columns, other.columns, "incompatible matrices");
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| a + b)
            .collect();
        Matrix::from_vec(data, self.columns)
    }
}

impl Mul for &Matrix {
    type Output = Matrix;

    fn mul(self, other: &Matrix) -> Matrix {
        assert_eq!(self.columns, other.rows(), "incompatible matrices");
        let mut out = Matrix::new(self.rows(), other.columns());
        for i in 0..self.rows() {
            for j in 0..other.columns() {
                let mut acc = 0.0;
                for k in 0..self.columns {
                    acc += self.at(i, k) * other.at(k, j);
                }
                out.set(i, j, acc);
            }
        }
        out
    }
}

/// `A * transpose(Bt)` computed directly on the transposed layout:
/// `out[i][j] = sum_k A[i][k] * Bt[j][k]`. The worker receives `B` already
/// transposed, so this is its multiply workhorse.
pub fn mul_t(a: &Matrix, bt: &Matrix) -> Matrix {
    assert_eq!(a.columns(), bt.columns(), "incompatible matrices");
    let mut out = Matrix::new(a.rows(), bt.rows());
    for i in 0..a.rows() {
        let ai = a.row(i);
        for j in 0..bt.rows() {
            let acc = ai.iter().zip(bt.row(j)).map(|(x, y)| x * y).sum();
            out.set(i, j, acc);
        }
    }
    out
}

/// `|expected - actual|_1 / |expected|_1`. Zero expected norm yields zero
/// error for identical operands and infinity otherwise.
pub fn relative_l1_error(expected: &Matrix, actual: &Matrix) -> f64 {
    let diff: f64 = expected
        .data()
        .iter()
        .zip(actual.data())
        .map(|(e, a)| (e - a).abs())
        .sum();
    let norm: f64 = expected.data().iter().map(|e| e.abs()).sum();
    if norm == 0.0 {
        if diff == 0.0 {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        diff / norm
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{{")?;
        for i in 0..self.rows() {
            for j in 0..self.columns {
                write!(f, "{} ", self.at(i, j))?;
            }
            writeln!(f)?;
        }
        write!(f, "}}")
    }
}

impl fmt::Debug for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Matrix[{}x{}]{}", self.rows(), self.columns, self)
    }
}
