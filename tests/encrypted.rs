//! End-to-end homomorphic operations against real worker sessions.
//!
//! CKKS is approximate, so results are checked against the plaintext
//! reference under the loose 1e-2 relative L1 tolerance.

use std::net::TcpListener;
use std::thread;

use rand::Rng;

use dhmat::ckks::CkksOptions;
use dhmat::matrix::relative_l1_error;
use dhmat::{ops, session, EncryptedProtocol, Error, Matrix, TcpProtocol};

fn connect_workers(count: usize) -> TcpProtocol {
    let mut protocol = TcpProtocol::new();
    for _ in 0..count {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let _ = session::serve_on(listener);
        });
        protocol.add_worker(&format!("127.0.0.1:{port}")).unwrap();
    }
    protocol
}

fn random_int_matrix(rows: usize, columns: usize, bound: i32) -> Matrix {
    let mut rng = rand::thread_rng();
    let data = (0..rows * columns)
        .map(|_| rng.gen_range(-bound..=bound) as f64)
        .collect();
    Matrix::from_vec(data, columns)
}

fn assert_close(expected: &Matrix, actual: &Matrix) {
    assert_eq!(actual.rows(), expected.rows());
    assert_eq!(actual.columns(), expected.columns());
    let error = relative_l1_error(expected, actual);
    assert!(error < 1e-2, "relative error {error}");
}

#[test]
fn hadd_matches_plain_sum() {
    let tcp = connect_workers(2);
    let mut protocol = EncryptedProtocol::new(tcp, CkksOptions::for_side(8)).unwrap();
    let a = random_int_matrix(8, 8, 50);
    let b = random_int_matrix(8, 8, 50);
    let result = ops::add(&mut protocol, &a, &b).unwrap();
    assert_close(&(&a + &b), &result);
}

#[test]
fn hadd_is_independent_of_worker_count() {
    let a = random_int_matrix(6, 8, 20);
    let b = random_int_matrix(6, 8, 20);
    let expected = &a + &b;
    for workers in [1, 3] {
        let tcp = connect_workers(workers);
        let mut protocol = EncryptedProtocol::new(tcp, CkksOptions::for_side(8)).unwrap();
        let result = ops::add(&mut protocol, &a, &b).unwrap();
        assert_close(&expected, &result);
    }
}

#[test]
fn hmul_side_4_single_worker() {
    let tcp = connect_workers(1);
    let options = CkksOptions::for_side(4);
    assert_eq!(options.m, 16);
    let mut protocol = EncryptedProtocol::new(tcp, options).unwrap();
    let a = random_int_matrix(4, 4, 3);
    let b = random_int_matrix(4, 4, 3);
    let result = ops::multiply(&mut protocol, &a, &b).unwrap();
    assert_close(&(&a * &b), &result);
}

#[test]
fn hmul_side_8_two_workers() {
    let tcp = connect_workers(2);
    let mut protocol = EncryptedProtocol::new(tcp, CkksOptions::for_side(8)).unwrap();
    let a = random_int_matrix(8, 8, 3);
    let b = random_int_matrix(8, 8, 3);
    let result = ops::multiply(&mut protocol, &a, &b).unwrap();
    assert_close(&(&a * &b), &result);
}

#[test]
#[ignore = "large kernel, takes minutes"]
fn hmul_side_16() {
    let tcp = connect_workers(2);
    let mut protocol = EncryptedProtocol::new(tcp, CkksOptions::for_side(16)).unwrap();
    let a = random_int_matrix(16, 16, 3);
    let b = random_int_matrix(16, 16, 3);
    let result = ops::multiply(&mut protocol, &a, &b).unwrap();
    assert_close(&(&a * &b), &result);
}

#[test]
fn hmul_rejects_non_square_operands() {
    let tcp = connect_workers(1);
    let mut protocol = EncryptedProtocol::new(tcp, CkksOptions::for_side(8)).unwrap();
    let a = random_int_matrix(4, 8, 3);
    let b = random_int_matrix(8, 8, 3);
    assert!(matches!(
        ops::multiply(&mut protocol, &a, &b),
        Err(Error::NotSquare)
    ));
}

#[test]
fn echo_has_no_homomorphic_counterpart() {
    let tcp = connect_workers(1);
    let mut protocol = EncryptedProtocol::new(tcp, CkksOptions::for_side(4)).unwrap();
    let a = random_int_matrix(4, 4, 3);
    assert!(matches!(
        ops::echo(&mut protocol, &a),
        Err(Error::NotEncryptable(dhmat::Op::Echo))
    ));
}
