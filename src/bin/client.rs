use anyhow::{bail, Result};
use clap::Parser;

use dhmat::ckks::CkksOptions;
use dhmat::matrix::relative_l1_error;
use dhmat::{ops, EncryptedProtocol, Matrix, Op, TcpProtocol};

#[derive(Parser, Debug)]
#[command(author, version, about = "Distributes matrix arithmetic across TCP workers")]
struct Args {
    /// Worker address ([host]:port). Repeatable; at least one is required.
    #[arg(short, long = "worker", required = true)]
    worker: Vec<String>,

    /// Operation to perform: echo, add, mul, hadd or hmul.
    #[arg(long, default_value = "echo")]
    op: Op,

    /// Height of matrix A.
    #[arg(long, default_value_t = 512)]
    ah: u32,

    /// Width of matrix A.
    #[arg(long, default_value_t = 512)]
    aw: u32,

    /// Height of matrix B.
    #[arg(long, default_value_t = 512)]
    bh: u32,

    /// Width of matrix B.
    #[arg(long, default_value_t = 512)]
    bw: u32,

    /// Use one value for all four dimensions.
    #[arg(long)]
    size: Option<u32>,

    /// Print matrix data after the run.
    #[arg(long)]
    show_data: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let (ah, aw, bh, bw) = match args.size {
        Some(n) => (n, n, n, n),
        None => (args.ah, args.aw, args.bh, args.bw),
    };

    match args.op {
        Op::Add | Op::HAdd if ah != bh || aw != bw => {
            bail!("incompatible matrix sizes for {}", args.op)
        }
        Op::Mul | Op::HMul if aw != bh => bail!("incompatible matrix sizes for {}", args.op),
        Op::HMul if ah != aw || bh != bw => {
            bail!("homomorphic multiply requires square matrices")
        }
        _ => {}
    }

    let mut tcp = TcpProtocol::new();
    for addr in &args.worker {
        tcp.add_worker(addr)?;
    }

    if args.op == Op::Echo {
        let a = Matrix::random(ah as usize, aw as usize);
        println!("echo: matrix [{} x {}]", a.rows(), a.columns());
        let result = ops::echo(&mut tcp, &a)?;
        if args.show_data {
            println!("input = {a}");
            println!("result = {result}");
        }
        if result != a {
            bail!("echo: data mismatch");
        }
        println!("echo: success");
        return Ok(());
    }

    let a = Matrix::random(ah as usize, aw as usize);
    let b = Matrix::random(bh as usize, bw as usize);
    println!(
        "{}: A [{} x {}], B [{} x {}]",
        args.op,
        a.rows(),
        a.columns(),
        b.rows(),
        b.columns()
    );

    let (result, expected) = match args.op {
        Op::Add => (ops::add(&mut tcp, &a, &b)?, &a + &b),
        Op::Mul => (ops::multiply(&mut tcp, &a, &b)?, &a * &b),
        Op::HAdd | Op::HMul => {
            // One ciphertext carries one row, so the slot count follows the
            // row width.
            let mut enc = EncryptedProtocol::new(tcp, CkksOptions::for_side(aw as usize))?;
            if args.op == Op::HAdd {
                (ops::add(&mut enc, &a, &b)?, &a + &b)
            } else {
                (ops::multiply(&mut enc, &a, &b)?, &a * &b)
            }
        }
        Op::Echo => unreachable!(),
    };

    if args.show_data {
        println!("A = {a}");
        println!("B = {b}");
        println!("result = {result}");
        println!("expected = {expected}");
    }

    match args.op {
        Op::Add | Op::Mul => {
            if result != expected {
                bail!("{}: incorrect result", args.op);
            }
            println!("{}: success", args.op);
        }
        _ => {
            let error = relative_l1_error(&expected, &result);
            println!("{}: relative error {error:.3e}", args.op);
        }
    }
    Ok(())
}
