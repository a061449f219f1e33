use anyhow::Result;
use clap::Parser;

use dhmat::session;

#[derive(Parser, Debug)]
#[command(author, version, about = "Matrix compute worker")]
struct Args {
    /// TCP port to listen on (binds 0.0.0.0).
    port: u16,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    session::serve(args.port)?;
    Ok(())
}
