mod cli;
mod emitter;
mod paths;
mod run;
mod scene;

use anyhow::Result;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();
    run::run(cli)
}
