//! Grand-canonical hard-particle Monte Carlo from a YAML run description.

use color_eyre::eyre::Result;

mod app;
mod cli;
mod io;

use app::MuvtApplication;

fn main() -> Result<()> {
    color_eyre::install()?;
    MuvtApplication::from_cli()?.run()
}
