use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "muvt", about = "Grand-canonical Monte Carlo for hard particles")]
pub struct Args {
    /// Path to the YAML run description
    #[arg(short, long)]
    pub config_file: String,

    /// File receiving one line of particle counts per sweep
    #[arg(short, long)]
    pub output: Option<String>,

    /// Random seed (overrides the run description)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Number of sweeps (overrides the run description)
    #[arg(long)]
    pub sweeps: Option<u64>,

    /// Log every sweep
    #[arg(short, long)]
    pub verbose: bool,
}
