use clap::Parser;
use color_eyre::eyre::{bail, eyre, Result, WrapErr};
use muvt::overlap::find_overlap;
use muvt::{fugacity_scan, GibbsDriver, MoveKind, RunConfig, UpdaterMuVT};
use shapes::AnyShape;
use tracing::{debug, info};

use crate::cli::Args;
use crate::io::{setup_output, CountTrace};

pub struct MuvtApplication {
    args: Args,
    config: RunConfig,
}

impl MuvtApplication {
    pub fn from_cli() -> Result<Self> {
        let args = Args::parse();
        let config = load_config(&args)?;
        Ok(Self { args, config })
    }

    pub fn run(self) -> Result<()> {
        setup_output(self.args.verbose);
        info!("Run description loaded from: {}", self.args.config_file);

        match RunMode::determine(&self.config) {
            RunMode::SingleBox => self.run_single_box(),
            RunMode::TwoBox => self.run_two_box(),
            RunMode::Scan => self.run_scan(),
        }
    }

    fn type_names(&self) -> Vec<String> {
        self.config.species.iter().map(|s| s.name.clone()).collect()
    }

    fn run_single_box(&self) -> Result<()> {
        let mut updater = self.config.build_updater(false)?;
        let names = self.type_names();
        let mut trace = CountTrace::create(self.args.output.as_ref(), "sweep", &names)?;
        info!(
            volume = updater.state().volume(),
            initial = ?updater.state().counts(),
            "Single-box run"
        );

        for _ in 0..self.config.sweeps {
            let report = updater.sweep()?;
            trace.record(report.sweep, &report.counts)?;
            if (report.sweep + 1) % self.config.output.report_interval == 0 {
                info!(
                    sweep = report.sweep + 1,
                    counts = ?report.counts,
                    insertion = report.counters.acceptance_rate(MoveKind::Insertion),
                    deletion = report.counters.acceptance_rate(MoveKind::Deletion),
                    "Progress"
                );
            } else {
                debug!(sweep = report.sweep, counts = ?report.counts, "Sweep");
            }
        }
        trace.finish()?;

        self.report_free_volume(&updater)?;
        let labels: Vec<&str> = names.iter().map(String::as_str).collect();
        updater.counters().print_summary(&labels);
        if let Some((a, b)) = find_overlap(updater.state()) {
            bail!("Final configuration has overlapping particles {a:?} and {b:?}");
        }
        Ok(())
    }

    fn report_free_volume(&self, updater: &UpdaterMuVT<AnyShape>) -> Result<()> {
        let samples = self.config.output.free_volume_samples;
        if samples == 0 {
            return Ok(());
        }
        for (index, depletant) in updater.estimator().depletants().iter().enumerate() {
            let fraction = updater.free_volume_fraction(index, samples)?;
            info!(depletant = %depletant.name, fraction, samples, "Depletant free volume");
        }
        Ok(())
    }

    fn run_two_box(&self) -> Result<()> {
        let mut driver: GibbsDriver = self.config.build_driver()?;
        let names = self.type_names();
        let columns: Vec<String> = ["first", "second"]
            .iter()
            .flat_map(|b| names.iter().map(move |n| format!("{b}:{n}")))
            .collect();
        let mut trace = CountTrace::create(self.args.output.as_ref(), "sweep", &columns)?;

        for _ in 0..self.config.sweeps {
            let report = driver.sweep()?;
            let counts: Vec<usize> = report
                .boxes
                .iter()
                .flat_map(|b| b.counts.iter().copied())
                .collect();
            trace.record(report.sweep, &counts)?;
            if (report.sweep + 1) % self.config.output.report_interval == 0 {
                info!(
                    sweep = report.sweep + 1,
                    first = ?report.boxes[0].counts,
                    second = ?report.boxes[1].counts,
                    transfer = report.transfers.acceptance_rate(MoveKind::Transfer),
                    "Progress"
                );
            }
        }
        trace.finish()?;

        let labels: Vec<&str> = names.iter().map(String::as_str).collect();
        let [first, second] = driver.box_counters()?;
        println!("\n--- First box ---");
        first.print_summary(&labels);
        println!("\n--- Second box ---");
        second.print_summary(&labels);
        println!("\n--- Transfers ---");
        driver.transfer_counters().print_summary(&labels);

        for (index, overlap) in driver.verify()?.iter().enumerate() {
            if let Some((a, b)) = overlap {
                bail!("Box {index} ends with overlapping particles {a:?} and {b:?}");
            }
        }
        Ok(())
    }

    fn run_scan(&self) -> Result<()> {
        let scan = self
            .config
            .scan
            .as_ref()
            .ok_or_else(|| eyre!("No scan section in the run description"))?;
        let type_id = self
            .config
            .type_id(&scan.species)
            .ok_or_else(|| eyre!("Unknown scan species '{}'", scan.species))?;
        let base = self.config.build_updater(false)?;
        let points = fugacity_scan(
            &base,
            type_id,
            &scan.fugacities,
            scan.equilibration,
            self.config.sweeps,
        )?;

        let columns = ["mean_count", "count_std", "density"].map(String::from);
        let mut trace = CountTrace::create(self.args.output.as_ref(), "fugacity", &columns)?;
        for point in &points {
            point.print_summary();
            trace.record_point(point)?;
        }
        trace.finish()
    }
}

fn load_config(args: &Args) -> Result<RunConfig> {
    let mut config = RunConfig::from_file(&args.config_file)
        .wrap_err_with(|| format!("Unable to load run description: {}", args.config_file))?;
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(sweeps) = args.sweeps {
        config.sweeps = sweeps;
    }
    Ok(config)
}

enum RunMode {
    SingleBox,
    TwoBox,
    Scan,
}

impl RunMode {
    fn determine(config: &RunConfig) -> Self {
        if config.partner_box.is_some() {
            RunMode::TwoBox
        } else if config.scan.is_some() {
            RunMode::Scan
        } else {
            RunMode::SingleBox
        }
    }
}
