//! Logging setup and the per-sweep count trace.

use std::fs::File;
use std::io::{BufWriter, Write};

use color_eyre::eyre::{Result, WrapErr};
use muvt::ScanPoint;
use tracing::info;

pub fn setup_output(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}

/// Whitespace-separated particle counts, one row per sweep, or one row
/// per fugacity for a scan.
pub struct CountTrace {
    writer: Option<BufWriter<File>>,
}

impl CountTrace {
    /// `columns` names every column after the first; no file means no trace.
    pub fn create(path: Option<&String>, first: &str, columns: &[String]) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self { writer: None });
        };
        let file = File::create(path)
            .wrap_err_with(|| format!("Unable to create output file: {path}"))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "# {first} {}", columns.join(" "))?;
        info!("Particle counts will be written to: {}", path);
        Ok(Self {
            writer: Some(writer),
        })
    }

    pub fn record(&mut self, sweep: u64, counts: &[usize]) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            write!(writer, "{sweep}")?;
            for count in counts {
                write!(writer, " {count}")?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }

    pub fn record_point(&mut self, point: &ScanPoint) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writeln!(
                writer,
                "{:.6e} {:.6} {:.6} {:.6e}",
                point.fugacity,
                point.mean_count,
                point.count_std(),
                point.density
            )?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}
