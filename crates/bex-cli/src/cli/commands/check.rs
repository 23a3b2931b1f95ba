//! `bex check` – preflight a job file without copying anything.

use anyhow::Result;
use bex_core::config::BexConfig;
use bex_core::job;
use bex_core::preflight::{self, VolumeProbe};
use bex_core::scan;
use std::path::Path;

pub fn run_check(cfg: &BexConfig, job_file: &Path) -> Result<()> {
    let spec = job::load_spec(job_file)?;
    let settings = spec.settings(cfg);

    let plan = scan::build_plan(&spec)?;
    println!(
        "{}: {} file(s), {:.1} MiB to copy",
        spec.name,
        plan.entries.len(),
        plan.total_bytes as f64 / 1_048_576.0
    );

    preflight::check_destination_writable(&spec.destination)?;
    preflight::check_space(
        &VolumeProbe,
        &spec.destination,
        plan.total_bytes,
        settings.min_free_space,
        0,
    )?;
    println!("destination {} is writable and has room", spec.destination.display());
    Ok(())
}
