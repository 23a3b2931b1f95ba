//! `bex run` – execute backup jobs through the worker pool.

use anyhow::{bail, Result};
use bex_core::config::BexConfig;
use bex_core::execution::{ExecutionId, ExecutionState};
use bex_core::job;
use bex_core::pool::WorkerPool;
use bex_core::progress::ProgressSnapshot;
use bex_core::sink::LogSink;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const PROGRESS_INTERVAL_MS: u64 = 500;

pub async fn run_jobs(cfg: BexConfig, job_files: &[PathBuf], verify: bool) -> Result<()> {
    let pool = WorkerPool::new(cfg, Arc::new(LogSink));

    let mut ids: Vec<(ExecutionId, String)> = Vec::new();
    for path in job_files {
        let mut spec = job::load_spec(path)?;
        if verify {
            spec.verify_checksums = true;
        }
        let name = spec.name.clone();
        let id = pool.submit(spec)?;
        println!("queued {name} as execution {id}");
        ids.push((id, name));
    }

    let mut cancel_requested = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                eprintln!("\ninterrupt received, cancelling {} execution(s)", ids.len());
                for (id, _) in &ids {
                    pool.cancel(*id);
                }
                cancel_requested = true;
            }
            _ = tokio::time::sleep(Duration::from_millis(PROGRESS_INTERVAL_MS)) => {}
        }

        let mut all_done = true;
        for (id, name) in &ids {
            let Some(exec) = pool.execution(*id) else { continue };
            if exec.state.is_terminal() {
                continue;
            }
            all_done = false;
            if exec.state == ExecutionState::Running {
                if let Some(snap) = pool.progress(*id) {
                    print_progress(name, &snap);
                }
            }
        }
        if all_done {
            break;
        }
    }

    let mut failed = 0usize;
    for (id, name) in &ids {
        let Some(exec) = pool.execution(*id) else { continue };
        match exec.state {
            ExecutionState::Succeeded => {
                println!("{name}: succeeded ({} attempt(s))", exec.attempts);
            }
            state => {
                failed += 1;
                match &exec.error {
                    Some(err) => println!("{name}: {state} ({err})"),
                    None => println!("{name}: {state}"),
                }
            }
        }
    }
    if failed > 0 {
        bail!("{failed} execution(s) did not succeed");
    }
    Ok(())
}

fn print_progress(name: &str, snap: &ProgressSnapshot) {
    let done_mib = snap.bytes_done as f64 / 1_048_576.0;
    let total_mib = snap.total_bytes as f64 / 1_048_576.0;
    let pct = snap.fraction() * 100.0;
    let rate_mib = snap.bytes_per_sec / 1_048_576.0;
    let eta = snap
        .eta_secs()
        .map(|s| format!("{s:.0}s"))
        .unwrap_or_else(|| "?".to_string());
    println!(
        "  {name}: {done_mib:.1} / {total_mib:.1} MiB ({pct:.1}%)  {rate_mib:.2} MiB/s  ETA {eta}"
    );
}
