mod check;
mod run;

pub use check::run_check;
pub use run::run_jobs;
