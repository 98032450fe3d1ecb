use std::path::PathBuf;

use crate::finder::{DeadlockFinder, HandlerRegistry, Report};
use crate::prelude::*;
use crate::target::RecordedTarget;
use clap::Args;

#[derive(Debug, Args)]
pub struct FindArgs {
    /// Process to stop and inspect
    #[arg(long, conflicts_with = "dump", required_unless_present = "dump")]
    pub pid: Option<i32>,

    /// Dump file written by `find-deadlock capture`
    #[arg(long)]
    pub dump: Option<PathBuf>,
}

pub fn run(args: FindArgs, registry: HandlerRegistry) -> Result<()> {
    let report = match (args.pid, args.dump) {
        (_, Some(dump)) => find_in_dump(&dump, registry)?,
        (Some(pid), None) => find_in_process(pid, registry)?,
        (None, None) => bail!("Either --pid or --dump is required"),
    };

    if report.is_empty() {
        info!("No thread to inspect");
    }
    print!("{report}");
    Ok(())
}

fn find_in_dump(path: &std::path::Path, registry: HandlerRegistry) -> Result<Report> {
    let target = RecordedTarget::from_file(path)?;
    debug!("Loaded dump of process {} from {}", target.dump().pid, path.display());
    Ok(DeadlockFinder::new(target, registry).find())
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
fn find_in_process(pid: i32, registry: HandlerRegistry) -> Result<Report> {
    let target = crate::target::LiveTarget::attach(pid)?;
    Ok(DeadlockFinder::new(target, registry).find())
}

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
fn find_in_process(pid: i32, _registry: HandlerRegistry) -> Result<Report> {
    bail!("Inspecting process {pid} requires Linux on x86_64, use --dump instead")
}
