use std::path::PathBuf;

use crate::finder::HandlerRegistry;
use crate::prelude::*;
use clap::Args;

#[derive(Debug, Args)]
pub struct CaptureArgs {
    /// Process to stop and record
    #[arg(long)]
    pub pid: i32,

    /// Where to write the dump
    #[arg(short, long)]
    pub output: PathBuf,
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub fn run(args: CaptureArgs, registry: &HandlerRegistry) -> Result<()> {
    let mut target = crate::target::LiveTarget::attach(args.pid)?;
    let pid = target.pid();
    let dump = crate::capture::capture_dump(&mut target, pid, registry)?;
    // resume the process before writing
    drop(target);

    dump.save_to(&args.output)?;
    info!(
        "Recorded {} threads of process {} to {}",
        dump.threads.len(),
        args.pid,
        args.output.display()
    );
    Ok(())
}

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
pub fn run(args: CaptureArgs, _registry: &HandlerRegistry) -> Result<()> {
    bail!("Capturing process {} requires Linux on x86_64", args.pid)
}
