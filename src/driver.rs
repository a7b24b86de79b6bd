use std::{fs::File, io::BufWriter, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    boundary::set_unguarded_policy,
    entry::{Args, EntryPoint},
    error::Result,
    options::RuntimeOptions,
    termination::{set_capture_backtrace, Outcome},
};

/// Outcome of one run of the entry point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationReport {
    pub iteration: usize,
    pub outcome: Outcome,
}

/// Runs a renamed entry point repeatedly, each time under its own catch
/// boundary.
#[derive(Debug)]
pub struct Driver {
    entry: EntryPoint,
    program: String,
    args: Vec<String>,
    iterations: usize,
}

impl Driver {
    /// `program` is what the target sees as `argv[0]`.
    ///
    /// # Safety
    /// `entry` is called with an argument vector built from `program` and
    /// [`Driver::args`]; it must be sound to do so.
    pub unsafe fn new(entry: EntryPoint, program: impl Into<String>) -> Self {
        Driver {
            entry,
            program: program.into(),
            args: Vec::new(),
            iterations: 1,
        }
    }

    /// Arguments passed after `argv[0]`
    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = args;

        self
    }

    pub fn iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;

        self
    }

    /// Runs one iteration. Arguments are rebuilt every time so the target
    /// cannot see what a previous run wrote into them.
    pub fn run_once(&self, iteration: usize) -> Result<IterationReport> {
        let mut args = Args::new(std::iter::once(&self.program).chain(&self.args).cloned())?;
        if matches!(self.entry, EntryPoint::Envp(_)) {
            args = args.with_current_env()?;
        }

        let outcome = unsafe { self.entry.run(&mut args) };
        match &outcome {
            Outcome::Returned(code) => log::info!("iteration {iteration}: returned {code}"),
            Outcome::Terminated(termination) => {
                log::info!("iteration {iteration}: intercepted {termination}")
            }
        }

        Ok(IterationReport { iteration, outcome })
    }

    pub fn run(&self) -> Result<Vec<IterationReport>> {
        (0..self.iterations)
            .map(|iteration| self.run_once(iteration))
            .collect()
    }
}

pub fn write_report(path: &Path, reports: &[IterationReport]) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, reports)?;

    Ok(())
}

/// Applies `options`, resolves the entry point and runs it.
///
/// # Safety
/// The symbol named by `options.entry_symbol` must have the parameter list
/// given by `options.signature`.
pub unsafe fn run_with_options(
    program: String,
    options: RuntimeOptions,
) -> Result<Vec<IterationReport>> {
    set_capture_backtrace(options.backtrace);
    set_unguarded_policy(options.on_unguarded);

    let entry = EntryPoint::resolve(&options.entry_symbol, options.signature)?;
    log::debug!("resolved {} as {entry:?}", options.entry_symbol);

    let reports = Driver::new(entry, program)
        .args(options.target_args)
        .iterations(options.iterations)
        .run()?;

    if let Some(path) = options.report.as_deref() {
        write_report(path, &reports)?;
    }

    Ok(reports)
}

/// Harness entry point. The target's own `main` has been renamed by the
/// pre-include header and is looked up by name.
#[cfg(all(feature = "main_entrypoint", not(test)))]
#[no_mangle]
extern "C" fn main(
    argc: std::os::raw::c_int,
    argv: *const *const std::os::raw::c_char,
) -> std::os::raw::c_int {
    use std::ffi::CStr;

    use clap::Parser;

    env_logger::init();

    let args: Vec<String> = (0..argc.max(0) as usize)
        .map(|i| unsafe { *argv.add(i) })
        .take_while(|arg| !arg.is_null())
        .map(|arg| unsafe { CStr::from_ptr(arg) }.to_string_lossy().into_owned())
        .collect();

    let options = RuntimeOptions::parse_from(&args);
    let program = args.first().cloned().unwrap_or_else(|| "noexit".to_owned());

    match unsafe { run_with_options(program, options) } {
        Ok(reports) => {
            let terminated = reports.iter().filter(|r| r.outcome.is_terminated()).count();
            log::info!(
                "{} iterations, {terminated} intercepted terminations",
                reports.len()
            );
            0
        }
        Err(err) => {
            log::error!("{err}");
            1
        }
    }
}
