//! excelctl command-line interface.
//!
//! Exit codes: 0 on success, 1 on any typed failure. Every failure is one
//! stderr line, with a remediation hint appended when the error has one.

use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use excelctl::prelude::*;

#[derive(Parser)]
#[command(name = "excelctl", version)]
#[command(about = "Drive a running Microsoft Excel instance from the command line")]
struct Cli {
    /// Verbose diagnostics on stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the version identifier
    Version,

    /// Acquire a host instance and print its pid and window handle
    Start {
        /// Make the host window visible
        #[arg(long)]
        visible: bool,

        /// Spawn a fresh isolated instance instead of reusing a shared one
        #[arg(long)]
        new: bool,
    },

    /// Tear down one or all host instances
    Stop {
        /// Target process id (defaults to nothing; use --all for every instance)
        pid: Option<String>,

        /// Discard unsaved changes instead of saving on close
        #[arg(long)]
        no_save: bool,

        /// Stop every instance reachable through the object table
        #[arg(long)]
        all: bool,

        /// OS-level termination; loses unsaved work
        #[arg(long)]
        force: bool,
    },

    /// List running host instances
    Status {
        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },

    /// Tune host performance flags
    Optimize(OptimizeArgs),

    /// Run a macro and print its return value
    RunMacro {
        /// Macro name, `Module.Routine` or bare
        name: String,

        /// Workbook (name or path) to qualify the macro with
        #[arg(long)]
        workbook: Option<String>,

        /// Comma-separated argument list
        #[arg(long)]
        args: Option<String>,

        /// Wall-clock deadline in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Manage VBA modules
    Vba {
        #[command(subcommand)]
        command: VbaCommand,
    },
}

#[derive(Args)]
struct OptimizeArgs {
    /// Mute display flags
    #[arg(long)]
    screen: bool,

    /// Switch calculation to manual
    #[arg(long)]
    calculation: bool,

    /// Mute the full flag group
    #[arg(long)]
    all: bool,

    /// Print the current flag values
    #[arg(long)]
    status: bool,

    /// Write previously saved values back
    #[arg(long)]
    restore: bool,

    /// Force a full recalculation (requires an open workbook)
    #[arg(long)]
    force_calculate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptimizeMode {
    Screen,
    Calculation,
    All,
    Status,
    Restore,
    ForceCalculate,
}

impl OptimizeArgs {
    /// Exactly one mode flag must be set.
    fn mode(&self) -> Result<OptimizeMode> {
        let selected = [
            (self.screen, OptimizeMode::Screen),
            (self.calculation, OptimizeMode::Calculation),
            (self.all, OptimizeMode::All),
            (self.status, OptimizeMode::Status),
            (self.restore, OptimizeMode::Restore),
            (self.force_calculate, OptimizeMode::ForceCalculate),
        ];
        let mut modes = selected.iter().filter(|(on, _)| *on).map(|(_, m)| *m);
        match (modes.next(), modes.next()) {
            (Some(mode), None) => Ok(mode),
            (None, _) => bail!(
                "choose one of --screen, --calculation, --all, --status, --restore, --force-calculate"
            ),
            (Some(_), Some(_)) => bail!("optimize flags are mutually exclusive"),
        }
    }
}

#[derive(Subcommand)]
enum VbaCommand {
    /// Import a module from a .bas/.cls/.frm file
    Import {
        file: PathBuf,

        /// Expected module type; must agree with the file extension
        #[arg(long, value_parser = ["standard", "class", "form"])]
        r#type: Option<String>,

        #[arg(long)]
        workbook: Option<String>,

        /// Replace an existing module with the same name
        #[arg(long)]
        overwrite: bool,
    },

    /// Export a module to a file
    Export {
        name: String,

        /// Destination file (defaults to the module name with its kind's extension)
        #[arg(long)]
        out: Option<PathBuf>,

        #[arg(long)]
        workbook: Option<String>,
    },

    /// List modules with kind and line counts
    List {
        #[arg(long)]
        workbook: Option<String>,

        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },

    /// Delete a module
    Delete {
        name: String,

        #[arg(long)]
        workbook: Option<String>,

        /// Accepted for interface stability; no additional effect
        #[arg(long)]
        force: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("excelctl=debug,info")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn report(err: &anyhow::Error) {
    let hint = err
        .downcast_ref::<Error>()
        .and_then(|e| e.remediation());
    match hint {
        Some(hint) => eprintln!("excelctl: {err:#} ({hint})"),
        None => eprintln!("excelctl: {err:#}"),
    }
}

#[cfg(windows)]
fn channel() -> Result<Rc<dyn HostChannel>> {
    let chan = excelctl_com::ComChannel::new().map_err(Error::from)?;
    Ok(Rc::new(chan))
}

#[cfg(not(windows))]
fn channel() -> Result<Rc<dyn HostChannel>> {
    bail!("this command drives Excel over COM and is only available on Windows")
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Version => {
            println!("excelctl {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Start { visible, new } => start(visible, new),
        Commands::Stop {
            pid,
            no_save,
            all,
            force,
        } => stop_cmd(pid, !no_save, all, force),
        Commands::Status { json } => status(json),
        Commands::Optimize(args) => optimize(args.mode()?),
        Commands::RunMacro {
            name,
            workbook,
            args,
            timeout,
        } => run_macro(&name, workbook.as_deref(), args.as_deref(), timeout),
        Commands::Vba { command } => vba(command),
    }
}

fn start(visible: bool, new: bool) -> Result<()> {
    let chan = channel()?;
    let host = Host::start(
        chan,
        HostOptions {
            visible,
            isolated: new,
        },
    )?;
    let descriptor = host.descriptor()?;
    println!("pid {} hwnd {:#x}", descriptor.pid, descriptor.hwnd);
    // The instance outlives this invocation; drop references only.
    host.detach();
    Ok(())
}

fn stop_cmd(pid: Option<String>, save: bool, all: bool, force: bool) -> Result<()> {
    if all && pid.is_some() {
        bail!("--all and an explicit PID are mutually exclusive");
    }
    let chan = channel()?;
    if all {
        let stopped = excelctl::stop_all(chan.as_ref(), save)?;
        println!("stopped {} instance(s): {:?}", stopped.len(), stopped);
        return Ok(());
    }
    let Some(pid) = pid else {
        bail!("give a PID or --all");
    };
    let pid: u32 = pid
        .parse()
        .map_err(|_| anyhow!("'{pid}' is not a process id"))?;
    if force {
        excelctl::force_kill(chan.as_ref(), pid)?;
        println!("killed {pid}");
    } else {
        excelctl::stop(chan.as_ref(), pid, save)?;
        println!("stopped {pid}");
    }
    Ok(())
}

fn status(json: bool) -> Result<()> {
    let chan = channel()?;
    let found = discover(chan.as_ref())?;
    if json {
        println!("{}", serde_json::to_string_pretty(&found)?);
        return Ok(());
    }
    if found.is_empty() {
        println!("no running host instances");
        return Ok(());
    }
    for p in found {
        println!(
            "pid {:>6}  hwnd {:#010x}  visible {:<5}  workbooks {}{}",
            p.pid,
            p.hwnd,
            p.visible,
            p.open_workbooks,
            if p.is_degraded() { "  (degraded)" } else { "" }
        );
    }
    Ok(())
}

fn optimize(mode: OptimizeMode) -> Result<()> {
    let chan = channel()?;
    let host = Host::attach_shared(chan).context("no running host instance to tune")?;
    let result = optimize_on(&host, mode);
    host.detach();
    result
}

fn optimize_on(host: &Host, mode: OptimizeMode) -> Result<()> {
    let group = match mode {
        OptimizeMode::Screen => SettingsGroup::Display,
        OptimizeMode::Calculation => SettingsGroup::Calculation,
        _ => SettingsGroup::Full,
    };
    let mut settings = host.settings(group);
    match mode {
        OptimizeMode::Status => {
            for (flag, value) in settings.current()? {
                println!("{flag} = {value}");
            }
        }
        OptimizeMode::Restore => {
            // Nothing persists between invocations; this fails typed unless
            // apply() ran earlier in the same process.
            settings.restore()?;
            println!("settings restored");
        }
        OptimizeMode::ForceCalculate => {
            host.calculate_full()?;
            println!("full recalculation done");
        }
        OptimizeMode::Screen | OptimizeMode::Calculation | OptimizeMode::All => {
            let snapshot = settings.apply()?;
            println!(
                "{} flag(s) tuned for batch work; prior values:",
                snapshot.saved.len()
            );
            for (flag, value) in &snapshot.saved {
                println!("  {flag} = {value}");
            }
        }
    }
    Ok(())
}

fn run_macro(
    name: &str,
    workbook: Option<&str>,
    args: Option<&str>,
    timeout: Option<u64>,
) -> Result<()> {
    let parsed = parse_macro_args(args.unwrap_or_default())?;
    let chan = channel()?;
    let host = Host::attach_shared(chan).context("no running host instance")?;
    let outcome = host
        .macros()
        .run(name, workbook, &parsed, timeout.map(Duration::from_secs));
    host.detach();
    let outcome = outcome?;
    if outcome.success {
        println!("{}", render_return(&outcome.value));
        Ok(())
    } else {
        bail!(
            "macro '{}' failed: {}",
            outcome.qualified_name,
            outcome.error_text.as_deref().unwrap_or("unknown host-script error")
        )
    }
}

fn vba(command: VbaCommand) -> Result<()> {
    let chan = channel()?;
    let host = Host::attach_shared(chan).context("no running host instance")?;
    let result = vba_on(&host, command);
    host.detach();
    result
}

fn vba_on(host: &Host, command: VbaCommand) -> Result<()> {
    match command {
        VbaCommand::Import {
            file,
            r#type,
            workbook,
            overwrite,
        } => {
            if let Some(expected) = r#type.as_deref() {
                let actual = ModuleKind::from_extension(&file)
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                if actual != expected {
                    bail!("--type {expected} does not match the file extension ({actual})");
                }
            }
            let wb = host.workbooks().resolve(workbook.as_deref())?;
            let info = wb.vba()?.import(&file, overwrite)?;
            println!("imported {} module '{}' ({} lines)", info.kind, info.name, info.lines);
        }
        VbaCommand::Export {
            name,
            out,
            workbook,
        } => {
            let wb = host.workbooks().resolve(workbook.as_deref())?;
            let vba = wb.vba()?;
            let modules = vba.list()?;
            let info = modules
                .iter()
                .find(|m| m.name.eq_ignore_ascii_case(&name))
                .ok_or_else(|| Error::ModuleMissing {
                    name: name.clone(),
                    workbook: wb.name().to_string(),
                    reason: None,
                })?;
            let extension = match info.kind {
                ModuleKind::Class => "cls",
                ModuleKind::Form => "frm",
                _ => "bas",
            };
            let dest = match out {
                Some(path) if path.is_dir() => path.join(format!("{}.{extension}", info.name)),
                Some(path) => path,
                None => PathBuf::from(format!("{}.{extension}", info.name)),
            };
            vba.export(&info.name, &dest)?;
            println!("exported '{}' to {}", info.name, dest.display());
        }
        VbaCommand::List { workbook, json } => {
            let wb = host.workbooks().resolve(workbook.as_deref())?;
            let modules = wb.vba()?.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&modules)?);
            } else {
                for m in modules {
                    println!(
                        "{:<31} {:<8} {:>6} lines{}",
                        m.name,
                        m.kind.to_string(),
                        m.lines,
                        if m.predeclared { "  predeclared" } else { "" }
                    );
                }
            }
        }
        VbaCommand::Delete {
            name,
            workbook,
            force,
        } => {
            let wb = host.workbooks().resolve(workbook.as_deref())?;
            wb.vba()?.delete(&name, force)?;
            println!("deleted '{name}'");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("excelctl").chain(args.iter().copied()))
    }

    #[test]
    fn test_stop_all_conflicts_with_pid() {
        let cli = parse(&["stop", "1234", "--all"]).unwrap();
        let Commands::Stop { pid, all, .. } = cli.command else {
            panic!("wrong command");
        };
        assert!(all);
        // The conflict itself is enforced in the handler so it exits 1, not 2.
        assert!(stop_cmd(pid, true, all, false).is_err());
    }

    #[test]
    fn test_stop_rejects_non_numeric_pid() {
        assert!(stop_cmd(Some("abc".to_string()), true, false, false).is_err());
    }

    #[test]
    fn test_optimize_flags_mutually_exclusive() {
        let cli = parse(&["optimize", "--screen", "--all"]).unwrap();
        let Commands::Optimize(args) = cli.command else {
            panic!("wrong command");
        };
        assert!(args.mode().is_err());

        let cli = parse(&["optimize", "--calculation"]).unwrap();
        let Commands::Optimize(args) = cli.command else {
            panic!("wrong command");
        };
        assert_eq!(args.mode().unwrap(), OptimizeMode::Calculation);

        let cli = parse(&["optimize"]).unwrap();
        let Commands::Optimize(args) = cli.command else {
            panic!("wrong command");
        };
        assert!(args.mode().is_err());
    }

    #[test]
    fn test_run_macro_parses_flags() {
        let cli = parse(&[
            "run-macro",
            "Module1.Main",
            "--workbook",
            "Book1.xlsm",
            "--args",
            "1,2.5,true",
            "--timeout",
            "30",
        ])
        .unwrap();
        let Commands::RunMacro {
            name,
            workbook,
            args,
            timeout,
        } = cli.command
        else {
            panic!("wrong command");
        };
        assert_eq!(name, "Module1.Main");
        assert_eq!(workbook.as_deref(), Some("Book1.xlsm"));
        assert_eq!(args.as_deref(), Some("1,2.5,true"));
        assert_eq!(timeout, Some(30));
    }

    #[test]
    fn test_vba_import_type_values() {
        assert!(parse(&["vba", "import", "m.bas", "--type", "standard"]).is_ok());
        assert!(parse(&["vba", "import", "m.bas", "--type", "document"]).is_err());
    }
}
