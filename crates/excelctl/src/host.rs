//! Host process ownership: scoped acquisition and the teardown protocol.
//!
//! The host's own `Quit` verb is never used: on this platform it raises an
//! unrecoverable cross-process disconnection mid-call. Teardown instead
//! closes every workbook, drops the application reference, and runs the
//! channel's finalizer pass, in that order.

use std::rc::Rc;

use tracing::{debug, warn};

use excelctl_core::{Error, HostChannel, HostProcess, ObjId, Result, SettingsGroup, Value};

use crate::directory;
use crate::run::MacroRunner;
use crate::settings::Settings;
use crate::workbooks::Workbooks;

/// Acquisition options.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostOptions {
    /// Make the host window visible.
    pub visible: bool,
    /// Spawn a fresh isolated instance instead of reusing a shared one.
    pub isolated: bool,
}

/// An owned or attached host process.
///
/// Scoped acquisition ([`Host::start`]) owns the process: exactly one
/// teardown path ever runs: explicit [`shutdown`](Host::shutdown) wins, and
/// `Drop` covers the rest with save intent `false`. Attachment
/// ([`Host::attach_shared`] and friends) borrows a process someone else
/// owns: leaving the scope releases the cross-process references and nothing
/// else. Either way, after the handle closes every method fails fast with a
/// connection-lost error and the channel is never touched again through it.
pub struct Host {
    chan: Rc<dyn HostChannel>,
    app: std::cell::Cell<Option<ObjId>>,
    /// Whether drop runs the full teardown protocol or a bare detach.
    scoped: bool,
}

impl Host {
    /// Acquire a host: reuse the shared instance when there is one, spawn a
    /// fresh process otherwise. `isolated` skips the reuse attempt.
    pub fn start(chan: Rc<dyn HostChannel>, options: HostOptions) -> Result<Self> {
        let app = if options.isolated {
            chan.acquire_new(options.visible)?
        } else {
            match chan.acquire_shared() {
                Ok(app) => {
                    if options.visible {
                        // Shared instances keep their own visibility unless
                        // the caller asked for a window.
                        let _ = chan.put(app, "Visible", &Value::Bool(true));
                    }
                    app
                }
                Err(e) => {
                    debug!("no shared instance ({e}); spawning a new one");
                    chan.acquire_new(options.visible)?
                }
            }
        };
        Ok(Self {
            chan,
            app: std::cell::Cell::new(Some(app)),
            scoped: true,
        })
    }

    /// Attach to the shared running instance without taking ownership.
    pub fn attach_shared(chan: Rc<dyn HostChannel>) -> Result<Self> {
        let app = chan.acquire_shared()?;
        Ok(Self {
            chan,
            app: std::cell::Cell::new(Some(app)),
            scoped: false,
        })
    }

    /// Attach to a specific running instance by pid.
    pub fn attach_pid(chan: Rc<dyn HostChannel>, pid: u32) -> Result<Self> {
        let app = chan.connect_by_pid(pid)?;
        Ok(Self {
            chan,
            app: std::cell::Cell::new(Some(app)),
            scoped: false,
        })
    }

    /// Attach to a specific running instance by top-level window handle.
    pub fn attach_handle(chan: Rc<dyn HostChannel>, hwnd: isize) -> Result<Self> {
        let app = chan.connect_by_handle(hwnd)?;
        Ok(Self {
            chan,
            app: std::cell::Cell::new(Some(app)),
            scoped: false,
        })
    }

    /// Release the cross-process references and close the handle without
    /// touching the host's documents. The process keeps running.
    pub fn detach(&self) {
        if let Some(app) = self.app.take() {
            self.chan.release(app);
            self.chan.release_all();
        }
    }

    pub(crate) fn chan(&self) -> &dyn HostChannel {
        self.chan.as_ref()
    }

    /// The live application object, or the typed not-started error.
    pub(crate) fn app(&self) -> Result<ObjId> {
        self.app.get().ok_or_else(Error::closed)
    }

    pub fn is_open(&self) -> bool {
        self.app.get().is_some()
    }

    /// Descriptor of the owned process.
    pub fn descriptor(&self) -> Result<HostProcess> {
        let app = self.app()?;
        directory::describe(self.chan(), app)
    }

    pub fn workbooks(&self) -> Workbooks<'_> {
        Workbooks::new(self)
    }

    pub fn macros(&self) -> MacroRunner<'_> {
        MacroRunner::new(self)
    }

    pub fn settings(&self, group: SettingsGroup) -> Settings<'_> {
        Settings::new(self, group)
    }

    /// Force a full recalculation. Requires an open workbook.
    pub fn calculate_full(&self) -> Result<()> {
        let app = self.app()?;
        // Resolving the active workbook is the "is there anything to
        // calculate" check; it fails typed when nothing is open.
        let wb = self.workbooks().active()?;
        drop(wb);
        self.chan().call(app, "CalculateFull", &[])?;
        Ok(())
    }

    /// Tear the owned process down. Safe to call more than once; the second
    /// and later calls are no-ops.
    pub fn shutdown(&self, save: bool) -> Result<()> {
        let Some(app) = self.app.take() else {
            return Ok(());
        };
        run_teardown(self.chan(), app, save);
        Ok(())
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        if let Some(app) = self.app.take() {
            if self.scoped {
                run_teardown(self.chan.as_ref(), app, false);
            } else {
                self.chan.release(app);
                self.chan.release_all();
            }
        }
    }
}

/// The teardown protocol. Steps must not be reordered:
///
/// 1. mute host prompts,
/// 2. snapshot the workbook collection and close each one (per-workbook
///    failures are swallowed, the loop continues),
/// 3. drop the strong application reference,
/// 4. run the finalizer pass over every outstanding reference,
/// 5. the caller marks the handle closed.
pub(crate) fn run_teardown(chan: &dyn HostChannel, app: ObjId, save: bool) {
    debug!(save, "tearing down host instance");

    if let Err(e) = chan.put(app, "DisplayAlerts", &Value::Bool(false)) {
        debug!("could not mute host prompts: {e}");
    }

    match chan.get(app, "Workbooks") {
        Ok(Value::Object(workbooks)) => {
            let count = chan
                .get(workbooks, "Count")
                .ok()
                .and_then(|v| v.as_i32())
                .unwrap_or(0);
            let mut snapshot = Vec::new();
            for i in 1..=count {
                match chan.get_indexed(workbooks, "Item", &[Value::Int(i)]) {
                    Ok(Value::Object(wb)) => snapshot.push(wb),
                    Ok(_) => {}
                    Err(e) => debug!("skipping unreadable workbook {i}: {e}"),
                }
            }
            for wb in snapshot {
                if let Err(e) = chan.call(wb, "Close", &[Value::Bool(save)]) {
                    debug!("workbook close failed during teardown: {e}");
                }
                chan.release(wb);
            }
            chan.release(workbooks);
        }
        Ok(_) => {}
        Err(e) => debug!("workbook collection unreadable during teardown: {e}"),
    }

    chan.release(app);
    chan.release_all();
}

/// Tear down the instance with the given pid.
///
/// A pid that is alive in the task listing but missing from the object table
/// is a disconnected instance: there is no reference to tear down, which is a
/// cross-process failure, not a not-found.
pub fn stop(chan: &dyn HostChannel, pid: u32, save: bool) -> Result<()> {
    let instances = directory::rich_instances(chan)?;
    let mut target = None;
    for (obj, descriptor) in instances {
        if descriptor.pid == pid && target.is_none() {
            target = Some(obj);
        } else {
            chan.release(obj);
        }
    }

    match target {
        Some(obj) => {
            run_teardown(chan, obj, save);
            Ok(())
        }
        None => {
            let tasks = chan.enumerate_task_list()?;
            if tasks.contains(&pid) {
                Err(Error::RpcFailure {
                    code: 0,
                    detail: format!(
                        "pid {pid} is running but unreachable through the object table"
                    ),
                })
            } else {
                Err(Error::ProcessNotFound { pid })
            }
        }
    }
}

/// Tear down every instance reachable through the object table. Per-instance
/// failures are swallowed; returns the pids actually torn down.
pub fn stop_all(chan: &dyn HostChannel, save: bool) -> Result<Vec<u32>> {
    let instances = directory::rich_instances(chan)?;
    let mut stopped = Vec::new();
    for (obj, descriptor) in instances {
        run_teardown(chan, obj, save);
        stopped.push(descriptor.pid);
    }
    Ok(stopped)
}

/// Last resort: OS-level termination. May race with other users of the
/// process and loses unsaved work.
pub fn force_kill(chan: &dyn HostChannel, pid: u32) -> Result<()> {
    let tasks = chan.enumerate_task_list()?;
    if !tasks.contains(&pid) {
        return Err(Error::ProcessNotFound { pid });
    }
    warn!(pid, "force-killing host process");
    chan.kill_process(pid).map_err(|e| Error::RpcFailure {
        code: e.code,
        detail: e.reason(),
    })
}
