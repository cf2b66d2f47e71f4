//! Host process discovery over two channels of very different richness.
//!
//! The object table is the primary channel: it yields a live reference plus
//! a full descriptor. The OS task listing is the fallback, consulted only
//! when the object table has nothing, and yields bare pids; a pid the channel
//! cannot upgrade becomes a degraded descriptor.

use tracing::debug;

use excelctl_core::{HostChannel, HostProcess, ObjId, Result, Value};

/// Substring that marks an object-table entry as a host instance.
const HOST_MARKER: &str = "Excel";

/// Read a descriptor from a live application object.
pub(crate) fn describe(chan: &dyn HostChannel, app: ObjId) -> Result<HostProcess> {
    let hwnd = chan
        .get(app, "Hwnd")?
        .as_i32()
        .map(|h| h as isize)
        .unwrap_or(0);
    let visible = chan.get(app, "Visible")?.as_bool().unwrap_or(false);
    let open_workbooks = match chan.get(app, "Workbooks")? {
        Value::Object(workbooks) => {
            let count = chan
                .get(workbooks, "Count")?
                .as_i32()
                .unwrap_or(0)
                .max(0) as u32;
            chan.release(workbooks);
            count
        }
        _ => 0,
    };
    let pid = chan.pid_of_window(hwnd)?;
    Ok(HostProcess {
        pid,
        hwnd,
        visible,
        open_workbooks,
    })
}

/// Live host instances from the object table, with their descriptors.
///
/// Malformed or unreadable entries are skipped, never fatal. The caller owns
/// the returned object ids.
pub(crate) fn rich_instances(chan: &dyn HostChannel) -> Result<Vec<(ObjId, HostProcess)>> {
    let mut out = Vec::new();
    for entry in chan.enumerate_object_table()? {
        if !entry.display_name.contains(HOST_MARKER) {
            chan.release(entry.obj);
            continue;
        }
        match describe(chan, entry.obj) {
            Ok(descriptor) => out.push((entry.obj, descriptor)),
            Err(e) => {
                debug!("skipping unreadable object-table entry '{}': {e}", entry.display_name);
                chan.release(entry.obj);
            }
        }
    }
    Ok(out)
}

/// Discover running host processes.
///
/// The task-listing fallback runs only when the object table yields zero
/// instances; each fallback pid gets one upgrade attempt through
/// `connect_by_pid` before being reported degraded.
pub fn discover(chan: &dyn HostChannel) -> Result<Vec<HostProcess>> {
    let rich = rich_instances(chan)?;
    if !rich.is_empty() {
        let mut out = Vec::with_capacity(rich.len());
        for (obj, descriptor) in rich {
            chan.release(obj);
            out.push(descriptor);
        }
        return Ok(out);
    }

    let mut out = Vec::new();
    for pid in chan.enumerate_task_list()? {
        match chan.connect_by_pid(pid) {
            Ok(app) => {
                let descriptor = describe(chan, app).unwrap_or_else(|e| {
                    debug!("pid {pid} connected but unreadable: {e}");
                    HostProcess::degraded(pid)
                });
                chan.release(app);
                out.push(descriptor);
            }
            Err(e) => {
                debug!("pid {pid} not upgradable: {e}");
                out.push(HostProcess::degraded(pid));
            }
        }
    }
    Ok(out)
}
