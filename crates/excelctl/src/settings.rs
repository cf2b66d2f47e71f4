//! Performance settings: save, apply, restore, with exception-safe scoping.
//!
//! The host's performance flags are process-global state. They are never
//! mutated freely: `apply` snapshots exactly the group's flags first, and
//! the scoped form restores on every exit path, unwinds included. A restore
//! write that fails is logged and skipped so the rest still runs.

use chrono::Local;
use tracing::{debug, warn};

use excelctl_core::model::CALC_MANUAL;
use excelctl_core::{Error, HostChannel, Result, SettingsGroup, SettingsSnapshot, Value};

use crate::host::Host;

pub struct Settings<'h> {
    host: &'h Host,
    group: SettingsGroup,
    saved: Option<SettingsSnapshot>,
}

impl<'h> Settings<'h> {
    pub(crate) fn new(host: &'h Host, group: SettingsGroup) -> Self {
        Self {
            host,
            group,
            saved: None,
        }
    }

    pub fn group(&self) -> SettingsGroup {
        self.group
    }

    fn chan(&self) -> &dyn HostChannel {
        self.host.chan()
    }

    /// Read the current value of every flag in this group.
    pub fn current(&self) -> Result<Vec<(String, Value)>> {
        let app = self.host.app()?;
        let chan = self.chan();
        let mut out = Vec::with_capacity(self.group.flags().len());
        for flag in self.group.flags() {
            let value = chan.get(app, flag)?;
            out.push((flag.to_string(), value));
        }
        Ok(out)
    }

    /// Snapshot the group's flags, then mute them for batch work.
    ///
    /// Display flags go false, calculation goes manual with iteration off,
    /// and the event/alert/link flags go false. `MaxIterations` and
    /// `MaxChange` are saved but never mutated.
    pub fn apply(&mut self) -> Result<SettingsSnapshot> {
        let saved = self.current()?;
        let snapshot = SettingsSnapshot {
            group: self.group,
            saved,
            applied_at: Local::now().naive_local(),
        };
        self.saved = Some(snapshot.clone());

        let app = self.host.app()?;
        let chan = self.chan();
        for flag in self.group.flags() {
            let target = match *flag {
                "Calculation" => Some(Value::Int(CALC_MANUAL)),
                "Iteration" => Some(Value::Bool(false)),
                "MaxIterations" | "MaxChange" => None,
                // Display, event, alert, and link flags are all muted.
                _ => Some(Value::Bool(false)),
            };
            if let Some(value) = target {
                chan.put(app, flag, &value)?;
            }
        }
        debug!(group = %self.group, "performance flags applied");
        Ok(snapshot)
    }

    /// Write the saved values back. Calling this before any [`apply`]
    /// (on this controller) is a caller bug and fails typed.
    ///
    /// [`apply`]: Settings::apply
    pub fn restore(&mut self) -> Result<()> {
        let snapshot = self.saved.take().ok_or(Error::NoSavedSettings)?;
        self.restore_snapshot(&snapshot)
    }

    /// Write an explicit snapshot back, skipping flags that refuse the write.
    pub fn restore_snapshot(&self, snapshot: &SettingsSnapshot) -> Result<()> {
        let app = self.host.app()?;
        let chan = self.chan();
        for (flag, value) in &snapshot.saved {
            if let Err(e) = chan.put(app, flag, value) {
                // Partial restoration beats leaving the host mid-mutation.
                warn!("could not restore {flag}: {e}");
            }
        }
        debug!(group = %snapshot.group, "performance flags restored");
        Ok(())
    }

    /// Apply now, restore when the returned guard drops, on success, early
    /// return, or unwind alike.
    pub fn scope(&mut self) -> Result<SettingsScope<'_, 'h>> {
        self.apply()?;
        Ok(SettingsScope { settings: self })
    }
}

/// Guard that restores the saved flags when dropped.
pub struct SettingsScope<'a, 'h> {
    settings: &'a mut Settings<'h>,
}

impl Drop for SettingsScope<'_, '_> {
    fn drop(&mut self) {
        if let Err(e) = self.settings.restore() {
            warn!("settings restore during scope exit failed: {e}");
        }
    }
}
