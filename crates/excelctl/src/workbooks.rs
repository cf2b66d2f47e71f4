//! Workbook registry: open, find, resolve, close.

use std::path::{Path, PathBuf};

use excelctl_core::{
    validate, ChannelError, Error, HostChannel, ObjId, Result, Value, WorkbookInfo,
};

use crate::host::Host;
use crate::run::MacroRunner;
use crate::sheets::Sheets;
use crate::tables::Tables;
use crate::vba::Vba;

/// The registry of workbooks open in one owned host.
pub struct Workbooks<'h> {
    host: &'h Host,
}

impl<'h> Workbooks<'h> {
    pub(crate) fn new(host: &'h Host) -> Self {
        Self { host }
    }

    fn chan(&self) -> &dyn HostChannel {
        self.host.chan()
    }

    /// Open a workbook from disk.
    ///
    /// Validation order: the path must exist and carry a known extension,
    /// and the workbook must not already be open, matched by absolute path
    /// first (case-insensitive) and by display name second. Only then is the host
    /// asked to open anything.
    pub fn open(&self, path: &Path, read_only: bool) -> Result<Workbook<'h>> {
        let abs = absolute(path);
        if !abs.is_file() {
            return Err(Error::WorkbookMissing { path: abs });
        }
        validate::file_format(&abs)?;

        let file_name = abs
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        for info in self.list()? {
            if info.path_matches(&abs) || info.name_matches(&file_name) {
                return Err(Error::WorkbookAlreadyOpen {
                    path: abs,
                    name: info.name,
                });
            }
        }

        let app = self.host.app()?;
        let chan = self.chan();
        let collection = object(chan.get(app, "Workbooks")?, "Workbooks")?;
        let opened = chan.call(
            collection,
            "Open",
            &[
                Value::Text(abs.to_string_lossy().to_string()),
                // UpdateLinks: never chase external links during automation.
                Value::Int(0),
                Value::Bool(read_only),
            ],
        );
        chan.release(collection);
        let obj = object(opened?, "Open")?;
        let info = read_info(chan, obj)?;
        Ok(Workbook {
            host: self.host,
            obj,
            info,
        })
    }

    /// Snapshot every open workbook.
    pub fn list(&self) -> Result<Vec<WorkbookInfo>> {
        let app = self.host.app()?;
        let chan = self.chan();
        let collection = object(chan.get(app, "Workbooks")?, "Workbooks")?;
        let count = chan.get(collection, "Count")?.as_i32().unwrap_or(0);
        let mut out = Vec::new();
        for i in 1..=count {
            let item = chan.get_indexed(collection, "Item", &[Value::Int(i)]);
            let Ok(Value::Object(wb)) = item else {
                continue;
            };
            match read_info(chan, wb) {
                Ok(info) => out.push(info),
                Err(e) => tracing::debug!("skipping unreadable workbook {i}: {e}"),
            }
            chan.release(wb);
        }
        chan.release(collection);
        Ok(out)
    }

    /// Find an open workbook by absolute path or display name.
    pub fn find(&self, needle: &str) -> Result<Option<Workbook<'h>>> {
        let abs = absolute(Path::new(needle));
        let app = self.host.app()?;
        let chan = self.chan();
        let collection = object(chan.get(app, "Workbooks")?, "Workbooks")?;
        let count = chan.get(collection, "Count")?.as_i32().unwrap_or(0);
        let mut found = None;
        for i in 1..=count {
            let Ok(Value::Object(wb)) = chan.get_indexed(collection, "Item", &[Value::Int(i)])
            else {
                continue;
            };
            let Ok(info) = read_info(chan, wb) else {
                chan.release(wb);
                continue;
            };
            if info.path_matches(&abs) || info.name_matches(needle) {
                found = Some(Workbook {
                    host: self.host,
                    obj: wb,
                    info,
                });
                break;
            }
            chan.release(wb);
        }
        chan.release(collection);
        Ok(found)
    }

    /// The host's current active workbook.
    pub fn active(&self) -> Result<Workbook<'h>> {
        let app = self.host.app()?;
        let chan = self.chan();
        match chan.get(app, "ActiveWorkbook")? {
            Value::Object(wb) => {
                let info = read_info(chan, wb)?;
                Ok(Workbook {
                    host: self.host,
                    obj: wb,
                    info,
                })
            }
            _ => Err(Error::ConnectionLost {
                code: 0,
                detail: "host has no active workbook".to_string(),
            }),
        }
    }

    /// Resolve an optional workbook argument: a name or path when given, the
    /// active workbook otherwise.
    pub fn resolve(&self, which: Option<&str>) -> Result<Workbook<'h>> {
        match which {
            Some(needle) => self
                .find(needle)?
                .ok_or_else(|| Error::WorkbookMissing {
                    path: PathBuf::from(needle),
                }),
            None => self.active(),
        }
    }
}

/// A live reference to one open workbook.
pub struct Workbook<'h> {
    host: &'h Host,
    obj: ObjId,
    info: WorkbookInfo,
}

impl std::fmt::Debug for Workbook<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workbook")
            .field("obj", &self.obj)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl<'h> Workbook<'h> {
    pub fn info(&self) -> &WorkbookInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub(crate) fn host(&self) -> &'h Host {
        self.host
    }

    pub(crate) fn obj(&self) -> ObjId {
        self.obj
    }

    pub(crate) fn chan(&self) -> &dyn HostChannel {
        self.host.chan()
    }

    pub fn sheets(&self) -> Sheets<'_, 'h> {
        Sheets::new(self)
    }

    pub fn tables(&self) -> Tables<'_, 'h> {
        Tables::new(self)
    }

    pub fn vba(&self) -> Result<Vba<'_, 'h>> {
        Vba::new(self)
    }

    /// Run a macro scoped to this workbook.
    pub fn run_macro(
        &self,
        name: &str,
        args: &[Value],
        timeout: Option<std::time::Duration>,
    ) -> Result<excelctl_core::MacroOutcome> {
        MacroRunner::new(self.host).run(name, Some(&self.info.name), args, timeout)
    }

    /// Save in place.
    pub fn save(&self) -> Result<()> {
        self.host.app()?;
        self.chan()
            .call(self.obj, "Save", &[])
            .map_err(|e| save_error(&self.info.path, e))?;
        Ok(())
    }

    /// Save to a new path, with the format derived from its extension.
    pub fn save_as(&self, path: &Path) -> Result<()> {
        let abs = absolute(path);
        let format = validate::file_format(&abs)?;
        self.host.app()?;
        self.chan()
            .call(
                self.obj,
                "SaveAs",
                &[
                    Value::Text(abs.to_string_lossy().to_string()),
                    Value::Int(format),
                ],
            )
            .map_err(|e| save_error(&abs, e))?;
        Ok(())
    }

    /// Close this workbook, consuming the handle.
    pub fn close(self, save: bool) -> Result<()> {
        self.host.app()?;
        let result = self.chan().call(self.obj, "Close", &[Value::Bool(save)]);
        match result {
            Ok(_) => Ok(()),
            Err(e) if save => Err(save_error(&self.info.path, e)),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for Workbook<'_> {
    fn drop(&mut self) {
        // Derived references must not outlive teardown.
        if self.host.is_open() {
            self.host.chan().release(self.obj);
        }
    }
}

fn save_error(path: &Path, e: ChannelError) -> Error {
    if e.is_disconnect() {
        e.into()
    } else {
        Error::WorkbookSaveFailed {
            path: path.to_path_buf(),
            code: e.code,
        }
    }
}

pub(crate) fn read_info(chan: &dyn HostChannel, wb: ObjId) -> Result<WorkbookInfo> {
    let name = chan
        .get(wb, "Name")?
        .as_str()
        .unwrap_or_default()
        .to_string();
    let full_name = chan
        .get(wb, "FullName")?
        .as_str()
        .unwrap_or_default()
        .to_string();
    let read_only = chan.get(wb, "ReadOnly")?.as_bool().unwrap_or(false);
    let saved = chan.get(wb, "Saved")?.as_bool().unwrap_or(true);
    let sheet_count = excelctl_core::channel::get_path(chan, wb, "Worksheets.Count")?
        .as_i32()
        .unwrap_or(0)
        .max(0) as u32;
    Ok(WorkbookInfo {
        name,
        path: PathBuf::from(full_name),
        read_only,
        saved,
        sheet_count,
    })
}

fn object(value: Value, member: &str) -> Result<ObjId> {
    value.as_object().ok_or_else(|| Error::RpcFailure {
        code: 0,
        detail: format!("'{member}' did not return an object"),
    })
}

/// Absolute form of a path without touching the filesystem beyond the cwd.
pub(crate) fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}
