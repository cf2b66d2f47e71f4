//! Sheet operations within one workbook.

use excelctl_core::{validate, Error, HostChannel, ObjId, Result, SheetInfo, Value};

use crate::workbooks::Workbook;

pub struct Sheets<'w, 'h> {
    wb: &'w Workbook<'h>,
}

impl<'w, 'h> Sheets<'w, 'h> {
    pub(crate) fn new(wb: &'w Workbook<'h>) -> Self {
        Self { wb }
    }

    fn chan(&self) -> &dyn HostChannel {
        self.wb.chan()
    }

    fn collection(&self) -> Result<ObjId> {
        self.wb.host().app()?;
        match self.chan().get(self.wb.obj(), "Worksheets")? {
            Value::Object(id) => Ok(id),
            _ => Err(Error::RpcFailure {
                code: 0,
                detail: "'Worksheets' did not return an object".to_string(),
            }),
        }
    }

    /// Snapshot every sheet, visible and hidden.
    ///
    /// A sheet whose used range cannot be read reports 0/0 rather than
    /// failing the whole listing.
    pub fn list(&self) -> Result<Vec<SheetInfo>> {
        let chan = self.chan();
        let collection = self.collection()?;
        let count = chan.get(collection, "Count")?.as_i32().unwrap_or(0);
        let mut out = Vec::new();
        for i in 1..=count {
            let Ok(Value::Object(sheet)) = chan.get_indexed(collection, "Item", &[Value::Int(i)])
            else {
                continue;
            };
            match self.read_info(sheet) {
                Ok(info) => out.push(info),
                Err(e) => tracing::debug!("skipping unreadable sheet {i}: {e}"),
            }
            chan.release(sheet);
        }
        chan.release(collection);
        Ok(out)
    }

    fn read_info(&self, sheet: ObjId) -> Result<SheetInfo> {
        let chan = self.chan();
        let name = chan
            .get(sheet, "Name")?
            .as_str()
            .unwrap_or_default()
            .to_string();
        let index = chan.get(sheet, "Index")?.as_i32().unwrap_or(0).max(0) as u32;
        let visible = sheet_visible(chan, sheet);
        let (used_rows, used_cols) = match used_extent(chan, sheet) {
            Some(extent) => extent,
            None => (0, 0),
        };
        Ok(SheetInfo {
            name,
            index,
            visible,
            used_rows,
            used_cols,
        })
    }

    /// Locate a sheet by name, case-insensitively. Caller owns the id.
    fn find_obj(&self, name: &str) -> Result<Option<ObjId>> {
        let chan = self.chan();
        let collection = self.collection()?;
        let count = chan.get(collection, "Count")?.as_i32().unwrap_or(0);
        let mut found = None;
        for i in 1..=count {
            let Ok(Value::Object(sheet)) = chan.get_indexed(collection, "Item", &[Value::Int(i)])
            else {
                continue;
            };
            let matches = chan
                .get(sheet, "Name")
                .ok()
                .and_then(|v| v.as_str().map(|s| s.eq_ignore_ascii_case(name)))
                .unwrap_or(false);
            if matches {
                found = Some(sheet);
                break;
            }
            chan.release(sheet);
        }
        chan.release(collection);
        Ok(found)
    }

    /// Create a sheet appended after the current last one.
    pub fn create(&self, name: &str) -> Result<SheetInfo> {
        validate::validate_sheet_name(name)?;
        let existing = self.list()?;
        if existing.iter().any(|s| s.name.eq_ignore_ascii_case(name)) {
            return Err(Error::SheetDuplicate {
                name: name.to_string(),
                workbook: self.wb.name().to_string(),
            });
        }

        let chan = self.chan();
        let collection = self.collection()?;
        let count = chan.get(collection, "Count")?.as_i32().unwrap_or(0);
        let last = chan.get_indexed(collection, "Item", &[Value::Int(count)]);
        let result = match last {
            Ok(Value::Object(last_sheet)) => {
                let added = chan.call(
                    collection,
                    "Add",
                    &[Value::Missing, Value::Object(last_sheet)],
                );
                chan.release(last_sheet);
                added
            }
            Ok(_) | Err(_) => chan.call(collection, "Add", &[]),
        };
        chan.release(collection);

        let new_sheet = match result? {
            Value::Object(id) => id,
            _ => {
                return Err(Error::RpcFailure {
                    code: 0,
                    detail: "'Add' did not return a sheet object".to_string(),
                })
            }
        };
        chan.put(new_sheet, "Name", &Value::Text(name.to_string()))?;
        let info = self.read_info(new_sheet)?;
        chan.release(new_sheet);
        Ok(info)
    }

    /// Delete a sheet by name.
    ///
    /// The last visible sheet of a workbook is protected. Host prompts are
    /// muted for the duration and restored on every path.
    pub fn delete(&self, name: &str) -> Result<()> {
        let existing = self.list()?;
        let target = existing
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::SheetMissing {
                name: name.to_string(),
                workbook: self.wb.name().to_string(),
            })?;
        let visible_count = existing.iter().filter(|s| s.visible).count();
        if target.visible && visible_count <= 1 {
            return Err(Error::SheetDeleteRefused {
                name: target.name.clone(),
                reason: "it is the last visible sheet".to_string(),
            });
        }

        let sheet = self
            .find_obj(name)?
            .ok_or_else(|| Error::SheetMissing {
                name: name.to_string(),
                workbook: self.wb.name().to_string(),
            })?;

        let chan = self.chan();
        let app = self.wb.host().app()?;
        let prior = chan
            .get(app, "DisplayAlerts")
            .unwrap_or(Value::Bool(true));
        let _ = chan.put(app, "DisplayAlerts", &Value::Bool(false));
        let result = chan.call(sheet, "Delete", &[]);
        let _ = chan.put(app, "DisplayAlerts", &prior);
        chan.release(sheet);
        result?;
        Ok(())
    }

    /// Duplicate `source` immediately after itself and rename the copy.
    pub fn copy(&self, source: &str, dest: &str) -> Result<SheetInfo> {
        validate::validate_sheet_name(dest)?;
        let existing = self.list()?;
        if existing.iter().any(|s| s.name.eq_ignore_ascii_case(dest)) {
            return Err(Error::SheetDuplicate {
                name: dest.to_string(),
                workbook: self.wb.name().to_string(),
            });
        }
        let source_info = existing
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(source))
            .ok_or_else(|| Error::SheetMissing {
                name: source.to_string(),
                workbook: self.wb.name().to_string(),
            })?;

        let chan = self.chan();
        let sheet = self
            .find_obj(source)?
            .ok_or_else(|| Error::SheetMissing {
                name: source.to_string(),
                workbook: self.wb.name().to_string(),
            })?;
        let copy_result = chan.call(sheet, "Copy", &[Value::Missing, Value::Object(sheet)]);
        chan.release(sheet);
        copy_result?;

        // The copy lands directly after the source.
        let collection = self.collection()?;
        let copied = chan.get_indexed(
            collection,
            "Item",
            &[Value::Int(source_info.index as i32 + 1)],
        );
        chan.release(collection);
        let copied = match copied? {
            Value::Object(id) => id,
            _ => {
                return Err(Error::RpcFailure {
                    code: 0,
                    detail: "copied sheet not found at expected position".to_string(),
                })
            }
        };
        chan.put(copied, "Name", &Value::Text(dest.to_string()))?;
        let info = self.read_info(copied)?;
        chan.release(copied);
        Ok(info)
    }
}

fn sheet_visible(chan: &dyn HostChannel, sheet: ObjId) -> bool {
    // xlSheetVisible is -1; hidden and very-hidden are 0 and 2.
    match chan.get(sheet, "Visible") {
        Ok(Value::Bool(b)) => b,
        Ok(Value::Int(n)) => n == -1,
        _ => false,
    }
}

fn used_extent(chan: &dyn HostChannel, sheet: ObjId) -> Option<(u32, u32)> {
    let used = chan.get(sheet, "UsedRange").ok()?.as_object()?;
    let rows = excelctl_core::channel::get_path(chan, used, "Rows.Count")
        .ok()
        .and_then(|v| v.as_i32());
    let cols = excelctl_core::channel::get_path(chan, used, "Columns.Count")
        .ok()
        .and_then(|v| v.as_i32());
    chan.release(used);
    match (rows, cols) {
        (Some(r), Some(c)) => Some((r.max(0) as u32, c.max(0) as u32)),
        _ => None,
    }
}
