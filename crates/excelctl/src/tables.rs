//! Structured table (ListObject) operations.
//!
//! Table names are case-sensitive; sheet names are not. Name and range
//! validation runs before any boundary crossing, and a new table must not
//! intersect an existing one on the same sheet.

use excelctl_core::validate::{self, parse_range, Rect};
use excelctl_core::{Error, HostChannel, ObjId, Result, TableInfo, Value};

use crate::workbooks::Workbook;

/// xlSrcRange: the table is built over a worksheet range.
const SOURCE_RANGE: i32 = 1;
/// XlYesNoGuess values for the has-headers option.
const HEADERS_YES: i32 = 1;
const HEADERS_NO: i32 = 2;

pub struct Tables<'w, 'h> {
    wb: &'w Workbook<'h>,
}

impl<'w, 'h> Tables<'w, 'h> {
    pub(crate) fn new(wb: &'w Workbook<'h>) -> Self {
        Self { wb }
    }

    fn chan(&self) -> &dyn HostChannel {
        self.wb.chan()
    }

    /// Create a table over `range` on `sheet`.
    pub fn create(
        &self,
        sheet: &str,
        name: &str,
        range: &str,
        has_headers: bool,
    ) -> Result<TableInfo> {
        validate::validate_table_name(name)?;
        let parsed = parse_range(range)?;
        // A sheet qualifier inside the range must agree with the target sheet.
        if let Some(qualifier) = &parsed.sheet {
            if !qualifier.eq_ignore_ascii_case(sheet) {
                return Err(Error::TableRangeInvalid {
                    reference: range.to_string(),
                    reason: format!("range names sheet '{qualifier}' but the table targets '{sheet}'"),
                });
            }
        }

        let chan = self.chan();
        let sheet_obj = self.find_sheet(sheet)?.ok_or_else(|| Error::SheetMissing {
            name: sheet.to_string(),
            workbook: self.wb.name().to_string(),
        })?;

        // Workbook-wide name uniqueness, case-sensitive.
        if self.find(name)?.is_some() {
            chan.release(sheet_obj);
            return Err(Error::TableDuplicate {
                name: name.to_string(),
                workbook: self.wb.name().to_string(),
            });
        }

        // Overlap check against every table already on this sheet.
        let existing = self.tables_on(sheet_obj)?;
        for info in &existing {
            if let Ok(theirs) = parse_range(&info.range) {
                if theirs.rect.intersects(&parsed.rect) {
                    chan.release(sheet_obj);
                    return Err(Error::TableRangeInvalid {
                        reference: range.to_string(),
                        reason: format!("range overlaps table '{}'", info.name),
                    });
                }
            }
        }

        let result = self.create_on(sheet_obj, name, &parsed.rect, has_headers);
        chan.release(sheet_obj);
        result
    }

    fn create_on(
        &self,
        sheet_obj: ObjId,
        name: &str,
        rect: &Rect,
        has_headers: bool,
    ) -> Result<TableInfo> {
        let chan = self.chan();
        let range_obj = match chan.get_indexed(sheet_obj, "Range", &[Value::Text(rect.to_a1())])? {
            Value::Object(id) => id,
            _ => {
                return Err(Error::RpcFailure {
                    code: 0,
                    detail: "'Range' did not return an object".to_string(),
                })
            }
        };
        let list_objects = self.list_objects(sheet_obj)?;
        let added = chan.call(
            list_objects,
            "Add",
            &[
                Value::Int(SOURCE_RANGE),
                Value::Object(range_obj),
                Value::Missing,
                Value::Int(if has_headers { HEADERS_YES } else { HEADERS_NO }),
            ],
        );
        chan.release(range_obj);
        chan.release(list_objects);

        let table = match added? {
            Value::Object(id) => id,
            _ => {
                return Err(Error::RpcFailure {
                    code: 0,
                    detail: "'Add' did not return a table object".to_string(),
                })
            }
        };
        chan.put(table, "Name", &Value::Text(name.to_string()))?;
        let sheet_name = chan
            .get(sheet_obj, "Name")?
            .as_str()
            .unwrap_or_default()
            .to_string();
        let info = read_table(chan, table, &sheet_name)?;
        chan.release(table);
        Ok(info)
    }

    /// Remove a table. By default the table is dissolved and its cells kept;
    /// with `force` the cells are deleted as well.
    pub fn delete(&self, name: &str, force: bool) -> Result<()> {
        let chan = self.chan();
        let located = self.locate(name)?;
        let Some((sheet_obj, table_obj)) = located else {
            return Err(Error::TableMissing {
                name: name.to_string(),
                sheet: None,
            });
        };
        let verb = if force { "Delete" } else { "Unlist" };
        let result = chan.call(table_obj, verb, &[]);
        chan.release(table_obj);
        chan.release(sheet_obj);
        result?;
        Ok(())
    }

    /// List tables, workbook-wide or scoped to one sheet. Entries that cannot
    /// be read are skipped.
    pub fn list(&self, sheet: Option<&str>) -> Result<Vec<TableInfo>> {
        let chan = self.chan();
        let mut out = Vec::new();
        for sheet_obj in self.sheet_objects(sheet)? {
            match self.tables_on(sheet_obj) {
                Ok(mut infos) => out.append(&mut infos),
                Err(e) => tracing::debug!("skipping unreadable table collection: {e}"),
            }
            chan.release(sheet_obj);
        }
        Ok(out)
    }

    /// Find a table by exact (case-sensitive) name across every sheet.
    pub fn find(&self, name: &str) -> Result<Option<(String, TableInfo)>> {
        let chan = self.chan();
        match self.locate(name)? {
            Some((sheet_obj, table_obj)) => {
                let sheet_name = chan
                    .get(sheet_obj, "Name")?
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                let info = read_table(chan, table_obj, &sheet_name)?;
                chan.release(table_obj);
                chan.release(sheet_obj);
                Ok(Some((sheet_name, info)))
            }
            None => Ok(None),
        }
    }

    /// Locate a table by exact name; returns owned (sheet, table) ids.
    fn locate(&self, name: &str) -> Result<Option<(ObjId, ObjId)>> {
        let chan = self.chan();
        let mut found = None;
        for sheet_obj in self.sheet_objects(None)? {
            if found.is_some() {
                chan.release(sheet_obj);
                continue;
            }
            let Ok(list_objects) = self.list_objects(sheet_obj) else {
                chan.release(sheet_obj);
                continue;
            };
            let count = chan
                .get(list_objects, "Count")
                .ok()
                .and_then(|v| v.as_i32())
                .unwrap_or(0);
            let mut hit = None;
            for i in 1..=count {
                let Ok(Value::Object(table)) =
                    chan.get_indexed(list_objects, "Item", &[Value::Int(i)])
                else {
                    continue;
                };
                let matches = chan
                    .get(table, "Name")
                    .ok()
                    .and_then(|v| v.as_str().map(|s| s == name))
                    .unwrap_or(false);
                if matches {
                    hit = Some(table);
                    break;
                }
                chan.release(table);
            }
            chan.release(list_objects);
            match hit {
                Some(table) => found = Some((sheet_obj, table)),
                None => chan.release(sheet_obj),
            }
        }
        Ok(found)
    }

    /// Worksheet objects, all or the named one. Caller owns the ids.
    fn sheet_objects(&self, sheet: Option<&str>) -> Result<Vec<ObjId>> {
        match sheet {
            Some(name) => {
                let obj = self.find_sheet(name)?.ok_or_else(|| Error::SheetMissing {
                    name: name.to_string(),
                    workbook: self.wb.name().to_string(),
                })?;
                Ok(vec![obj])
            }
            None => {
                let chan = self.chan();
                self.wb.host().app()?;
                let collection = match chan.get(self.wb.obj(), "Worksheets")? {
                    Value::Object(id) => id,
                    _ => return Ok(Vec::new()),
                };
                let count = chan.get(collection, "Count")?.as_i32().unwrap_or(0);
                let mut out = Vec::new();
                for i in 1..=count {
                    if let Ok(Value::Object(sheet_obj)) =
                        chan.get_indexed(collection, "Item", &[Value::Int(i)])
                    {
                        out.push(sheet_obj);
                    }
                }
                chan.release(collection);
                Ok(out)
            }
        }
    }

    fn find_sheet(&self, name: &str) -> Result<Option<ObjId>> {
        let chan = self.chan();
        let mut found = None;
        for sheet_obj in self.sheet_objects(None)? {
            let matches = found.is_none()
                && chan
                    .get(sheet_obj, "Name")
                    .ok()
                    .and_then(|v| v.as_str().map(|s| s.eq_ignore_ascii_case(name)))
                    .unwrap_or(false);
            if matches {
                found = Some(sheet_obj);
            } else {
                chan.release(sheet_obj);
            }
        }
        Ok(found)
    }

    fn list_objects(&self, sheet_obj: ObjId) -> Result<ObjId> {
        match self.chan().get(sheet_obj, "ListObjects")? {
            Value::Object(id) => Ok(id),
            _ => Err(Error::RpcFailure {
                code: 0,
                detail: "'ListObjects' did not return an object".to_string(),
            }),
        }
    }

    fn tables_on(&self, sheet_obj: ObjId) -> Result<Vec<TableInfo>> {
        let chan = self.chan();
        let sheet_name = chan
            .get(sheet_obj, "Name")?
            .as_str()
            .unwrap_or_default()
            .to_string();
        let list_objects = self.list_objects(sheet_obj)?;
        let count = chan.get(list_objects, "Count")?.as_i32().unwrap_or(0);
        let mut out = Vec::new();
        for i in 1..=count {
            let Ok(Value::Object(table)) = chan.get_indexed(list_objects, "Item", &[Value::Int(i)])
            else {
                continue;
            };
            match read_table(chan, table, &sheet_name) {
                Ok(info) => out.push(info),
                Err(e) => tracing::debug!("skipping unreadable table {i}: {e}"),
            }
            chan.release(table);
        }
        chan.release(list_objects);
        Ok(out)
    }
}

fn read_table(chan: &dyn HostChannel, table: ObjId, sheet_name: &str) -> Result<TableInfo> {
    let name = chan
        .get(table, "Name")?
        .as_str()
        .unwrap_or_default()
        .to_string();
    let range = match chan.get(table, "Range")? {
        Value::Object(r) => {
            let addr = chan
                .get(r, "Address")?
                .as_str()
                .unwrap_or_default()
                .to_string();
            chan.release(r);
            addr
        }
        _ => String::new(),
    };
    // Headerless tables have no header row range.
    let header_range = match chan.get(table, "HeaderRowRange") {
        Ok(Value::Object(r)) => {
            let addr = chan
                .get(r, "Address")
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            chan.release(r);
            addr
        }
        _ => String::new(),
    };
    let columns = match chan.get(table, "ListColumns") {
        Ok(Value::Object(cols)) => {
            let count = chan
                .get(cols, "Count")
                .ok()
                .and_then(|v| v.as_i32())
                .unwrap_or(0);
            let mut names = Vec::new();
            for i in 1..=count {
                if let Ok(Value::Object(col)) = chan.get_indexed(cols, "Item", &[Value::Int(i)]) {
                    if let Some(n) = chan.get(col, "Name").ok().and_then(|v| {
                        v.as_str().map(str::to_string)
                    }) {
                        names.push(n);
                    }
                    chan.release(col);
                }
            }
            chan.release(cols);
            names
        }
        _ => Vec::new(),
    };
    let data_rows = match chan.get(table, "DataBodyRange") {
        Ok(Value::Object(body)) => {
            let rows = excelctl_core::channel::get_path(chan, body, "Rows.Count")
                .ok()
                .and_then(|v| v.as_i32())
                .unwrap_or(0);
            chan.release(body);
            rows.max(0) as u32
        }
        _ => 0,
    };
    Ok(TableInfo {
        name,
        sheet: sheet_name.to_string(),
        range,
        header_range,
        columns,
        data_rows,
    })
}
