//! VBA module management: import, export, list, delete.
//!
//! Module source files use the scripting environment's legacy single-byte
//! encoding (Windows-1252); everything read or written here goes through
//! that encoding, never UTF-8.

use std::path::{Path, PathBuf};

use encoding_rs::WINDOWS_1252;
use tracing::debug;

use excelctl_core::{
    hresult, validate, ChannelError, Error, HostChannel, ModuleInfo, ModuleKind, ObjId, Result,
    Value,
};

use crate::workbooks::Workbook;

pub struct Vba<'w, 'h> {
    wb: &'w Workbook<'h>,
}

impl<'w, 'h> Vba<'w, 'h> {
    pub(crate) fn new(wb: &'w Workbook<'h>) -> Result<Self> {
        // .xlsx denies code storage outright; fail before touching the host.
        if !validate::supports_vba(&wb.info().path) {
            return Err(Error::VbaUnsupportedFormat {
                workbook: wb.name().to_string(),
            });
        }
        Ok(Self { wb })
    }

    fn chan(&self) -> &dyn HostChannel {
        self.wb.chan()
    }

    /// The VBComponents collection. Caller owns the id.
    fn components(&self) -> Result<ObjId> {
        self.wb.host().app()?;
        let chan = self.chan();
        let project = match chan.get(self.wb.obj(), "VBProject") {
            Ok(Value::Object(id)) => id,
            Ok(_) => {
                return Err(Error::RpcFailure {
                    code: 0,
                    detail: "'VBProject' did not return an object".to_string(),
                })
            }
            Err(e) => return Err(self.translate_project_error(e)),
        };
        let components = chan.get(project, "VBComponents");
        chan.release(project);
        match components {
            Ok(Value::Object(id)) => Ok(id),
            Ok(_) => Err(Error::RpcFailure {
                code: 0,
                detail: "'VBComponents' did not return an object".to_string(),
            }),
            Err(e) => Err(self.translate_project_error(e)),
        }
    }

    fn translate_project_error(&self, e: ChannelError) -> Error {
        if e.code == hresult::EXCEL_RUNTIME_ERROR {
            Error::VbaAccessDenied {
                workbook: self.wb.name().to_string(),
            }
        } else {
            e.into()
        }
    }

    /// Enumerate every module with kind, line count, and (for classes) the
    /// predeclared-instance flag. A predeclared flag that cannot be read
    /// defaults to false.
    pub fn list(&self) -> Result<Vec<ModuleInfo>> {
        let chan = self.chan();
        let components = self.components()?;
        let count = chan.get(components, "Count")?.as_i32().unwrap_or(0);
        let mut out = Vec::new();
        for i in 1..=count {
            let Ok(Value::Object(comp)) = chan.get_indexed(components, "Item", &[Value::Int(i)])
            else {
                continue;
            };
            match self.read_module(comp) {
                Ok(Some(info)) => out.push(info),
                Ok(None) => {}
                Err(e) => debug!("skipping unreadable module {i}: {e}"),
            }
            chan.release(comp);
        }
        chan.release(components);
        Ok(out)
    }

    fn read_module(&self, comp: ObjId) -> Result<Option<ModuleInfo>> {
        let chan = self.chan();
        let name = chan
            .get(comp, "Name")?
            .as_str()
            .unwrap_or_default()
            .to_string();
        let type_code = chan.get(comp, "Type")?.as_i32().unwrap_or(0);
        let Some(kind) = ModuleKind::from_component_type(type_code) else {
            debug!("module '{name}' has unknown component type {type_code}");
            return Ok(None);
        };
        let lines = excelctl_core::channel::get_path(chan, comp, "CodeModule.CountOfLines")
            .ok()
            .and_then(|v| v.as_i32())
            .unwrap_or(0)
            .max(0) as u32;
        let predeclared = if kind == ModuleKind::Class {
            self.read_predeclared(comp).unwrap_or(false)
        } else {
            false
        };
        Ok(Some(ModuleInfo {
            name,
            kind,
            lines,
            predeclared,
        }))
    }

    fn read_predeclared(&self, comp: ObjId) -> Option<bool> {
        let chan = self.chan();
        let prop = chan
            .get_indexed(comp, "Properties", &[Value::Text("PredeclaredId".into())])
            .ok()?
            .as_object()?;
        let flag = chan.get(prop, "Value").ok().and_then(|v| v.as_bool());
        chan.release(prop);
        flag
    }

    /// Import a module from a source file.
    ///
    /// Standard modules and forms go through the host's own import verb;
    /// class modules are rebuilt from parsed attributes so the predeclared
    /// flag survives. Without `overwrite` a name collision is an error, and
    /// an import the host quietly renamed is rolled back.
    pub fn import(&self, file: &Path, overwrite: bool) -> Result<ModuleInfo> {
        let import_err = |reason: &str| Error::ModuleImportFailed {
            file: file.to_path_buf(),
            reason: reason.to_string(),
        };

        let kind = ModuleKind::from_extension(file)
            .ok_or_else(|| import_err("unsupported extension (expected .bas, .cls, or .frm)"))?;
        let bytes = std::fs::read(file).map_err(|e| import_err(&format!("cannot read file: {e}")))?;
        let (text, _, had_errors) = WINDOWS_1252.decode(&bytes);
        if had_errors {
            return Err(import_err("invalid encoding (expected Windows-1252)"));
        }
        let source = ModuleSource::parse(&text)
            .ok_or_else(|| import_err("missing VB_Name attribute"))?;

        if kind == ModuleKind::Form {
            let companion = file.with_extension("frx");
            if !companion.is_file() {
                return Err(import_err("missing form binary companion (.frx)"));
            }
        }

        let existing = self.list()?;
        let duplicate = existing
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(&source.name));
        if duplicate.is_some() && !overwrite {
            return Err(Error::ModuleDuplicate {
                name: source.name.clone(),
                workbook: self.wb.name().to_string(),
            });
        }

        let chan = self.chan();
        let components = self.components()?;
        let result = match kind {
            ModuleKind::Class => {
                if duplicate.is_some() {
                    self.remove_component(components, &source.name)?;
                }
                self.add_class(components, &source)
            }
            _ => self.import_native(components, file, &source, overwrite),
        };
        chan.release(components);
        let comp = result?;
        let info = self.read_module(comp)?.ok_or_else(|| Error::RpcFailure {
            code: 0,
            detail: "imported module has no readable descriptor".to_string(),
        });
        chan.release(comp);
        info
    }

    /// Host-native import for standard modules and forms.
    fn import_native(
        &self,
        components: ObjId,
        file: &Path,
        source: &ModuleSource,
        overwrite: bool,
    ) -> Result<ObjId> {
        let chan = self.chan();
        let imported = chan
            .call(
                components,
                "Import",
                &[Value::Text(file.to_string_lossy().to_string())],
            )
            .map_err(|e| Error::ModuleImportFailed {
                file: file.to_path_buf(),
                reason: e.reason(),
            })?;
        let comp = imported.as_object().ok_or_else(|| Error::RpcFailure {
            code: 0,
            detail: "'Import' did not return a component".to_string(),
        })?;

        // The host signals a collision by renaming the import (Module1_1).
        // Without overwrite that renamed copy must not survive.
        let actual = chan
            .get(comp, "Name")?
            .as_str()
            .unwrap_or_default()
            .to_string();
        if !actual.eq_ignore_ascii_case(&source.name) && !overwrite {
            let _ = chan.call(components, "Remove", &[Value::Object(comp)]);
            chan.release(comp);
            return Err(Error::ModuleDuplicate {
                name: source.name.clone(),
                workbook: self.wb.name().to_string(),
            });
        }
        Ok(comp)
    }

    /// Build a class module from parsed source: add an empty class unit,
    /// name it, set the predeclared flag, inject the body.
    fn add_class(&self, components: ObjId, source: &ModuleSource) -> Result<ObjId> {
        let chan = self.chan();
        let added = chan.call(
            components,
            "Add",
            &[Value::Int(ModuleKind::Class.component_type())],
        )?;
        let comp = added.as_object().ok_or_else(|| Error::RpcFailure {
            code: 0,
            detail: "'Add' did not return a component".to_string(),
        })?;

        if let Err(e) = chan.put(comp, "Name", &Value::Text(source.name.clone())) {
            // Roll the fresh unit back rather than leave a ClassN behind.
            let _ = chan.call(components, "Remove", &[Value::Object(comp)]);
            chan.release(comp);
            return Err(e.into());
        }

        if source.predeclared && self.write_predeclared(comp, true).is_none() {
            debug!("predeclared flag not settable on '{}'", source.name);
        }

        if !source.body.is_empty() {
            let module = chan.get(comp, "CodeModule")?;
            if let Some(code_module) = module.as_object() {
                let result = chan.call(
                    code_module,
                    "AddFromString",
                    &[Value::Text(source.body.clone())],
                );
                chan.release(code_module);
                result?;
            }
        }
        Ok(comp)
    }

    fn write_predeclared(&self, comp: ObjId, value: bool) -> Option<()> {
        let chan = self.chan();
        let prop = chan
            .get_indexed(comp, "Properties", &[Value::Text("PredeclaredId".into())])
            .ok()?
            .as_object()?;
        let result = chan.put(prop, "Value", &Value::Bool(value));
        chan.release(prop);
        result.ok()
    }

    /// Export a module to a file in the legacy encoding.
    ///
    /// Document modules may refuse the native export verb; their code lines
    /// are then read directly and written by hand.
    pub fn export(&self, name: &str, dest: &Path) -> Result<()> {
        let chan = self.chan();
        let components = self.components()?;
        let found = self.find_component(components, name)?;
        let Some(comp) = found else {
            chan.release(components);
            return Err(Error::ModuleMissing {
                name: name.to_string(),
                workbook: self.wb.name().to_string(),
                reason: None,
            });
        };

        let native = chan.call(
            comp,
            "Export",
            &[Value::Text(dest.to_string_lossy().to_string())],
        );
        let result = match native {
            Ok(_) => Ok(()),
            Err(e) => {
                let kind = chan
                    .get(comp, "Type")
                    .ok()
                    .and_then(|v| v.as_i32())
                    .and_then(ModuleKind::from_component_type);
                if kind == Some(ModuleKind::Document) {
                    self.export_lines(comp, name, dest)
                } else {
                    Err(Error::ModuleExportFailed {
                        name: name.to_string(),
                        dest: dest.to_path_buf(),
                        reason: e.reason(),
                    })
                }
            }
        };
        chan.release(comp);
        chan.release(components);
        result
    }

    fn export_lines(&self, comp: ObjId, name: &str, dest: &Path) -> Result<()> {
        let export_err = |reason: String| Error::ModuleExportFailed {
            name: name.to_string(),
            dest: dest.to_path_buf(),
            reason,
        };
        let chan = self.chan();
        let module = chan
            .get(comp, "CodeModule")
            .map_err(|e| export_err(e.reason()))?;
        let code_module = module
            .as_object()
            .ok_or_else(|| export_err("module has no code".to_string()))?;
        let count = chan
            .get(code_module, "CountOfLines")
            .map_err(|e| export_err(e.reason()))?
            .as_i32()
            .unwrap_or(0);
        let text = if count > 0 {
            chan.call(code_module, "Lines", &[Value::Int(1), Value::Int(count)])
                .map_err(|e| export_err(e.reason()))?
                .as_str()
                .unwrap_or_default()
                .to_string()
        } else {
            String::new()
        };
        chan.release(code_module);

        let (encoded, _, unmappable) = WINDOWS_1252.encode(&text);
        if unmappable {
            return Err(export_err(
                "module text contains characters outside Windows-1252".to_string(),
            ));
        }
        std::fs::write(dest, encoded).map_err(|e| export_err(format!("cannot write file: {e}")))
    }

    /// Delete a module. Document modules cannot be deleted; the `force` flag
    /// is accepted for interface stability but changes nothing today.
    pub fn delete(&self, name: &str, force: bool) -> Result<()> {
        let _ = force;
        let chan = self.chan();
        let components = self.components()?;
        let found = self.find_component(components, name)?;
        let Some(comp) = found else {
            chan.release(components);
            return Err(Error::ModuleMissing {
                name: name.to_string(),
                workbook: self.wb.name().to_string(),
                reason: None,
            });
        };

        let type_code = chan.get(comp, "Type")?.as_i32().unwrap_or(0);
        if ModuleKind::from_component_type(type_code) == Some(ModuleKind::Document) {
            chan.release(comp);
            chan.release(components);
            return Err(Error::ModuleMissing {
                name: name.to_string(),
                workbook: self.wb.name().to_string(),
                reason: Some("cannot delete document module".to_string()),
            });
        }

        let result = chan.call(components, "Remove", &[Value::Object(comp)]);
        chan.release(comp);
        chan.release(components);
        result?;
        Ok(())
    }

    fn remove_component(&self, components: ObjId, name: &str) -> Result<()> {
        let chan = self.chan();
        if let Some(comp) = self.find_component(components, name)? {
            let result = chan.call(components, "Remove", &[Value::Object(comp)]);
            chan.release(comp);
            result?;
        }
        Ok(())
    }

    /// Find a component by name, case-insensitively. Caller owns the id.
    fn find_component(&self, components: ObjId, name: &str) -> Result<Option<ObjId>> {
        let chan = self.chan();
        let count = chan.get(components, "Count")?.as_i32().unwrap_or(0);
        for i in 1..=count {
            let Ok(Value::Object(comp)) = chan.get_indexed(components, "Item", &[Value::Int(i)])
            else {
                continue;
            };
            let matches = chan
                .get(comp, "Name")
                .ok()
                .and_then(|v| v.as_str().map(|s| s.eq_ignore_ascii_case(name)))
                .unwrap_or(false);
            if matches {
                return Ok(Some(comp));
            }
            chan.release(comp);
        }
        Ok(None)
    }
}

/// A module source file, split into header attributes and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSource {
    pub name: String,
    pub predeclared: bool,
    /// Source text with the VERSION/BEGIN block and attribute lines removed.
    pub body: String,
}

impl ModuleSource {
    /// Parse exported module text. Returns None when the mandatory
    /// `VB_Name` attribute is absent.
    pub fn parse(text: &str) -> Option<Self> {
        let name = parse_attribute(text, "VB_Name")?;
        let name = name.trim_matches('"').to_string();
        if name.is_empty() {
            return None;
        }
        let predeclared = parse_attribute(text, "VB_PredeclaredId")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "-1")
            .unwrap_or(false);
        Some(Self {
            name,
            predeclared,
            body: strip_header(text),
        })
    }
}

/// Read the value of `Attribute <name> = <value>` from the header.
fn parse_attribute(text: &str, name: &str) -> Option<String> {
    for line in text.lines() {
        let trimmed = line.trim();
        let Some(rest) = trimmed.strip_prefix("Attribute ") else {
            continue;
        };
        let Some((key, value)) = rest.split_once('=') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case(name) {
            return Some(value.trim().to_string());
        }
    }
    None
}

/// Remove the export header: the VERSION line, the BEGIN..END block, and
/// every `Attribute` line. What remains is the code body.
fn strip_header(text: &str) -> String {
    let mut body = Vec::new();
    let mut in_begin_block = false;
    let mut past_header = false;
    for line in text.lines() {
        if past_header {
            body.push(line);
            continue;
        }
        let trimmed = line.trim();
        if in_begin_block {
            if trimmed.eq_ignore_ascii_case("END") {
                in_begin_block = false;
            }
            continue;
        }
        if trimmed.starts_with("VERSION ") {
            continue;
        }
        if trimmed.eq_ignore_ascii_case("BEGIN") || trimmed.starts_with("Begin ") {
            in_begin_block = true;
            continue;
        }
        if trimmed.starts_with("Attribute ") {
            continue;
        }
        // First non-header line: everything from here on is body.
        past_header = true;
        body.push(line);
    }
    // Leading blank lines are header residue.
    let start = body
        .iter()
        .position(|l| !l.trim().is_empty())
        .unwrap_or(body.len());
    body[start..].join("\r\n")
}
