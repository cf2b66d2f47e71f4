//! Descriptor types: immutable snapshots read from the live host.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::value::Value;

/// `Application.Calculation` sentinel for manual recalculation.
pub const CALC_MANUAL: i32 = -4135;
/// `Application.Calculation` sentinel for automatic recalculation.
pub const CALC_AUTOMATIC: i32 = -4105;

/// Snapshot of one running host process.
///
/// Rich descriptors come from the object-table channel. A descriptor
/// discovered only through the task listing is degraded: no window handle, no
/// visibility, no document count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostProcess {
    pub pid: u32,
    pub hwnd: isize,
    pub visible: bool,
    pub open_workbooks: u32,
}

impl HostProcess {
    /// A degraded descriptor, known only by pid.
    pub fn degraded(pid: u32) -> Self {
        Self {
            pid,
            hwnd: 0,
            visible: false,
            open_workbooks: 0,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.hwnd == 0
    }
}

/// Snapshot of an open workbook.
#[derive(Debug, Clone, Serialize)]
pub struct WorkbookInfo {
    /// Display name, exactly as the host reports it (e.g. `Book1.xlsm`).
    pub name: String,
    /// Absolute path on disk. Empty for never-saved workbooks.
    pub path: PathBuf,
    pub read_only: bool,
    /// False when the workbook has unsaved changes.
    pub saved: bool,
    pub sheet_count: u32,
}

impl WorkbookInfo {
    /// Identity check against an absolute path. Case-insensitive, matching
    /// the host filesystem's semantics.
    pub fn path_matches(&self, other: &Path) -> bool {
        let mine = self.path.to_string_lossy().to_lowercase();
        !mine.is_empty() && mine == other.to_string_lossy().to_lowercase()
    }

    /// Fallback identity check by display name, case-insensitive.
    pub fn name_matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SheetInfo {
    pub name: String,
    /// 1-based position within the workbook.
    pub index: u32,
    pub visible: bool,
    pub used_rows: u32,
    pub used_cols: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub name: String,
    /// Name of the containing sheet.
    pub sheet: String,
    /// Absolute range reference as the host reports it (e.g. `$A$1:$D$10`).
    pub range: String,
    /// Header row reference; empty when the table has no header row.
    pub header_range: String,
    /// Column names in table order.
    pub columns: Vec<String>,
    pub data_rows: u32,
}

/// Kind of a VBA code unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Standard,
    Class,
    Form,
    /// Attached to a workbook or sheet; cannot be imported or deleted.
    Document,
}

impl ModuleKind {
    /// Map the VBE component type code.
    pub fn from_component_type(code: i32) -> Option<Self> {
        match code {
            1 => Some(ModuleKind::Standard),
            2 => Some(ModuleKind::Class),
            3 => Some(ModuleKind::Form),
            100 => Some(ModuleKind::Document),
            _ => None,
        }
    }

    pub fn component_type(&self) -> i32 {
        match self {
            ModuleKind::Standard => 1,
            ModuleKind::Class => 2,
            ModuleKind::Form => 3,
            ModuleKind::Document => 100,
        }
    }

    /// Module kind implied by a source file extension.
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "bas" => Some(ModuleKind::Standard),
            "cls" => Some(ModuleKind::Class),
            "frm" => Some(ModuleKind::Form),
            _ => None,
        }
    }
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModuleKind::Standard => "standard",
            ModuleKind::Class => "class",
            ModuleKind::Form => "form",
            ModuleKind::Document => "document",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub kind: ModuleKind,
    pub lines: u32,
    /// Class modules only; false everywhere else.
    pub predeclared: bool,
}

/// Outcome of one macro invocation.
///
/// Script-level failures are values, not errors: `success` is false and
/// `error_text` carries the host's description. Channel loss and bad host
/// codes are surfaced as [`crate::Error`] instead.
#[derive(Debug, Clone)]
pub struct MacroOutcome {
    pub qualified_name: String,
    pub value: Value,
    pub type_name: String,
    pub success: bool,
    pub error_text: Option<String>,
}

impl MacroOutcome {
    pub fn success(qualified_name: String, value: Value) -> Self {
        let type_name = value.type_name().to_string();
        Self {
            qualified_name,
            value,
            type_name,
            success: true,
            error_text: None,
        }
    }

    pub fn script_failure(qualified_name: String, error_text: String) -> Self {
        Self {
            qualified_name,
            value: Value::Empty,
            type_name: Value::Empty.type_name().to_string(),
            success: false,
            error_text: Some(error_text),
        }
    }
}

/// One of the three performance flag groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingsGroup {
    Display,
    Calculation,
    Full,
}

const DISPLAY_FLAGS: &[&str] = &["ScreenUpdating", "DisplayStatusBar", "EnableAnimations"];
const CALCULATION_FLAGS: &[&str] = &["Calculation", "Iteration", "MaxIterations", "MaxChange"];
const FULL_FLAGS: &[&str] = &[
    "ScreenUpdating",
    "DisplayStatusBar",
    "EnableAnimations",
    "Calculation",
    "Iteration",
    "MaxIterations",
    "MaxChange",
    "EnableEvents",
    "DisplayAlerts",
    "AskToUpdateLinks",
];

impl SettingsGroup {
    /// Exactly the application properties this group saves and restores.
    pub fn flags(&self) -> &'static [&'static str] {
        match self {
            SettingsGroup::Display => DISPLAY_FLAGS,
            SettingsGroup::Calculation => CALCULATION_FLAGS,
            SettingsGroup::Full => FULL_FLAGS,
        }
    }
}

impl std::fmt::Display for SettingsGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SettingsGroup::Display => "display",
            SettingsGroup::Calculation => "calculation",
            SettingsGroup::Full => "full",
        };
        f.write_str(s)
    }
}

/// Saved flag values from one [`SettingsGroup`], consumed by restore.
#[derive(Debug, Clone)]
pub struct SettingsSnapshot {
    pub group: SettingsGroup,
    /// Flag name to prior value, in group order.
    pub saved: Vec<(String, Value)>,
    pub applied_at: NaiveDateTime,
}

impl SettingsSnapshot {
    pub fn prior(&self, flag: &str) -> Option<&Value> {
        self.saved
            .iter()
            .find(|(name, _)| name == flag)
            .map(|(_, v)| v)
    }
}
