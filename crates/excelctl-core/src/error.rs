//! Error taxonomy for excelctl.
//!
//! A closed set: every failure the facade can produce is one of these
//! variants, and no COM error type ever escapes the channel boundary. Where
//! the underlying channel produced a numeric host code it is preserved and
//! reachable through [`Error::host_code`].

use std::path::PathBuf;

use thiserror::Error;

use crate::channel::ChannelError;

/// Result type alias using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The cross-process link is gone, or the owned handle was already torn
    /// down. `code` is zero for the torn-down case.
    #[error("connection to the host lost (0x{code:08X}): {detail}")]
    ConnectionLost { code: u32, detail: String },

    #[error("no running host process with pid {pid}")]
    ProcessNotFound { pid: u32 },

    #[error("cross-process call failed (0x{code:08X}): {detail}")]
    RpcFailure { code: u32, detail: String },

    #[error("workbook not found: {path}", path = .path.display())]
    WorkbookMissing { path: PathBuf },

    #[error("workbook already open: '{name}' ({path})", path = .path.display())]
    WorkbookAlreadyOpen { path: PathBuf, name: String },

    #[error("saving workbook failed (0x{code:08X}): {path}", path = .path.display())]
    WorkbookSaveFailed { path: PathBuf, code: u32 },

    #[error("unsupported workbook extension: {path}", path = .path.display())]
    WorkbookFormatUnknown { path: PathBuf },

    #[error("sheet '{name}' not found in '{workbook}'")]
    SheetMissing { name: String, workbook: String },

    #[error("sheet '{name}' already exists in '{workbook}'")]
    SheetDuplicate { name: String, workbook: String },

    #[error("refusing to delete sheet '{name}': {reason}")]
    SheetDeleteRefused { name: String, reason: String },

    #[error("invalid sheet name '{name}': {reason}")]
    SheetNameInvalid { name: String, reason: String },

    #[error("table '{name}' not found{place}", place = .sheet.as_deref().map(|s| format!(" on sheet '{s}'")).unwrap_or_default())]
    TableMissing { name: String, sheet: Option<String> },

    #[error("table '{name}' already exists in '{workbook}'")]
    TableDuplicate { name: String, workbook: String },

    #[error("invalid table range '{reference}': {reason}")]
    TableRangeInvalid { reference: String, reason: String },

    #[error("invalid table name '{name}': {reason}")]
    TableNameInvalid { name: String, reason: String },

    #[error("access to the VBA project of '{workbook}' is blocked")]
    VbaAccessDenied { workbook: String },

    #[error("'{workbook}' cannot hold VBA code")]
    VbaUnsupportedFormat { workbook: String },

    #[error("module '{name}' not found in '{workbook}'{why}", why = .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    ModuleMissing {
        name: String,
        workbook: String,
        reason: Option<String>,
    },

    #[error("module '{name}' already exists in '{workbook}'")]
    ModuleDuplicate { name: String, workbook: String },

    #[error("importing {file} failed: {reason}", file = .file.display())]
    ModuleImportFailed { file: PathBuf, reason: String },

    #[error("exporting module '{name}' to {dest} failed: {reason}", dest = .dest.display())]
    ModuleExportFailed {
        name: String,
        dest: PathBuf,
        reason: String,
    },

    #[error("macro run failed{which}: {reason}", which = .name.as_deref().map(|n| format!(" ({n})")).unwrap_or_default())]
    MacroRunFailed {
        name: Option<String>,
        reason: String,
    },

    #[error("no settings were saved; call apply() before restore()")]
    NoSavedSettings,
}

impl Error {
    /// A closed owned handle: every operation after teardown fails with this.
    pub fn closed() -> Self {
        Error::ConnectionLost {
            code: 0,
            detail: "host not started".to_string(),
        }
    }

    /// The numeric host code, when the underlying channel produced one.
    pub fn host_code(&self) -> Option<u32> {
        match self {
            Error::ConnectionLost { code, .. }
            | Error::RpcFailure { code, .. }
            | Error::WorkbookSaveFailed { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// A one-line remediation hint, where one exists. Printed by the CLI
    /// after the error itself.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Error::VbaAccessDenied { .. } => {
                Some("enable 'Trust access to the VBA project object model' in the host trust settings")
            }
            Error::ModuleDuplicate { .. } => Some("use --overwrite to replace the existing module"),
            Error::VbaUnsupportedFormat { .. } => {
                Some("save the workbook in a macro-enabled format such as .xlsm")
            }
            _ => None,
        }
    }
}

impl From<ChannelError> for Error {
    fn from(e: ChannelError) -> Self {
        if e.is_disconnect() {
            Error::ConnectionLost {
                code: e.code,
                detail: e.reason(),
            }
        } else {
            Error::RpcFailure {
                code: e.code,
                detail: e.reason(),
            }
        }
    }
}
