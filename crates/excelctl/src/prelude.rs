//! Convenient re-exports for typical callers.
//!
//! ```no_run
//! use excelctl::prelude::*;
//! ```

pub use crate::host::{force_kill, stop, stop_all, Host, HostOptions};
pub use crate::run::{parse_macro_args, render_return, MacroRunner, MAX_MACRO_ARGS};
pub use crate::settings::{Settings, SettingsScope};
pub use crate::sheets::Sheets;
pub use crate::tables::Tables;
pub use crate::vba::Vba;
pub use crate::workbooks::{Workbook, Workbooks};
pub use crate::directory::discover;

pub use excelctl_core::{
    Error, HostChannel, HostProcess, MacroOutcome, ModuleInfo, ModuleKind, Result, SettingsGroup,
    SettingsSnapshot, SheetInfo, TableInfo, Value, WorkbookInfo,
};
