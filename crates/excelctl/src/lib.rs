//! excelctl: automation facade over a running Excel instance.
//!
//! The facade owns one host process at a time and exposes the nested
//! resource chain the way the host models it: process → workbook →
//! sheet / VBA project → table / module. Every operation assumes a live
//! channel and surfaces a typed [`Error`](excelctl_core::Error) when it is
//! lost. No COM type and no COM error crosses this crate's API.
//!
//! The channel itself is pluggable: production uses `excelctl-com`, the test
//! suite uses [`fake::FakeHost`].

pub mod directory;
pub mod fake;
pub mod host;
pub mod prelude;
pub mod run;
pub mod settings;
pub mod sheets;
pub mod tables;
pub mod vba;
pub mod workbooks;

pub use directory::discover;
pub use host::{force_kill, stop, stop_all, Host, HostOptions};
pub use run::{parse_macro_args, render_return, MacroRunner, MAX_MACRO_ARGS};
pub use settings::{Settings, SettingsScope};
pub use sheets::Sheets;
pub use tables::Tables;
pub use vba::Vba;
pub use workbooks::{Workbook, Workbooks};

pub use excelctl_core::{
    Error, HostChannel, HostProcess, MacroOutcome, ModuleInfo, ModuleKind, Result, SettingsGroup,
    SettingsSnapshot, SheetInfo, TableInfo, Value, WorkbookInfo,
};
