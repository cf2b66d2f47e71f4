//! Core types for excelctl: the late-bound value model, the host channel
//! boundary, the error taxonomy, and the pure validation rules shared by
//! every component above the COM layer.

pub mod channel;
pub mod error;
pub mod model;
pub mod validate;
pub mod value;

pub use channel::{ChannelError, ChannelResult, HostChannel, ObjId, RotEntry};
pub use error::{Error, Result};
pub use model::{
    HostProcess, MacroOutcome, ModuleInfo, ModuleKind, SettingsGroup, SettingsSnapshot, SheetInfo,
    TableInfo, WorkbookInfo,
};
pub use value::Value;

/// HRESULTs the facade knows how to classify.
pub mod hresult {
    /// Generic COM server execution failure.
    pub const CO_E_SERVER_EXEC_FAILURE: u32 = 0x8008_0005;
    /// The RPC channel dropped mid-call.
    pub const RPC_S_CALL_FAILED: u32 = 0x8007_06BE;
    /// The remote object has disconnected from its clients.
    pub const RPC_E_DISCONNECTED: u32 = 0x8001_0108;
    /// Excel runtime error; also raised when VBA project access is denied.
    pub const EXCEL_RUNTIME_ERROR: u32 = 0x800A_03EC;
    /// Structured exception surfaced through `IDispatch::Invoke`.
    pub const DISP_E_EXCEPTION: u32 = 0x8002_0009;
    /// The running object table has no matching entry.
    pub const MK_E_UNAVAILABLE: u32 = 0x8004_01E3;
}
