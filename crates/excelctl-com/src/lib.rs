//! Windows COM channel for excelctl.
//!
//! Implements [`excelctl_core::HostChannel`] over late-bound `IDispatch`
//! automation, the same way VBScript reaches Excel. Everything in this crate
//! is Windows-only; on other targets the crate compiles to nothing and the
//! CLI reports that the backend is unavailable.

#[cfg(windows)]
mod channel;
#[cfg(windows)]
mod dispatch;
#[cfg(windows)]
mod rot;
#[cfg(windows)]
mod tasks;
#[cfg(windows)]
mod variant;

#[cfg(windows)]
pub use channel::ComChannel;
