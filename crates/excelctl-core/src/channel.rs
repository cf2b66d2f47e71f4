//! The replaceable boundary over the host's out-of-process object model.
//!
//! Everything above this trait sees opaque object ids and [`Value`]s; nothing
//! above it sees a COM type or a COM error. The real implementation lives in
//! `excelctl-com`; the test suite drives the facade through an in-memory
//! implementation instead.

use crate::hresult;
use crate::value::Value;

/// Opaque handle into the channel's live-object registry.
///
/// Ids are never reused within one channel. Operations on a released id fail
/// with a [`ChannelError`] rather than touching freed state.
pub type ObjId = u64;

pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

/// One entry of the running-object-table enumeration.
#[derive(Debug, Clone)]
pub struct RotEntry {
    /// Live reference to the registered object.
    pub obj: ObjId,
    /// The moniker display name, used to filter for host instances.
    pub display_name: String,
}

/// The structured failure record produced by a channel operation.
///
/// Mirrors the three-string EXCEPINFO layout (source / description / help)
/// plus the HRESULT. `code` is zero when the failure did not originate in the
/// host (for example a stale object id).
#[derive(Debug, Clone)]
pub struct ChannelError {
    pub code: u32,
    /// The member whose dispatch failed.
    pub member: String,
    pub source: Option<String>,
    pub description: Option<String>,
    pub help: Option<String>,
}

impl ChannelError {
    pub fn new(member: impl Into<String>, code: u32) -> Self {
        Self {
            code,
            member: member.into(),
            source: None,
            description: None,
            help: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Human-readable reason. The description field wins when present.
    pub fn reason(&self) -> String {
        if let Some(d) = self.description.as_deref().filter(|d| !d.is_empty()) {
            return d.to_string();
        }
        if let Some(s) = self.source.as_deref().filter(|s| !s.is_empty()) {
            return s.to_string();
        }
        format!("dispatch of '{}' failed", self.member)
    }

    /// Whether the code means the cross-process link itself is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self.code,
            hresult::RPC_S_CALL_FAILED | hresult::RPC_E_DISCONNECTED
        )
    }
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (0x{:08X}): {}", self.member, self.code, self.reason())
    }
}

impl std::error::Error for ChannelError {}

/// The out-of-process object model, reduced to what the facade needs.
///
/// Contract: implementations never panic; every failure is a [`ChannelError`].
/// The channel is single-threaded (the host serializes calls per process
/// anyway) and every method may block until the host answers.
pub trait HostChannel {
    /// Spawn a fresh, isolated host process and return its application object.
    fn acquire_new(&self, visible: bool) -> ChannelResult<ObjId>;

    /// Bind to an already-running shared host instance.
    fn acquire_shared(&self) -> ChannelResult<ObjId>;

    /// Bind to the instance owning the given top-level window handle.
    fn connect_by_handle(&self, hwnd: isize) -> ChannelResult<ObjId>;

    /// Bind to the instance with the given process id.
    fn connect_by_pid(&self, pid: u32) -> ChannelResult<ObjId>;

    /// Enumerate the running object table. Returns every entry; filtering by
    /// display name is the caller's business.
    fn enumerate_object_table(&self) -> ChannelResult<Vec<RotEntry>>;

    /// Enumerate host process ids visible to the OS task listing. This is the
    /// degraded channel: a pid here carries no object reference.
    fn enumerate_task_list(&self) -> ChannelResult<Vec<u32>>;

    /// Map a top-level window handle to its owning process id.
    fn pid_of_window(&self, hwnd: isize) -> ChannelResult<u32>;

    /// Terminate a process at the OS level. Break-glass only.
    fn kill_process(&self, pid: u32) -> ChannelResult<()>;

    fn get(&self, obj: ObjId, member: &str) -> ChannelResult<Value>;

    fn get_indexed(&self, obj: ObjId, member: &str, args: &[Value]) -> ChannelResult<Value>;

    fn put(&self, obj: ObjId, member: &str, value: &Value) -> ChannelResult<()>;

    fn call(&self, obj: ObjId, member: &str, args: &[Value]) -> ChannelResult<Value>;

    /// Drop the strong reference behind an object id.
    fn release(&self, obj: ObjId);

    /// The finalizer pass: drop every outstanding reference this channel still
    /// holds. Run as part of teardown, after the application reference itself
    /// has been released.
    fn release_all(&self);
}

/// Read a dotted property path starting at `root`, e.g. `"Workbooks.Count"`.
///
/// Intermediate objects are released before returning.
pub fn get_path(chan: &dyn HostChannel, root: ObjId, path: &str) -> ChannelResult<Value> {
    let mut owner = root;
    let mut owned = false;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let value = chan.get(owner, segment);
        if owned {
            chan.release(owner);
        }
        let value = value?;
        if segments.peek().is_none() {
            return Ok(value);
        }
        match value {
            Value::Object(next) => {
                owner = next;
                owned = true;
            }
            other => {
                return Err(ChannelError::new(segment, 0).with_description(format!(
                    "'{segment}' is a {} value, not an object",
                    other.type_name()
                )));
            }
        }
    }
    // Unreachable for non-empty paths; an empty path is a caller bug.
    Err(ChannelError::new(path, 0).with_description("empty property path"))
}
