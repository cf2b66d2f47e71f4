//! The COM implementation of the host channel.
//!
//! Holds the live-object registry: every dispatch reference handed upward is
//! registered under an opaque id, and `release_all` is the teardown
//! finalizer pass that drops whatever the upper layers leaked.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use windows::{
    core::{HSTRING, Interface},
    Win32::System::Com::{
        CLSIDFromProgID, CoInitializeEx, IDispatch, COINIT_APARTMENTTHREADED,
    },
    Win32::System::Ole::GetActiveObject,
    Win32::System::Variant::VARIANT,
};

use excelctl_core::{ChannelError, ChannelResult, HostChannel, ObjId, RotEntry, Value};

use crate::dispatch::DispatchObject;
use crate::rot;
use crate::tasks;
use crate::variant::*;

const HOST_PROGID: &str = "Excel.Application";

/// Late-bound COM channel to running Excel instances.
///
/// Single-threaded by design: the registry uses interior mutability and the
/// host serializes calls per process anyway.
pub struct ComChannel {
    objects: RefCell<HashMap<ObjId, DispatchObject>>,
    next_id: Cell<ObjId>,
}

impl ComChannel {
    /// Initialize COM for this thread and create an empty channel.
    pub fn new() -> ChannelResult<Self> {
        unsafe {
            // S_FALSE (already initialized) is fine; real failures are not.
            let hr = CoInitializeEx(None, COINIT_APARTMENTTHREADED);
            if hr.is_err() {
                return Err(ChannelError::new("CoInitializeEx", hr.0 as u32)
                    .with_description("COM initialization failed"));
            }
        }
        Ok(Self {
            objects: RefCell::new(HashMap::new()),
            next_id: Cell::new(1),
        })
    }

    fn register(&self, obj: DispatchObject) -> ObjId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.objects.borrow_mut().insert(id, obj);
        id
    }

    fn lookup(&self, id: ObjId, member: &str) -> ChannelResult<DispatchObject> {
        self.objects.borrow().get(&id).cloned().ok_or_else(|| {
            ChannelError::new(member, 0).with_description(format!("stale object id {id}"))
        })
    }

    /// Convert a VARIANT into a [`Value`], registering dispatch references.
    fn value_from_variant(&self, v: &VARIANT) -> Value {
        if variant_is_empty(v) {
            Value::Empty
        } else if variant_is_missing(v) {
            Value::Missing
        } else if let Some(b) = variant_get_bool(v) {
            Value::Bool(b)
        } else if let Some(n) = variant_get_i32(v) {
            Value::Int(n)
        } else if let Some(n) = variant_get_f64(v) {
            Value::Number(n)
        } else if let Some(s) = variant_get_string(v) {
            Value::Text(s)
        } else if let Some(dt) = variant_get_date(v) {
            Value::DateTime(dt)
        } else if let Some(rows) = variant_get_array_2d(v, |cell| self.value_from_variant(cell)) {
            Value::Array(rows)
        } else if let Some(disp) = variant_get_dispatch(v) {
            Value::Object(self.register(DispatchObject::from_idispatch(disp)))
        } else {
            Value::Empty
        }
    }

    fn variant_from_value(&self, value: &Value, member: &str) -> ChannelResult<VARIANT> {
        Ok(match value {
            Value::Empty => variant_empty(),
            Value::Missing => variant_missing(),
            Value::Bool(b) => variant_bool(*b),
            Value::Int(n) => variant_i32(*n),
            Value::Number(n) => variant_f64(*n),
            Value::Text(s) => variant_str(s),
            Value::DateTime(dt) => variant_date(dt),
            Value::Object(id) => {
                let obj = self.lookup(*id, member)?;
                variant_dispatch(obj.as_idispatch())
            }
            Value::Array(_) => {
                return Err(ChannelError::new(member, 0)
                    .with_description("array arguments are not supported"));
            }
        })
    }

    fn marshal_args(&self, args: &[Value], member: &str) -> ChannelResult<Vec<VARIANT>> {
        args.iter()
            .map(|a| self.variant_from_value(a, member))
            .collect()
    }
}

impl HostChannel for ComChannel {
    fn acquire_new(&self, visible: bool) -> ChannelResult<ObjId> {
        let app = DispatchObject::create_from_progid(HOST_PROGID)?;
        app.set_property("Visible", variant_bool(visible))?;
        tracing::debug!("spawned a fresh host instance");
        Ok(self.register(app))
    }

    fn acquire_shared(&self) -> ChannelResult<ObjId> {
        unsafe {
            let hstr = HSTRING::from(HOST_PROGID);
            let clsid = CLSIDFromProgID(&hstr).map_err(|e| {
                ChannelError::new(HOST_PROGID, e.code().0 as u32)
                    .with_description(e.message().to_string())
            })?;
            let mut unknown = None;
            GetActiveObject(&clsid, None, &mut unknown).map_err(|e| {
                ChannelError::new("GetActiveObject", e.code().0 as u32)
                    .with_description("no shared host instance is registered")
            })?;
            let unknown = unknown.ok_or_else(|| {
                ChannelError::new("GetActiveObject", 0)
                    .with_description("object table returned nothing")
            })?;
            let disp = unknown.cast::<IDispatch>().map_err(|e| {
                ChannelError::new("GetActiveObject", e.code().0 as u32)
                    .with_description("active object is not dispatchable")
            })?;
            Ok(self.register(DispatchObject::from_idispatch(disp)))
        }
    }

    fn connect_by_handle(&self, hwnd: isize) -> ChannelResult<ObjId> {
        let app = rot::application_from_hwnd(hwnd)?;
        Ok(self.register(app))
    }

    fn connect_by_pid(&self, pid: u32) -> ChannelResult<ObjId> {
        // The object table does not index by pid; walk its host entries and
        // match on the window owner.
        for entry in rot::enumerate_running()? {
            if !entry.display_name.contains("Excel") {
                continue;
            }
            let Ok(hwnd_variant) = entry.object.get_property("Hwnd") else {
                continue;
            };
            let Some(hwnd) = variant_get_i32(&hwnd_variant) else {
                continue;
            };
            match tasks::pid_of_window(hwnd as isize) {
                Ok(owner) if owner == pid => {
                    return Ok(self.register(entry.object));
                }
                _ => continue,
            }
        }
        Err(
            ChannelError::new("connect_by_pid", excelctl_core::hresult::MK_E_UNAVAILABLE)
                .with_description(format!("pid {pid} has no object-table entry")),
        )
    }

    fn enumerate_object_table(&self) -> ChannelResult<Vec<RotEntry>> {
        let entries = rot::enumerate_running()?;
        Ok(entries
            .into_iter()
            .map(|e| RotEntry {
                obj: self.register(e.object),
                display_name: e.display_name,
            })
            .collect())
    }

    fn enumerate_task_list(&self) -> ChannelResult<Vec<u32>> {
        tasks::host_pids()
    }

    fn pid_of_window(&self, hwnd: isize) -> ChannelResult<u32> {
        tasks::pid_of_window(hwnd)
    }

    fn kill_process(&self, pid: u32) -> ChannelResult<()> {
        tasks::kill(pid)
    }

    fn get(&self, obj: ObjId, member: &str) -> ChannelResult<Value> {
        let target = self.lookup(obj, member)?;
        let variant = target.get_property(member)?;
        Ok(self.value_from_variant(&variant))
    }

    fn get_indexed(&self, obj: ObjId, member: &str, args: &[Value]) -> ChannelResult<Value> {
        let target = self.lookup(obj, member)?;
        let variants = self.marshal_args(args, member)?;
        let variant = target.get_indexed(member, &variants)?;
        Ok(self.value_from_variant(&variant))
    }

    fn put(&self, obj: ObjId, member: &str, value: &Value) -> ChannelResult<()> {
        let target = self.lookup(obj, member)?;
        let variant = self.variant_from_value(value, member)?;
        target.set_property(member, variant)
    }

    fn call(&self, obj: ObjId, member: &str, args: &[Value]) -> ChannelResult<Value> {
        let target = self.lookup(obj, member)?;
        let variants = self.marshal_args(args, member)?;
        let variant = target.invoke_method(member, &variants)?;
        Ok(self.value_from_variant(&variant))
    }

    fn release(&self, obj: ObjId) {
        self.objects.borrow_mut().remove(&obj);
    }

    fn release_all(&self) {
        let count = self.objects.borrow().len();
        if count > 0 {
            tracing::debug!(count, "releasing outstanding cross-process references");
        }
        self.objects.borrow_mut().clear();
    }
}
