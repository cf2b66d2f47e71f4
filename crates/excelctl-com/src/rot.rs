//! Running-object-table enumeration and window-handle binding.

use windows::{
    core::Interface,
    Win32::{
        System::Com::{CreateBindCtx, GetRunningObjectTable, IDispatch, IMoniker},
        UI::Accessibility::AccessibleObjectFromWindow,
        UI::WindowsAndMessaging::FindWindowExW,
    },
};
use windows::core::w;
use windows::Win32::Foundation::HWND;

use excelctl_core::ChannelError;

use crate::dispatch::DispatchObject;

/// The native object model child id for `AccessibleObjectFromWindow`.
const OBJID_NATIVEOM: u32 = 0xFFFF_FFF0;

/// One live entry from the running object table.
pub struct RunningEntry {
    pub display_name: String,
    pub object: DispatchObject,
}

/// Enumerate every IDispatch-capable entry in the running object table.
///
/// Entries whose moniker cannot be read or whose object is not reachable are
/// skipped; the table itself failing is the only fatal case.
pub fn enumerate_running() -> Result<Vec<RunningEntry>, ChannelError> {
    unsafe {
        let rot = GetRunningObjectTable(0).map_err(|e| {
            ChannelError::new("RunningObjectTable", e.code().0 as u32)
                .with_description(e.message().to_string())
        })?;
        let enum_moniker = rot.EnumRunning().map_err(|e| {
            ChannelError::new("EnumRunning", e.code().0 as u32)
                .with_description(e.message().to_string())
        })?;

        let mut entries = Vec::new();
        loop {
            let mut monikers: [Option<IMoniker>; 1] = [None];
            let mut fetched = 0u32;
            if enum_moniker.Next(&mut monikers, Some(&mut fetched)).is_err() || fetched == 0 {
                break;
            }
            let Some(moniker) = monikers[0].take() else {
                break;
            };

            let Ok(bind_ctx) = CreateBindCtx(0) else {
                continue;
            };
            let Ok(display) = moniker.GetDisplayName(&bind_ctx, None) else {
                continue;
            };
            let display_name = display.to_string().unwrap_or_default();

            let Ok(unknown) = rot.GetObject(&moniker) else {
                continue;
            };
            let Ok(disp) = unknown.cast::<IDispatch>() else {
                continue;
            };
            entries.push(RunningEntry {
                display_name,
                object: DispatchObject::from_idispatch(disp),
            });
        }
        Ok(entries)
    }
}

/// Bind to the application owning an Excel top-level window.
///
/// Walks the `XLMAIN` child chain down to the `EXCEL7` grid window and asks
/// the accessibility layer for the native object model, which yields a
/// `Window` dispatch whose `Application` property is the instance itself.
/// This is the only road to instances the object table never registered.
pub fn application_from_hwnd(hwnd: isize) -> Result<DispatchObject, ChannelError> {
    unsafe {
        let main = HWND(hwnd as *mut _);
        let desk = FindWindowExW(Some(main), None, w!("XLDESK"), None).map_err(|e| {
            ChannelError::new("FindWindowEx", e.code().0 as u32)
                .with_description("window has no XLDESK child; not an Excel main window")
        })?;
        let grid = FindWindowExW(Some(desk), None, w!("EXCEL7"), None).map_err(|e| {
            ChannelError::new("FindWindowEx", e.code().0 as u32)
                .with_description("XLDESK has no EXCEL7 child")
        })?;

        let mut raw: *mut core::ffi::c_void = std::ptr::null_mut();
        AccessibleObjectFromWindow(grid, OBJID_NATIVEOM, &IDispatch::IID, &mut raw).map_err(
            |e| {
                ChannelError::new("AccessibleObjectFromWindow", e.code().0 as u32)
                    .with_description(e.message().to_string())
            },
        )?;
        if raw.is_null() {
            return Err(ChannelError::new("AccessibleObjectFromWindow", 0)
                .with_description("native object model returned null"));
        }
        let window: IDispatch = IDispatch::from_raw(raw);
        let window = DispatchObject::from_idispatch(window);

        let app_variant = window.get_property("Application")?;
        match crate::variant::variant_get_dispatch(&app_variant) {
            Some(app) => Ok(DispatchObject::from_idispatch(app)),
            None => Err(ChannelError::new("Application", 0)
                .with_description("window object has no Application dispatch")),
        }
    }
}
