//! Safe wrapper around IDispatch for late-bound automation.
//!
//! Excel's COM API is primarily accessed through IDispatch (like VBScript
//! late-binding). This module provides property get/set and method invocation
//! with the host's structured failure record (EXCEPINFO) preserved.

use windows::{
    core::{GUID, HSTRING, PCWSTR},
    Win32::{
        Foundation::DISP_E_EXCEPTION,
        Globalization::GetSystemDefaultLCID,
        System::{
            Com::{
                CLSIDFromProgID, CoCreateInstance, IDispatch, CLSCTX_LOCAL_SERVER, DISPATCH_METHOD,
                DISPATCH_PROPERTYGET, DISPATCH_PROPERTYPUT, DISPPARAMS, EXCEPINFO,
            },
            Ole::DISPID_PROPERTYPUT,
            Variant::VARIANT,
        },
    },
};

use excelctl_core::ChannelError;

/// VBA-style error numbers live in the 0x800A0000 facility.
const FACILITY_CONTROL: u32 = 0x800A_0000;

/// A wrapper around an IDispatch COM object.
#[derive(Clone)]
pub struct DispatchObject {
    inner: IDispatch,
}

impl DispatchObject {
    /// Create a COM object from a ProgID string (e.g. "Excel.Application").
    pub fn create_from_progid(progid: &str) -> Result<Self, ChannelError> {
        unsafe {
            let hstr = HSTRING::from(progid);
            let clsid = CLSIDFromProgID(&hstr).map_err(|e| {
                ChannelError::new(progid, e.code().0 as u32)
                    .with_description(format!("CLSIDFromProgID failed: {e}"))
            })?;
            let disp: IDispatch =
                CoCreateInstance(&clsid, None, CLSCTX_LOCAL_SERVER).map_err(|e| {
                    ChannelError::new(progid, e.code().0 as u32)
                        .with_description(format!("CoCreateInstance failed: {e}"))
                })?;
            Ok(Self { inner: disp })
        }
    }

    pub fn from_idispatch(disp: IDispatch) -> Self {
        Self { inner: disp }
    }

    pub fn as_idispatch(&self) -> &IDispatch {
        &self.inner
    }

    fn get_dispid(&self, name: &str) -> Result<i32, ChannelError> {
        unsafe {
            let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
            let pcwstr = PCWSTR(wide.as_ptr());
            let names = [pcwstr];
            let mut dispid = 0i32;
            self.inner
                .GetIDsOfNames(
                    &GUID::zeroed(),
                    names.as_ptr(),
                    1,
                    GetSystemDefaultLCID(),
                    &mut dispid,
                )
                .map_err(|e| {
                    ChannelError::new(name, e.code().0 as u32)
                        .with_description(format!("no such member '{name}'"))
                })?;
            Ok(dispid)
        }
    }

    /// Get a property value. Equivalent to VB's `obj.PropertyName`.
    pub fn get_property(&self, name: &str) -> Result<VARIANT, ChannelError> {
        self.invoke_raw(name, DISPATCH_PROPERTYGET, &mut [], false)
    }

    /// Get an indexed property (e.g. `Worksheets(1)` or `Range("A1")`).
    pub fn get_indexed(&self, name: &str, args: &[VARIANT]) -> Result<VARIANT, ChannelError> {
        // DISPPARAMS requires arguments in reverse order.
        let mut reversed: Vec<VARIANT> = args.iter().rev().cloned().collect();
        self.invoke_raw(name, DISPATCH_PROPERTYGET, &mut reversed, false)
    }

    /// Set a property value. Equivalent to VB's `obj.PropertyName = value`.
    pub fn set_property(&self, name: &str, value: VARIANT) -> Result<(), ChannelError> {
        self.invoke_raw(name, DISPATCH_PROPERTYPUT, &mut [value], true)
            .map(|_| ())
    }

    /// Invoke a method with arguments in natural order.
    pub fn invoke_method(&self, name: &str, args: &[VARIANT]) -> Result<VARIANT, ChannelError> {
        let mut reversed: Vec<VARIANT> = args.iter().rev().cloned().collect();
        self.invoke_raw(name, DISPATCH_METHOD, &mut reversed, false)
    }

    fn invoke_raw(
        &self,
        name: &str,
        flags: windows::Win32::System::Com::DISPATCH_FLAGS,
        reversed_args: &mut [VARIANT],
        named_put: bool,
    ) -> Result<VARIANT, ChannelError> {
        let dispid = self.get_dispid(name)?;
        unsafe {
            let mut named_args = [DISPID_PROPERTYPUT];
            let params = DISPPARAMS {
                rgvarg: if reversed_args.is_empty() {
                    std::ptr::null_mut()
                } else {
                    reversed_args.as_mut_ptr()
                },
                rgdispidNamedArgs: if named_put {
                    named_args.as_mut_ptr()
                } else {
                    std::ptr::null_mut()
                },
                cArgs: reversed_args.len() as u32,
                cNamedArgs: if named_put { 1 } else { 0 },
            };
            let mut result = VARIANT::default();
            let mut except = EXCEPINFO::default();
            self.inner
                .Invoke(
                    dispid,
                    &GUID::zeroed(),
                    GetSystemDefaultLCID(),
                    flags,
                    &params,
                    Some(&mut result),
                    Some(&mut except),
                    None,
                )
                .map_err(|e| translate_invoke_error(e, &except, name))?;
            Ok(result)
        }
    }
}

/// Translate an Invoke failure into the structured failure record.
///
/// For DISP_E_EXCEPTION the real error number lives in EXCEPINFO: `scode`
/// when set, else the 16-bit `wCode` in the VBA facility (1004 becomes
/// 0x800A03EC).
fn translate_invoke_error(
    err: windows::core::Error,
    except: &EXCEPINFO,
    member_name: &str,
) -> ChannelError {
    let outer = err.code().0 as u32;
    if outer == DISP_E_EXCEPTION.0 as u32 {
        let scode = except.scode.0 as u32;
        let code = if scode != 0 {
            scode
        } else if except.wCode != 0 {
            FACILITY_CONTROL | except.wCode as u32
        } else {
            outer
        };
        let mut channel_err = ChannelError::new(member_name, code);
        if !except.bstrSource.is_empty() {
            channel_err = channel_err.with_source(except.bstrSource.to_string());
        }
        if !except.bstrDescription.is_empty() {
            channel_err = channel_err.with_description(except.bstrDescription.to_string());
        }
        if !except.bstrHelpFile.is_empty() {
            channel_err.help = Some(except.bstrHelpFile.to_string());
        }
        channel_err
    } else {
        ChannelError::new(member_name, outer).with_description(err.message().to_string())
    }
}
