//! VARIANT construction and extraction.
//!
//! The VARIANT struct wraps inner unions in ManuallyDrop, so construction
//! uses ptr::write to set fields without triggering the DerefMut lint.

#![allow(clippy::missing_safety_doc)]

use std::mem::ManuallyDrop;
use std::ptr;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use windows::{
    core::BSTR,
    Win32::{
        Foundation::{DISP_E_PARAMNOTFOUND, VARIANT_BOOL},
        System::{
            Com::IDispatch,
            Ole::{SafeArrayGetDim, SafeArrayGetElement, SafeArrayGetLBound, SafeArrayGetUBound},
            Variant::{
                VARIANT, VT_ARRAY, VT_BOOL, VT_BSTR, VT_DATE, VT_DISPATCH, VT_EMPTY, VT_ERROR,
                VT_I2, VT_I4, VT_NULL, VT_R4, VT_R8, VT_VARIANT,
            },
        },
    },
};

/// Days between the OLE automation epoch (1899-12-30) and a VT_DATE value.
fn ole_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

pub fn variant_empty() -> VARIANT {
    VARIANT::default()
}

/// An omitted optional parameter: VT_ERROR carrying DISP_E_PARAMNOTFOUND.
pub fn variant_missing() -> VARIANT {
    unsafe {
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_ERROR);
        ptr::write(&mut inner.Anonymous.scode, DISP_E_PARAMNOTFOUND.0);
        v
    }
}

pub fn variant_bool(val: bool) -> VARIANT {
    unsafe {
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_BOOL);
        ptr::write(
            &mut inner.Anonymous.boolVal,
            VARIANT_BOOL(if val { -1 } else { 0 }),
        );
        v
    }
}

pub fn variant_i32(val: i32) -> VARIANT {
    unsafe {
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_I4);
        ptr::write(&mut inner.Anonymous.lVal, val);
        v
    }
}

pub fn variant_f64(val: f64) -> VARIANT {
    unsafe {
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_R8);
        ptr::write(&mut inner.Anonymous.dblVal, val);
        v
    }
}

pub fn variant_str(val: &str) -> VARIANT {
    unsafe {
        let bstr = BSTR::from(val);
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_BSTR);
        ptr::write(&mut inner.Anonymous.bstrVal, ManuallyDrop::new(bstr));
        v
    }
}

pub fn variant_date(val: &NaiveDateTime) -> VARIANT {
    let days = (*val - ole_epoch()).num_milliseconds() as f64 / 86_400_000.0;
    unsafe {
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_DATE);
        ptr::write(&mut inner.Anonymous.date, days);
        v
    }
}

pub fn variant_dispatch(disp: &IDispatch) -> VARIANT {
    unsafe {
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_DISPATCH);
        ptr::write(
            &mut inner.Anonymous.pdispVal,
            ManuallyDrop::new(Some(disp.clone())),
        );
        v
    }
}

pub fn variant_vt(v: &VARIANT) -> u16 {
    unsafe { v.Anonymous.Anonymous.vt.0 }
}

pub fn variant_is_empty(v: &VARIANT) -> bool {
    let vt = unsafe { v.Anonymous.Anonymous.vt };
    vt == VT_EMPTY || vt == VT_NULL
}

pub fn variant_is_missing(v: &VARIANT) -> bool {
    unsafe {
        v.Anonymous.Anonymous.vt == VT_ERROR
            && v.Anonymous.Anonymous.Anonymous.scode == DISP_E_PARAMNOTFOUND.0
    }
}

pub fn variant_get_bool(v: &VARIANT) -> Option<bool> {
    unsafe {
        if v.Anonymous.Anonymous.vt == VT_BOOL {
            Some(v.Anonymous.Anonymous.Anonymous.boolVal.0 != 0)
        } else {
            None
        }
    }
}

pub fn variant_get_i32(v: &VARIANT) -> Option<i32> {
    unsafe {
        let vt = v.Anonymous.Anonymous.vt;
        let anon = &v.Anonymous.Anonymous.Anonymous;
        if vt == VT_I4 {
            Some(anon.lVal)
        } else if vt == VT_I2 {
            Some(anon.iVal as i32)
        } else {
            None
        }
    }
}

pub fn variant_get_f64(v: &VARIANT) -> Option<f64> {
    unsafe {
        let vt = v.Anonymous.Anonymous.vt;
        let anon = &v.Anonymous.Anonymous.Anonymous;
        if vt == VT_R8 {
            Some(anon.dblVal)
        } else if vt == VT_R4 {
            Some(anon.fltVal as f64)
        } else {
            None
        }
    }
}

pub fn variant_get_string(v: &VARIANT) -> Option<String> {
    unsafe {
        if v.Anonymous.Anonymous.vt == VT_BSTR {
            let bstr = &v.Anonymous.Anonymous.Anonymous.bstrVal;
            Some(bstr.to_string())
        } else {
            None
        }
    }
}

pub fn variant_get_date(v: &VARIANT) -> Option<NaiveDateTime> {
    unsafe {
        if v.Anonymous.Anonymous.vt == VT_DATE {
            let days = v.Anonymous.Anonymous.Anonymous.date;
            let millis = (days * 86_400_000.0).round() as i64;
            Some(ole_epoch() + Duration::milliseconds(millis))
        } else {
            None
        }
    }
}

pub fn variant_get_dispatch(v: &VARIANT) -> Option<IDispatch> {
    unsafe {
        if v.Anonymous.Anonymous.vt == VT_DISPATCH {
            let opt_disp: &Option<IDispatch> = &v.Anonymous.Anonymous.Anonymous.pdispVal;
            opt_disp.clone()
        } else {
            None
        }
    }
}

/// Read a 2-D `VT_ARRAY | VT_VARIANT` into row-major nested vectors.
///
/// Returns None when the VARIANT is not a two-dimensional variant array.
/// Cell conversion is delegated to the caller so object references can be
/// registered in the channel.
pub fn variant_get_array_2d<F, T>(v: &VARIANT, mut cell: F) -> Option<Vec<Vec<T>>>
where
    F: FnMut(&VARIANT) -> T,
{
    unsafe {
        let vt = v.Anonymous.Anonymous.vt;
        if vt.0 != (VT_ARRAY.0 | VT_VARIANT.0) {
            return None;
        }
        let psa = v.Anonymous.Anonymous.Anonymous.parray;
        if psa.is_null() {
            return None;
        }
        if SafeArrayGetDim(psa) != 2 {
            return None;
        }
        let row_lo = SafeArrayGetLBound(psa, 1).ok()?;
        let row_hi = SafeArrayGetUBound(psa, 1).ok()?;
        let col_lo = SafeArrayGetLBound(psa, 2).ok()?;
        let col_hi = SafeArrayGetUBound(psa, 2).ok()?;

        let mut rows = Vec::with_capacity((row_hi - row_lo + 1).max(0) as usize);
        for r in row_lo..=row_hi {
            let mut row = Vec::with_capacity((col_hi - col_lo + 1).max(0) as usize);
            for c in col_lo..=col_hi {
                let mut element = VARIANT::default();
                // rgIndices lists the rightmost dimension first.
                let indices = [c, r];
                if SafeArrayGetElement(
                    psa,
                    indices.as_ptr(),
                    &mut element as *mut VARIANT as *mut _,
                )
                .is_err()
                {
                    return None;
                }
                row.push(cell(&element));
            }
            rows.push(row);
        }
        Some(rows)
    }
}
