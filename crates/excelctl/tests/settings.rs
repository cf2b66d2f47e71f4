//! Performance-flag tuning: snapshot/apply/restore and exception-safe scopes.

use std::panic::AssertUnwindSafe;
use std::rc::Rc;

use excelctl::fake::FakeHost;
use excelctl::prelude::*;

const PID: u32 = 4242;

fn fixture() -> (Rc<FakeHost>, Host) {
    let fake = Rc::new(FakeHost::new());
    fake.add_instance(PID, false);
    fake.add_workbook(PID, "Book1.xlsm", "C:\\work\\Book1.xlsm");
    let host = Host::start(fake.clone(), HostOptions::default()).unwrap();
    (fake, host)
}

const CALC_MANUAL: i32 = -4135;
const CALC_AUTOMATIC: i32 = -4105;

#[test]
fn test_display_apply_mutes_and_snapshots() {
    let (fake, host) = fixture();
    let mut settings = host.settings(SettingsGroup::Display);

    let snapshot = settings.apply().unwrap();
    assert_eq!(snapshot.saved.len(), 3);
    assert_eq!(snapshot.prior("ScreenUpdating"), Some(&Value::Bool(true)));

    for flag in ["ScreenUpdating", "DisplayStatusBar", "EnableAnimations"] {
        assert_eq!(fake.app_prop(PID, flag), Some(Value::Bool(false)), "{flag}");
    }
    // Flags outside the group are untouched.
    assert_eq!(fake.app_prop(PID, "Calculation"), Some(Value::Int(CALC_AUTOMATIC)));
}

#[test]
fn test_calculation_apply_uses_sentinels_and_spares_limits() {
    let (fake, host) = fixture();
    let mut settings = host.settings(SettingsGroup::Calculation);

    let snapshot = settings.apply().unwrap();
    assert_eq!(snapshot.saved.len(), 4);

    assert_eq!(fake.app_prop(PID, "Calculation"), Some(Value::Int(CALC_MANUAL)));
    assert_eq!(fake.app_prop(PID, "Iteration"), Some(Value::Bool(false)));
    // Saved but never mutated.
    assert_eq!(fake.app_prop(PID, "MaxIterations"), Some(Value::Int(100)));
    assert_eq!(fake.app_prop(PID, "MaxChange"), Some(Value::Number(0.001)));
}

#[test]
fn test_full_group_covers_ten_flags() {
    let (fake, host) = fixture();
    let mut settings = host.settings(SettingsGroup::Full);
    let snapshot = settings.apply().unwrap();
    assert_eq!(snapshot.saved.len(), 10);
    assert_eq!(fake.app_prop(PID, "EnableEvents"), Some(Value::Bool(false)));
    assert_eq!(fake.app_prop(PID, "DisplayAlerts"), Some(Value::Bool(false)));
    assert_eq!(fake.app_prop(PID, "AskToUpdateLinks"), Some(Value::Bool(false)));
}

#[test]
fn test_roundtrip_restores_exactly() {
    let (_fake, host) = fixture();
    let mut settings = host.settings(SettingsGroup::Full);

    let before = settings.current().unwrap();
    settings.apply().unwrap();
    settings.restore().unwrap();
    let after = settings.current().unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_restore_before_apply_is_a_caller_bug() {
    let (_fake, host) = fixture();
    let mut settings = host.settings(SettingsGroup::Display);
    assert!(matches!(settings.restore(), Err(Error::NoSavedSettings)));

    // And the snapshot is consumed: a second restore is the same bug.
    settings.apply().unwrap();
    settings.restore().unwrap();
    assert!(matches!(settings.restore(), Err(Error::NoSavedSettings)));
}

#[test]
fn test_scope_restores_on_error_paths() {
    let (fake, host) = fixture();
    let mut settings = host.settings(SettingsGroup::Display);

    let result: Result<()> = (|| {
        let _scope = settings.scope()?;
        assert_eq!(fake.app_prop(PID, "ScreenUpdating"), Some(Value::Bool(false)));
        Err(Error::NoSavedSettings)
    })();
    assert!(result.is_err());

    // The guard restored every flag although the body failed.
    for flag in ["ScreenUpdating", "DisplayStatusBar", "EnableAnimations"] {
        assert_eq!(fake.app_prop(PID, flag), Some(Value::Bool(true)), "{flag}");
    }
}

#[test]
fn test_scope_restores_across_unwinds() {
    let (fake, host) = fixture();
    let mut settings = host.settings(SettingsGroup::Display);

    let unwound = std::panic::catch_unwind(AssertUnwindSafe(|| {
        let _scope = settings.scope().unwrap();
        panic!("inner failure");
    }));
    assert!(unwound.is_err());
    assert_eq!(fake.app_prop(PID, "ScreenUpdating"), Some(Value::Bool(true)));
}

#[test]
fn test_restore_skips_flags_that_refuse_the_write() {
    let (fake, host) = fixture();
    let mut settings = host.settings(SettingsGroup::Display);
    settings.apply().unwrap();

    // The first restored flag throws; the rest must still be written.
    fake.fail_next("ScreenUpdating", 0x800A03EC, "write refused");
    settings.restore().unwrap();

    assert_eq!(fake.app_prop(PID, "ScreenUpdating"), Some(Value::Bool(false)));
    assert_eq!(fake.app_prop(PID, "DisplayStatusBar"), Some(Value::Bool(true)));
    assert_eq!(fake.app_prop(PID, "EnableAnimations"), Some(Value::Bool(true)));
}

#[test]
fn test_current_reflects_live_values() {
    let (fake, host) = fixture();
    fake.set_app_prop(PID, "ScreenUpdating", Value::Bool(false));
    let settings = host.settings(SettingsGroup::Display);
    let current = settings.current().unwrap();
    assert_eq!(
        current.iter().find(|(f, _)| f == "ScreenUpdating").map(|(_, v)| v),
        Some(&Value::Bool(false))
    );
}

#[test]
fn test_calculate_full_requires_an_open_workbook() {
    let fake = Rc::new(FakeHost::new());
    fake.add_instance(PID, false);
    let host = Host::start(fake.clone(), HostOptions::default()).unwrap();
    assert!(matches!(
        host.calculate_full(),
        Err(Error::ConnectionLost { code: 0, .. })
    ));

    fake.add_workbook(PID, "Book1.xlsm", "C:\\work\\Book1.xlsm");
    host.calculate_full().unwrap();
}
