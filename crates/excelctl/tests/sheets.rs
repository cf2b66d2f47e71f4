//! Sheet operations: naming rules, duplicates, the last-visible-sheet
//! guard, prompt muting, and degraded used-range reads.

use std::rc::Rc;

use pretty_assertions::assert_eq;

use excelctl::fake::FakeHost;
use excelctl::prelude::*;

const PID: u32 = 4242;
const BOOK: &str = "Book1.xlsm";

fn fixture() -> (Rc<FakeHost>, Host) {
    let fake = Rc::new(FakeHost::new());
    fake.add_instance(PID, false);
    fake.add_workbook(PID, BOOK, "C:\\work\\Book1.xlsm");
    let host = Host::start(fake.clone(), HostOptions::default()).unwrap();
    (fake, host)
}

#[test]
fn test_list_reads_names_indexes_and_extents() {
    let (fake, host) = fixture();
    fake.add_sheet(PID, BOOK, "Data", true);
    fake.add_sheet(PID, BOOK, "Shadow", false);
    fake.set_sheet_used(PID, BOOK, "Data", 120, 8);

    let wb = host.workbooks().active().unwrap();
    let sheets = wb.sheets().list().unwrap();
    assert_eq!(sheets.len(), 3);

    let data = sheets.iter().find(|s| s.name == "Data").unwrap();
    assert_eq!(data.index, 2);
    assert!(data.visible);
    assert_eq!((data.used_rows, data.used_cols), (120, 8));

    let shadow = sheets.iter().find(|s| s.name == "Shadow").unwrap();
    assert!(!shadow.visible);
}

#[test]
fn test_list_degrades_unreadable_used_range_to_zero() {
    let (fake, host) = fixture();
    let wb = host.workbooks().active().unwrap();

    fake.fail_next("UsedRange", 0x800A03EC, "range unavailable");
    let sheets = wb.sheets().list().unwrap();
    assert_eq!(sheets.len(), 1);
    assert_eq!((sheets[0].used_rows, sheets[0].used_cols), (0, 0));
}

#[test]
fn test_create_validates_before_any_boundary_call() {
    let (fake, host) = fixture();
    let wb = host.workbooks().active().unwrap();

    let before = fake.boundary_calls();
    let err = wb.sheets().create("bad:name").unwrap_err();
    assert!(matches!(err, Error::SheetNameInvalid { .. }));
    assert_eq!(fake.boundary_calls(), before);

    let err = wb.sheets().create("").unwrap_err();
    assert!(matches!(err, Error::SheetNameInvalid { .. }));
    let err = wb.sheets().create(&"x".repeat(32)).unwrap_err();
    assert!(matches!(err, Error::SheetNameInvalid { .. }));
}

#[test]
fn test_create_appends_after_last_sheet() {
    let (fake, host) = fixture();
    fake.add_sheet(PID, BOOK, "Middle", true);
    let wb = host.workbooks().active().unwrap();

    let info = wb.sheets().create("Results").unwrap();
    assert_eq!(info.name, "Results");
    assert_eq!(info.index, 3);
    assert_eq!(
        fake.sheet_names(PID, BOOK),
        vec!["Sheet1".to_string(), "Middle".to_string(), "Results".to_string()]
    );
}

#[test]
fn test_create_duplicate_is_case_insensitive() {
    let (fake, host) = fixture();
    fake.add_sheet(PID, BOOK, "Data", true);
    let wb = host.workbooks().active().unwrap();

    let err = wb.sheets().create("DATA").unwrap_err();
    assert!(matches!(err, Error::SheetDuplicate { name, .. } if name == "DATA"));
}

#[test]
fn test_delete_missing_sheet() {
    let (_fake, host) = fixture();
    let wb = host.workbooks().active().unwrap();
    let err = wb.sheets().delete("Nope").unwrap_err();
    assert!(matches!(err, Error::SheetMissing { .. }));
}

#[test]
fn test_delete_refuses_last_visible_sheet() {
    let (fake, host) = fixture();
    fake.add_sheet(PID, BOOK, "Only", true);
    fake.set_sheet_hidden(PID, BOOK, "Sheet1");
    let wb = host.workbooks().active().unwrap();

    let err = wb.sheets().delete("Only").unwrap_err();
    let Error::SheetDeleteRefused { name, reason } = err else {
        panic!("wrong error kind");
    };
    assert_eq!(name, "Only");
    assert!(reason.contains("last visible"));
    // Hidden sheets are still deletable.
    wb.sheets().delete("Sheet1").unwrap();
}

#[test]
fn test_delete_mutes_and_restores_prompts() {
    let (fake, host) = fixture();
    fake.add_sheet(PID, BOOK, "Data", true);
    let wb = host.workbooks().active().unwrap();

    wb.sheets().delete("Data").unwrap();
    assert_eq!(fake.sheet_names(PID, BOOK), vec!["Sheet1".to_string()]);
    assert_eq!(fake.app_prop(PID, "DisplayAlerts"), Some(Value::Bool(true)));
}

#[test]
fn test_delete_restores_prompts_when_the_host_refuses() {
    let (fake, host) = fixture();
    fake.add_sheet(PID, BOOK, "Data", true);
    let wb = host.workbooks().active().unwrap();

    fake.fail_next("Delete", 0x800A03EC, "sheet is protected");
    let err = wb.sheets().delete("Data").unwrap_err();
    assert!(matches!(err, Error::RpcFailure { .. }));
    // The finally path still ran.
    assert_eq!(fake.app_prop(PID, "DisplayAlerts"), Some(Value::Bool(true)));
    assert_eq!(fake.sheet_names(PID, BOOK).len(), 2);
}

#[test]
fn test_copy_lands_after_source_with_new_name() {
    let (fake, host) = fixture();
    fake.add_sheet(PID, BOOK, "Tail", true);
    let wb = host.workbooks().active().unwrap();

    let info = wb.sheets().copy("Sheet1", "Sheet1 Backup").unwrap();
    assert_eq!(info.name, "Sheet1 Backup");
    assert_eq!(info.index, 2);
    assert_eq!(
        fake.sheet_names(PID, BOOK),
        vec![
            "Sheet1".to_string(),
            "Sheet1 Backup".to_string(),
            "Tail".to_string()
        ]
    );
}

#[test]
fn test_copy_rejects_duplicate_and_invalid_destination() {
    let (fake, host) = fixture();
    fake.add_sheet(PID, BOOK, "Data", true);
    let wb = host.workbooks().active().unwrap();

    let err = wb.sheets().copy("Sheet1", "data").unwrap_err();
    assert!(matches!(err, Error::SheetDuplicate { .. }));

    let err = wb.sheets().copy("Sheet1", "a/b").unwrap_err();
    assert!(matches!(err, Error::SheetNameInvalid { .. }));

    let err = wb.sheets().copy("Ghost", "Fresh").unwrap_err();
    assert!(matches!(err, Error::SheetMissing { .. }));
}
