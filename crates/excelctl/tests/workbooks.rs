//! Workbook registry behavior: open validation order, identity rules,
//! resolution, and save paths.

use std::path::PathBuf;
use std::rc::Rc;

use excelctl::fake::FakeHost;
use excelctl::prelude::*;

const PID: u32 = 4242;

fn fixture() -> (Rc<FakeHost>, Host) {
    let fake = Rc::new(FakeHost::new());
    fake.add_instance(PID, false);
    let host = Host::start(fake.clone(), HostOptions::default()).unwrap();
    (fake, host)
}

fn temp_workbook(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, b"stub").unwrap();
    path
}

#[test]
fn test_open_missing_file() {
    let (_fake, host) = fixture();
    let err = host
        .workbooks()
        .open(std::path::Path::new("/no/such/book.xlsx"), false)
        .unwrap_err();
    assert!(matches!(err, Error::WorkbookMissing { .. }));
}

#[test]
fn test_open_rejects_unknown_extension_before_any_boundary_call() {
    let (fake, host) = fixture();
    let dir = tempfile::tempdir().unwrap();
    let path = temp_workbook(&dir, "data.csv");

    let before = fake.boundary_calls();
    let err = host.workbooks().open(&path, false).unwrap_err();
    assert!(matches!(err, Error::WorkbookFormatUnknown { .. }));
    assert_eq!(fake.boundary_calls(), before);
}

#[test]
fn test_open_and_read_back_info() {
    let (fake, host) = fixture();
    let dir = tempfile::tempdir().unwrap();
    let path = temp_workbook(&dir, "Report.xlsx");

    let wb = host.workbooks().open(&path, true).unwrap();
    assert_eq!(wb.info().name, "Report.xlsx");
    assert!(wb.info().read_only);
    assert!(wb.info().saved);
    assert_eq!(wb.info().sheet_count, 1);
    assert_eq!(fake.workbook_names(PID), vec!["Report.xlsx".to_string()]);
}

#[test]
fn test_open_twice_is_already_open() {
    let (_fake, host) = fixture();
    let dir = tempfile::tempdir().unwrap();
    let path = temp_workbook(&dir, "Report.xlsx");

    let _wb = host.workbooks().open(&path, false).unwrap();
    let err = host.workbooks().open(&path, false).unwrap_err();
    assert!(matches!(err, Error::WorkbookAlreadyOpen { .. }));
}

#[test]
fn test_already_open_matches_display_name_case_insensitively() {
    let (fake, host) = fixture();
    let dir = tempfile::tempdir().unwrap();
    let path = temp_workbook(&dir, "Report.xlsx");
    // Same display name, entirely different path.
    fake.add_workbook(PID, "REPORT.XLSX", "C:\\elsewhere\\REPORT.XLSX");

    let err = host.workbooks().open(&path, false).unwrap_err();
    assert!(matches!(err, Error::WorkbookAlreadyOpen { .. }));
}

#[test]
fn test_active_without_workbooks() {
    let (_fake, host) = fixture();
    let err = host.workbooks().active().unwrap_err();
    assert!(matches!(err, Error::ConnectionLost { code: 0, .. }));
}

#[test]
fn test_resolve_by_name_and_default_to_active() {
    let (fake, host) = fixture();
    fake.add_workbook(PID, "Alpha.xlsx", "C:\\w\\Alpha.xlsx");
    fake.add_workbook(PID, "Beta.xlsx", "C:\\w\\Beta.xlsx");

    let wb = host.workbooks().resolve(Some("alpha.xlsx")).unwrap();
    assert_eq!(wb.name(), "Alpha.xlsx");

    // No argument: the host's active (most recent) workbook.
    let wb = host.workbooks().resolve(None).unwrap();
    assert_eq!(wb.name(), "Beta.xlsx");

    let err = host.workbooks().resolve(Some("Gamma.xlsx")).unwrap_err();
    assert!(matches!(err, Error::WorkbookMissing { .. }));
}

#[test]
fn test_list_snapshots_every_workbook() {
    let (fake, host) = fixture();
    fake.add_workbook(PID, "Alpha.xlsx", "C:\\w\\Alpha.xlsx");
    fake.add_workbook(PID, "Beta.xlsx", "C:\\w\\Beta.xlsx");

    let names: Vec<String> = host
        .workbooks()
        .list()
        .unwrap()
        .into_iter()
        .map(|w| w.name)
        .collect();
    assert_eq!(names, vec!["Alpha.xlsx".to_string(), "Beta.xlsx".to_string()]);
}

#[test]
fn test_close_removes_workbook() {
    let (fake, host) = fixture();
    fake.add_workbook(PID, "Alpha.xlsx", "C:\\w\\Alpha.xlsx");
    let wb = host.workbooks().resolve(Some("Alpha.xlsx")).unwrap();
    wb.close(false).unwrap();
    assert!(fake.workbook_names(PID).is_empty());
    assert_eq!(fake.close_log(PID), vec![("Alpha.xlsx".to_string(), false)]);
}

#[test]
fn test_save_as_validates_format_first() {
    let (fake, host) = fixture();
    fake.add_workbook(PID, "Alpha.xlsx", "C:\\w\\Alpha.xlsx");
    let wb = host.workbooks().resolve(Some("Alpha.xlsx")).unwrap();

    let err = wb.save_as(std::path::Path::new("C:\\w\\alpha.pdf")).unwrap_err();
    assert!(matches!(err, Error::WorkbookFormatUnknown { .. }));

    wb.save_as(std::path::Path::new("C:\\w\\Alpha2.xlsb")).unwrap();
    assert_eq!(fake.workbook_names(PID), vec!["Alpha2.xlsb".to_string()]);
}

#[test]
fn test_save_failure_is_typed() {
    let (fake, host) = fixture();
    fake.add_workbook(PID, "Alpha.xlsx", "C:\\w\\Alpha.xlsx");
    let wb = host.workbooks().resolve(Some("Alpha.xlsx")).unwrap();

    fake.fail_next("Save", 0x800A03EC, "disk full");
    let err = wb.save().unwrap_err();
    assert!(matches!(err, Error::WorkbookSaveFailed { code, .. } if code == 0x800A03EC));
}
