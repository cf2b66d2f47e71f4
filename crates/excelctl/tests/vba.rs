//! VBA module management: format gating, trust errors, import/export
//! semantics, and the encoding discipline.

use std::path::PathBuf;
use std::rc::Rc;

use encoding_rs::WINDOWS_1252;

use excelctl::fake::FakeHost;
use excelctl::prelude::*;

const PID: u32 = 4242;
const BOOK: &str = "Book1.xlsm";

const KIND_STANDARD: i32 = 1;
const KIND_CLASS: i32 = 2;
const KIND_DOCUMENT: i32 = 100;

fn fixture() -> (Rc<FakeHost>, Host) {
    let fake = Rc::new(FakeHost::new());
    fake.add_instance(PID, false);
    fake.add_workbook(PID, BOOK, "C:\\work\\Book1.xlsm");
    let host = Host::start(fake.clone(), HostOptions::default()).unwrap();
    (fake, host)
}

fn write_1252(dir: &tempfile::TempDir, name: &str, text: &str) -> PathBuf {
    let path = dir.path().join(name);
    let (bytes, _, _) = WINDOWS_1252.encode(text);
    std::fs::write(&path, bytes).unwrap();
    path
}

#[test]
fn test_xlsx_cannot_hold_code() {
    let (fake, host) = fixture();
    fake.add_workbook(PID, "Plain.xlsx", "C:\\work\\Plain.xlsx");
    let wb = host.workbooks().resolve(Some("Plain.xlsx")).unwrap();
    let err = wb.vba().map(|_| ()).unwrap_err();
    assert!(matches!(err, Error::VbaUnsupportedFormat { .. }));
}

#[test]
fn test_locked_project_is_access_denied() {
    let (fake, host) = fixture();
    fake.set_workbook_locked(PID, BOOK);
    let wb = host.workbooks().active().unwrap();
    let err = wb.vba().unwrap().list().unwrap_err();
    assert!(matches!(err, Error::VbaAccessDenied { .. }));
}

#[test]
fn test_list_reports_kind_lines_and_predeclared() {
    let (fake, host) = fixture();
    fake.add_module(PID, BOOK, "Helpers", KIND_STANDARD, &["Sub A()", "End Sub"]);
    fake.add_module(PID, BOOK, "Widget", KIND_CLASS, &["Public X As Long"]);
    fake.add_module(PID, BOOK, "ThisWorkbook", KIND_DOCUMENT, &[]);
    fake.set_module_predeclared(PID, BOOK, "Widget", true);

    let wb = host.workbooks().active().unwrap();
    let modules = wb.vba().unwrap().list().unwrap();
    assert_eq!(modules.len(), 3);

    let helpers = modules.iter().find(|m| m.name == "Helpers").unwrap();
    assert_eq!(helpers.kind, ModuleKind::Standard);
    assert_eq!(helpers.lines, 2);
    assert!(!helpers.predeclared);

    let widget = modules.iter().find(|m| m.name == "Widget").unwrap();
    assert_eq!(widget.kind, ModuleKind::Class);
    assert!(widget.predeclared);

    let doc = modules.iter().find(|m| m.name == "ThisWorkbook").unwrap();
    assert_eq!(doc.kind, ModuleKind::Document);
}

#[test]
fn test_unreadable_predeclared_flag_defaults_to_false() {
    let (fake, host) = fixture();
    fake.add_module(PID, BOOK, "Widget", KIND_CLASS, &[]);
    fake.set_module_predeclared(PID, BOOK, "Widget", true);

    let wb = host.workbooks().active().unwrap();
    fake.fail_next("Properties", 0x800A03EC, "no such property");
    let modules = wb.vba().unwrap().list().unwrap();
    assert!(!modules[0].predeclared);
}

#[test]
fn test_import_standard_module() {
    let (fake, host) = fixture();
    let dir = tempfile::tempdir().unwrap();
    let file = write_1252(
        &dir,
        "Helpers.bas",
        "Attribute VB_Name = \"Helpers\"\r\nSub Main()\r\nEnd Sub\r\n",
    );

    let wb = host.workbooks().active().unwrap();
    let info = wb.vba().unwrap().import(&file, false).unwrap();
    assert_eq!(info.name, "Helpers");
    assert_eq!(info.kind, ModuleKind::Standard);
    assert_eq!(info.lines, 2);
    assert_eq!(fake.module_names(PID, BOOK), vec!["Helpers".to_string()]);
}

#[test]
fn test_import_rejects_unknown_extension_and_missing_name() {
    let (_fake, host) = fixture();
    let dir = tempfile::tempdir().unwrap();
    let wb = host.workbooks().active().unwrap();

    let file = write_1252(&dir, "script.vbs", "Attribute VB_Name = \"X\"\r\n");
    let err = wb.vba().unwrap().import(&file, false).unwrap_err();
    assert!(
        matches!(err, Error::ModuleImportFailed { ref reason, .. } if reason.contains("extension"))
    );

    let file = write_1252(&dir, "anon.bas", "Sub Main()\r\nEnd Sub\r\n");
    let err = wb.vba().unwrap().import(&file, false).unwrap_err();
    assert!(
        matches!(err, Error::ModuleImportFailed { ref reason, .. } if reason.contains("VB_Name"))
    );
}

#[test]
fn test_form_import_requires_binary_companion() {
    let (fake, host) = fixture();
    let dir = tempfile::tempdir().unwrap();
    let wb = host.workbooks().active().unwrap();

    let file = write_1252(
        &dir,
        "Dialog.frm",
        "Attribute VB_Name = \"Dialog\"\r\nSub Show()\r\nEnd Sub\r\n",
    );
    let err = wb.vba().unwrap().import(&file, false).unwrap_err();
    assert!(matches!(err, Error::ModuleImportFailed { ref reason, .. } if reason.contains("frx")));

    std::fs::write(dir.path().join("Dialog.frx"), b"\x00\x01").unwrap();
    let info = wb.vba().unwrap().import(&file, false).unwrap();
    assert_eq!(info.kind, ModuleKind::Form);
    assert_eq!(fake.module_names(PID, BOOK), vec!["Dialog".to_string()]);
}

#[test]
fn test_class_import_parses_attributes_and_strips_header() {
    let (fake, host) = fixture();
    let dir = tempfile::tempdir().unwrap();
    let file = write_1252(
        &dir,
        "Widget.cls",
        "VERSION 1.0 CLASS\r\nBEGIN\r\n  MultiUse = -1  'True\r\nEND\r\nAttribute VB_Name = \"Widget\"\r\nAttribute VB_PredeclaredId = True\r\n\r\nPublic Sub Render()\r\nEnd Sub\r\n",
    );

    let wb = host.workbooks().active().unwrap();
    let info = wb.vba().unwrap().import(&file, false).unwrap();
    assert_eq!(info.name, "Widget");
    assert_eq!(info.kind, ModuleKind::Class);
    assert!(info.predeclared);

    let lines = fake.module_lines(PID, BOOK, "Widget");
    assert_eq!(lines, vec!["Public Sub Render()".to_string(), "End Sub".to_string()]);
    assert!(lines.iter().all(|l| !l.contains("Attribute")));
}

#[test]
fn test_duplicate_import_without_overwrite() {
    let (fake, host) = fixture();
    fake.add_module(PID, BOOK, "Helpers", KIND_STANDARD, &["' old"]);
    let dir = tempfile::tempdir().unwrap();
    let file = write_1252(&dir, "Helpers.bas", "Attribute VB_Name = \"Helpers\"\r\n' new\r\n");

    let wb = host.workbooks().active().unwrap();
    let err = wb.vba().unwrap().import(&file, false).unwrap_err();
    assert!(matches!(err, Error::ModuleDuplicate { .. }));
    // Nothing was rolled in: the old module text is untouched.
    assert_eq!(fake.module_lines(PID, BOOK, "Helpers"), vec!["' old".to_string()]);
}

#[test]
fn test_standard_overwrite_goes_through_the_import_verb() {
    let (fake, host) = fixture();
    fake.add_module(PID, BOOK, "Helpers", KIND_STANDARD, &["' old"]);
    let dir = tempfile::tempdir().unwrap();
    let file = write_1252(&dir, "Helpers.bas", "Attribute VB_Name = \"Helpers\"\r\n' new\r\n");

    let wb = host.workbooks().active().unwrap();
    let info = wb.vba().unwrap().import(&file, true).unwrap();
    assert_eq!(info.name, "Helpers");
    assert_eq!(fake.module_names(PID, BOOK), vec!["Helpers".to_string()]);
    assert_eq!(fake.module_lines(PID, BOOK, "Helpers"), vec!["' new".to_string()]);
}

#[test]
fn test_class_overwrite_replaces_existing_unit() {
    let (fake, host) = fixture();
    fake.add_module(PID, BOOK, "Widget", KIND_CLASS, &["' old body"]);
    let dir = tempfile::tempdir().unwrap();
    let file = write_1252(
        &dir,
        "Widget.cls",
        "VERSION 1.0 CLASS\r\nBEGIN\r\nEND\r\nAttribute VB_Name = \"Widget\"\r\n' new body\r\n",
    );

    let wb = host.workbooks().active().unwrap();
    let info = wb.vba().unwrap().import(&file, true).unwrap();
    assert_eq!(info.name, "Widget");
    assert_eq!(fake.module_names(PID, BOOK), vec!["Widget".to_string()]);
    assert_eq!(fake.module_lines(PID, BOOK, "Widget"), vec!["' new body".to_string()]);
}

#[test]
fn test_export_writes_legacy_encoding() {
    let (fake, host) = fixture();
    fake.add_module(PID, BOOK, "Helpers", KIND_STANDARD, &["' café row"]);
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("Helpers.bas");

    let wb = host.workbooks().active().unwrap();
    wb.vba().unwrap().export("Helpers", &dest).unwrap();

    let bytes = std::fs::read(&dest).unwrap();
    let (text, _, _) = WINDOWS_1252.decode(&bytes);
    assert!(text.starts_with("Attribute VB_Name = \"Helpers\""));
    assert!(text.contains("café"));
    // é is a single byte in the legacy encoding.
    assert!(!bytes.contains(&0xC3));
}

#[test]
fn test_document_export_falls_back_to_code_lines() {
    let (fake, host) = fixture();
    fake.add_module(
        PID,
        BOOK,
        "ThisWorkbook",
        KIND_DOCUMENT,
        &["Private Sub Workbook_Open()", "End Sub"],
    );
    fake.set_module_export_refuses(PID, BOOK, "ThisWorkbook");
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("ThisWorkbook.bas");

    let wb = host.workbooks().active().unwrap();
    wb.vba().unwrap().export("ThisWorkbook", &dest).unwrap();

    let bytes = std::fs::read(&dest).unwrap();
    let (text, _, _) = WINDOWS_1252.decode(&bytes);
    assert!(text.contains("Workbook_Open"));
}

#[test]
fn test_export_missing_module_and_failed_export() {
    let (fake, host) = fixture();
    fake.add_module(PID, BOOK, "Helpers", KIND_STANDARD, &[]);
    fake.set_module_export_refuses(PID, BOOK, "Helpers");
    let dir = tempfile::tempdir().unwrap();
    let wb = host.workbooks().active().unwrap();

    let err = wb
        .vba()
        .unwrap()
        .export("Ghost", &dir.path().join("g.bas"))
        .unwrap_err();
    assert!(matches!(err, Error::ModuleMissing { reason: None, .. }));

    // A non-document module that refuses export is a hard failure.
    let err = wb
        .vba()
        .unwrap()
        .export("Helpers", &dir.path().join("h.bas"))
        .unwrap_err();
    assert!(matches!(err, Error::ModuleExportFailed { .. }));
}

#[test]
fn test_delete_semantics() {
    let (fake, host) = fixture();
    fake.add_module(PID, BOOK, "Helpers", KIND_STANDARD, &[]);
    fake.add_module(PID, BOOK, "ThisWorkbook", KIND_DOCUMENT, &[]);
    let wb = host.workbooks().active().unwrap();

    wb.vba().unwrap().delete("Helpers", false).unwrap();
    assert_eq!(fake.module_names(PID, BOOK), vec!["ThisWorkbook".to_string()]);

    let err = wb.vba().unwrap().delete("ThisWorkbook", true).unwrap_err();
    let Error::ModuleMissing { reason, .. } = err else {
        panic!("wrong error kind");
    };
    assert_eq!(reason.as_deref(), Some("cannot delete document module"));

    let err = wb.vba().unwrap().delete("Ghost", false).unwrap_err();
    assert!(matches!(err, Error::ModuleMissing { reason: None, .. }));
}
