//! Host ownership: scoped acquisition, the teardown protocol, and the
//! cross-instance stop variants.

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

#[test]
fn test_closed_host_fails_every_operation() {
    let (_fake, host) = fixture();
    host.shutdown(false).unwrap();

    assert!(matches!(
        host.descriptor(),
        Err(Error::ConnectionLost { code: 0, .. })
    ));
    assert!(matches!(
        host.workbooks().list(),
        Err(Error::ConnectionLost { .. })
    ));
    assert!(matches!(
        host.settings(SettingsGroup::Display).current(),
        Err(Error::ConnectionLost { .. })
    ));
    assert!(matches!(
        host.macros().run("Module1.Main", None, &[], None),
        Err(Error::ConnectionLost { .. })
    ));
    assert!(matches!(
        host.calculate_full(),
        Err(Error::ConnectionLost { .. })
    ));
}

#[test]
fn test_shutdown_is_idempotent() {
    let (fake, host) = fixture();
    host.shutdown(false).unwrap();
    host.shutdown(false).unwrap();
    host.shutdown(true).unwrap();
    // One teardown ran: the workbook was closed exactly once.
    assert_eq!(fake.close_log(PID).len(), 1);
}

#[test]
fn test_teardown_never_dispatches_quit() {
    let (fake, host) = fixture();
    let wb = host.workbooks().active().unwrap();
    let _ = wb.sheets().list().unwrap();
    drop(wb);
    host.shutdown(false).unwrap();

    let restarted = Host::start(fake.clone(), HostOptions::default()).unwrap();
    restarted.shutdown(true).unwrap();
    stop_all(fake.as_ref(), false).unwrap();

    assert!(!fake.quit_invoked());
}

#[test]
fn test_teardown_closes_every_workbook_with_save_intent() {
    let (fake, host) = fixture();
    fake.add_workbook(PID, "Book2.xlsm", "C:\\work\\Book2.xlsm");
    host.shutdown(true).unwrap();

    let log = fake.close_log(PID);
    assert_eq!(log.len(), 2);
    assert!(log.iter().all(|(_, save)| *save));
    assert!(fake.workbook_names(PID).is_empty());
    // The finalizer pass released every outstanding reference.
    assert_eq!(fake.outstanding_objects(), 0);
}

#[test]
fn test_teardown_swallows_per_workbook_close_failures() {
    let (fake, host) = fixture();
    fake.add_workbook(PID, "Book2.xlsm", "C:\\work\\Book2.xlsm");
    // First close blows up; the loop must carry on to the second workbook.
    fake.fail_next("Close", 0x800A03EC, "close refused");
    host.shutdown(false).unwrap();

    assert_eq!(fake.close_log(PID).len(), 1);
    assert_eq!(fake.outstanding_objects(), 0);
    assert!(!host.is_open());
}

#[test]
fn test_drop_runs_teardown() {
    let fake = Rc::new(FakeHost::new());
    fake.add_instance(PID, false);
    fake.add_workbook(PID, "Book1.xlsm", "C:\\work\\Book1.xlsm");
    {
        let _host = Host::start(fake.clone(), HostOptions::default()).unwrap();
    }
    assert!(fake.workbook_names(PID).is_empty());
    assert_eq!(fake.outstanding_objects(), 0);
}

#[test]
fn test_detach_leaves_documents_alone() {
    let fake = Rc::new(FakeHost::new());
    fake.add_instance(PID, false);
    fake.add_workbook(PID, "Book1.xlsm", "C:\\work\\Book1.xlsm");

    let host = Host::attach_shared(fake.clone()).unwrap();
    assert_eq!(host.descriptor().unwrap().pid, PID);
    host.detach();

    assert_eq!(fake.workbook_names(PID), vec!["Book1.xlsm".to_string()]);
    assert!(fake.close_log(PID).is_empty());
    assert_eq!(fake.outstanding_objects(), 0);
    assert!(!host.is_open());
}

#[test]
fn test_attached_drop_releases_without_teardown() {
    let fake = Rc::new(FakeHost::new());
    fake.add_instance(PID, false);
    fake.add_workbook(PID, "Book1.xlsm", "C:\\work\\Book1.xlsm");
    {
        let _host = Host::attach_pid(fake.clone(), PID).unwrap();
    }
    assert_eq!(fake.workbook_names(PID).len(), 1);
    assert_eq!(fake.outstanding_objects(), 0);
}

#[test]
fn test_isolated_start_spawns_fresh_instance() {
    let fake = Rc::new(FakeHost::new());
    fake.add_instance(PID, false);

    let host = Host::start(
        fake.clone(),
        HostOptions {
            visible: true,
            isolated: true,
        },
    )
    .unwrap();
    let descriptor = host.descriptor().unwrap();
    assert_ne!(descriptor.pid, PID);
    assert!(descriptor.visible);
}

#[test]
fn test_start_spawns_when_nothing_shared() {
    let fake = Rc::new(FakeHost::new());
    let host = Host::start(fake.clone(), HostOptions::default()).unwrap();
    assert!(host.descriptor().unwrap().pid >= 9001);
}

#[test]
fn test_stop_targets_one_instance() {
    let fake = Rc::new(FakeHost::new());
    fake.add_instance(101, false);
    fake.add_instance(202, false);
    fake.add_workbook(101, "A.xlsx", "C:\\a\\A.xlsx");
    fake.add_workbook(202, "B.xlsx", "C:\\b\\B.xlsx");

    stop(fake.as_ref(), 101, false).unwrap();

    assert!(fake.workbook_names(101).is_empty());
    assert_eq!(fake.workbook_names(202).len(), 1);
    assert!(!fake.quit_invoked());
}

#[test]
fn test_stop_unknown_pid() {
    let fake = Rc::new(FakeHost::new());
    fake.add_instance(101, false);
    assert!(matches!(
        stop(fake.as_ref(), 999, false),
        Err(Error::ProcessNotFound { pid: 999 })
    ));
}

#[test]
fn test_stop_disconnected_pid_is_rpc_failure() {
    let fake = Rc::new(FakeHost::new());
    fake.add_instance(101, false);
    // Alive in the task listing, absent from the object table.
    fake.add_ghost_pid(555);
    assert!(matches!(
        stop(fake.as_ref(), 555, false),
        Err(Error::RpcFailure { .. })
    ));
}

#[test]
fn test_stop_all_returns_torn_down_pids() {
    let fake = Rc::new(FakeHost::new());
    fake.add_instance(101, false);
    fake.add_instance(202, false);
    fake.add_instance(303, false);
    fake.set_instance_rot(303, false);

    let mut stopped = stop_all(fake.as_ref(), true).unwrap();
    stopped.sort_unstable();
    // Only object-table instances are reachable; 303 is not.
    assert_eq!(stopped, vec![101, 202]);
}

#[test]
fn test_force_kill() {
    let fake = Rc::new(FakeHost::new());
    fake.add_instance(101, false);
    force_kill(fake.as_ref(), 101).unwrap();
    assert_eq!(fake.killed(), vec![101]);

    assert!(matches!(
        force_kill(fake.as_ref(), 888),
        Err(Error::ProcessNotFound { pid: 888 })
    ));
}

#[test]
fn test_disconnect_surfaces_connection_lost() {
    let (fake, host) = fixture();
    fake.disconnect();
    let err = host.workbooks().list().unwrap_err();
    assert!(matches!(err, Error::ConnectionLost { code, .. } if code == 0x8001_0108));
}

#[test]
fn test_attach_by_window_handle() {
    let fake = Rc::new(FakeHost::new());
    fake.add_instance(PID, true);
    // The fake derives hwnd from the pid.
    let hwnd = (PID as isize) * 16 + 2;
    let host = Host::attach_handle(fake.clone(), hwnd).unwrap();
    assert_eq!(host.descriptor().unwrap().pid, PID);
}
