//! In-memory host used by the test suite.
//!
//! Implements [`HostChannel`] over a small emulated object graph: instances,
//! workbooks, sheets, tables, VBA components, and a macro registry. Supports
//! failure injection (one-shot per-member errors, full disconnect) and
//! records what the facade did: boundary-call counts, close intents, kills,
//! and whether the host's `Quit` verb was ever dispatched.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;

use encoding_rs::WINDOWS_1252;

use excelctl_core::validate::{col_letters, parse_range, Rect};
use excelctl_core::{hresult, ChannelError, ChannelResult, HostChannel, ObjId, RotEntry, Value};

use crate::vba::ModuleSource;

const UNKNOWN_NAME: u32 = 0x8002_0006;

/// One-shot injected failure, matched by member name.
struct FailNext {
    member: String,
    code: u32,
    description: String,
}

#[derive(Clone)]
enum Entity {
    App { pid: u32 },
    Workbooks { pid: u32 },
    Workbook { pid: u32, wb: u64 },
    Worksheets { pid: u32, wb: u64 },
    Worksheet { pid: u32, wb: u64, sheet: u64 },
    Range { rect: Rect },
    RangeAxis { count: u32 },
    ListObjects { pid: u32, wb: u64, sheet: u64 },
    Table { pid: u32, wb: u64, sheet: u64, table: u64 },
    ListColumns { pid: u32, wb: u64, sheet: u64, table: u64 },
    ListColumn { pid: u32, wb: u64, sheet: u64, table: u64, index: usize },
    VbProject { pid: u32, wb: u64 },
    VbComponents { pid: u32, wb: u64 },
    VbComponent { pid: u32, wb: u64, comp: u64 },
    CodeModule { pid: u32, wb: u64, comp: u64 },
    ComponentProperty { pid: u32, wb: u64, comp: u64 },
}

/// Scripted behavior for one macro name.
#[derive(Clone)]
pub enum MacroBehavior {
    Return(Value),
    Error { code: u32, description: String },
}

struct TableState {
    id: u64,
    name: String,
    rect: Rect,
    has_headers: bool,
    columns: Vec<String>,
    data_rows: u32,
    corrupted: bool,
}

struct SheetState {
    id: u64,
    name: String,
    visible: bool,
    used_rows: u32,
    used_cols: u32,
    tables: Vec<TableState>,
}

struct CompState {
    id: u64,
    name: String,
    kind: i32,
    lines: Vec<String>,
    predeclared: bool,
    export_refuses: bool,
}

struct WbState {
    id: u64,
    name: String,
    full_name: String,
    read_only: bool,
    saved: bool,
    vba_locked: bool,
    sheets: Vec<SheetState>,
    comps: Vec<CompState>,
    unlisted_tables: Vec<String>,
    deleted_tables: Vec<String>,
}

struct AppState {
    pid: u32,
    hwnd: isize,
    in_rot: bool,
    connectable: bool,
    props: HashMap<String, Value>,
    workbooks: Vec<WbState>,
    macros: HashMap<String, MacroBehavior>,
    run_log: Vec<(String, Vec<Value>)>,
    close_log: Vec<(String, bool)>,
    quit_calls: u32,
}

impl AppState {
    fn new(pid: u32, visible: bool) -> Self {
        let mut props = HashMap::new();
        props.insert("Visible".to_string(), Value::Bool(visible));
        props.insert("DisplayAlerts".to_string(), Value::Bool(true));
        props.insert("ScreenUpdating".to_string(), Value::Bool(true));
        props.insert("DisplayStatusBar".to_string(), Value::Bool(true));
        props.insert("EnableAnimations".to_string(), Value::Bool(true));
        props.insert(
            "Calculation".to_string(),
            Value::Int(excelctl_core::model::CALC_AUTOMATIC),
        );
        props.insert("Iteration".to_string(), Value::Bool(false));
        props.insert("MaxIterations".to_string(), Value::Int(100));
        props.insert("MaxChange".to_string(), Value::Number(0.001));
        props.insert("EnableEvents".to_string(), Value::Bool(true));
        props.insert("AskToUpdateLinks".to_string(), Value::Bool(true));
        Self {
            pid,
            hwnd: (pid as isize) * 16 + 2,
            in_rot: true,
            connectable: true,
            props,
            workbooks: Vec::new(),
            macros: HashMap::new(),
            run_log: Vec::new(),
            close_log: Vec::new(),
            quit_calls: 0,
        }
    }
}

struct State {
    apps: Vec<AppState>,
    ghost_pids: Vec<u32>,
    foreign_rot: Vec<String>,
    objects: HashMap<ObjId, Entity>,
    next_obj: ObjId,
    next_key: u64,
    next_pid: u32,
    disconnected: bool,
    fail_next: Option<FailNext>,
    killed: Vec<u32>,
    calls: u64,
}

impl State {
    fn key(&mut self) -> u64 {
        self.next_key += 1;
        self.next_key
    }

    fn register(&mut self, entity: Entity) -> ObjId {
        let id = self.next_obj;
        self.next_obj += 1;
        self.objects.insert(id, entity);
        id
    }

    fn entity(&self, obj: ObjId, member: &str) -> ChannelResult<Entity> {
        self.objects.get(&obj).cloned().ok_or_else(|| {
            ChannelError::new(member, 0).with_description(format!("stale object id {obj}"))
        })
    }

    fn app(&self, pid: u32, member: &str) -> ChannelResult<&AppState> {
        self.apps.iter().find(|a| a.pid == pid).ok_or_else(|| {
            ChannelError::new(member, hresult::RPC_E_DISCONNECTED)
                .with_description(format!("instance {pid} is gone"))
        })
    }

    fn app_mut(&mut self, pid: u32, member: &str) -> ChannelResult<&mut AppState> {
        self.apps.iter_mut().find(|a| a.pid == pid).ok_or_else(|| {
            ChannelError::new(member, hresult::RPC_E_DISCONNECTED)
                .with_description(format!("instance {pid} is gone"))
        })
    }

    fn wb(&self, pid: u32, wb: u64, member: &str) -> ChannelResult<&WbState> {
        self.app(pid, member)?
            .workbooks
            .iter()
            .find(|w| w.id == wb)
            .ok_or_else(|| {
                ChannelError::new(member, 0).with_description("workbook is closed".to_string())
            })
    }

    fn wb_mut(&mut self, pid: u32, wb: u64, member: &str) -> ChannelResult<&mut WbState> {
        self.app_mut(pid, member)?
            .workbooks
            .iter_mut()
            .find(|w| w.id == wb)
            .ok_or_else(|| {
                ChannelError::new(member, 0).with_description("workbook is closed".to_string())
            })
    }

    fn sheet(&self, pid: u32, wb: u64, sheet: u64, member: &str) -> ChannelResult<&SheetState> {
        self.wb(pid, wb, member)?
            .sheets
            .iter()
            .find(|s| s.id == sheet)
            .ok_or_else(|| {
                ChannelError::new(member, 0).with_description("sheet is gone".to_string())
            })
    }

    fn sheet_mut(
        &mut self,
        pid: u32,
        wb: u64,
        sheet: u64,
        member: &str,
    ) -> ChannelResult<&mut SheetState> {
        self.wb_mut(pid, wb, member)?
            .sheets
            .iter_mut()
            .find(|s| s.id == sheet)
            .ok_or_else(|| {
                ChannelError::new(member, 0).with_description("sheet is gone".to_string())
            })
    }

    fn table(
        &self,
        pid: u32,
        wb: u64,
        sheet: u64,
        table: u64,
        member: &str,
    ) -> ChannelResult<&TableState> {
        self.sheet(pid, wb, sheet, member)?
            .tables
            .iter()
            .find(|t| t.id == table)
            .ok_or_else(|| {
                ChannelError::new(member, 0).with_description("table is gone".to_string())
            })
    }

    fn comp(&self, pid: u32, wb: u64, comp: u64, member: &str) -> ChannelResult<&CompState> {
        self.wb(pid, wb, member)?
            .comps
            .iter()
            .find(|c| c.id == comp)
            .ok_or_else(|| {
                ChannelError::new(member, 0).with_description("component is gone".to_string())
            })
    }

    fn comp_mut(
        &mut self,
        pid: u32,
        wb: u64,
        comp: u64,
        member: &str,
    ) -> ChannelResult<&mut CompState> {
        self.wb_mut(pid, wb, member)?
            .comps
            .iter_mut()
            .find(|c| c.id == comp)
            .ok_or_else(|| {
                ChannelError::new(member, 0).with_description("component is gone".to_string())
            })
    }

    /// Common entry for boundary operations: disconnect simulation and
    /// one-shot failure injection.
    fn enter(&mut self, member: &str) -> ChannelResult<()> {
        self.calls += 1;
        if self.disconnected {
            return Err(ChannelError::new(member, hresult::RPC_E_DISCONNECTED)
                .with_description("the object invoked has disconnected from its clients"));
        }
        let matched = self
            .fail_next
            .as_ref()
            .map_or(false, |f| f.member == member);
        if matched {
            if let Some(f) = self.fail_next.take() {
                return Err(ChannelError::new(member, f.code).with_description(f.description));
            }
        }
        Ok(())
    }
}

fn host_error(member: &str, description: impl Into<String>) -> ChannelError {
    ChannelError::new(member, hresult::EXCEL_RUNTIME_ERROR)
        .with_source("Microsoft Excel")
        .with_description(description.into())
}

fn dollar(rect: &Rect) -> String {
    format!(
        "${}${}:${}${}",
        col_letters(rect.col1),
        rect.row1,
        col_letters(rect.col2),
        rect.row2
    )
}

/// The in-memory host.
pub struct FakeHost {
    state: RefCell<State>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(State {
                apps: Vec::new(),
                ghost_pids: Vec::new(),
                foreign_rot: Vec::new(),
                objects: HashMap::new(),
                next_obj: 1,
                next_key: 1,
                next_pid: 9001,
                disconnected: false,
                fail_next: None,
                killed: Vec::new(),
                calls: 0,
            }),
        }
    }

    // -- scenario builders --

    pub fn add_instance(&self, pid: u32, visible: bool) {
        self.state.borrow_mut().apps.push(AppState::new(pid, visible));
    }

    pub fn set_instance_rot(&self, pid: u32, in_rot: bool) {
        let mut st = self.state.borrow_mut();
        if let Some(app) = st.apps.iter_mut().find(|a| a.pid == pid) {
            app.in_rot = in_rot;
        }
    }

    pub fn set_instance_connectable(&self, pid: u32, connectable: bool) {
        let mut st = self.state.borrow_mut();
        if let Some(app) = st.apps.iter_mut().find(|a| a.pid == pid) {
            app.connectable = connectable;
        }
    }

    /// A pid that exists in the task listing with no object behind it.
    pub fn add_ghost_pid(&self, pid: u32) {
        self.state.borrow_mut().ghost_pids.push(pid);
    }

    /// A running-object-table entry that is not a host instance.
    pub fn add_foreign_rot_entry(&self, display_name: &str) {
        self.state
            .borrow_mut()
            .foreign_rot
            .push(display_name.to_string());
    }

    pub fn add_workbook(&self, pid: u32, name: &str, full_name: &str) {
        let mut st = self.state.borrow_mut();
        let wb_id = st.key();
        let sheet_id = st.key();
        let app = st
            .apps
            .iter_mut()
            .find(|a| a.pid == pid)
            .expect("no such instance");
        app.workbooks.push(WbState {
            id: wb_id,
            name: name.to_string(),
            full_name: full_name.to_string(),
            read_only: false,
            saved: true,
            vba_locked: false,
            sheets: vec![SheetState {
                id: sheet_id,
                name: "Sheet1".to_string(),
                visible: true,
                used_rows: 0,
                used_cols: 0,
                tables: Vec::new(),
            }],
            comps: Vec::new(),
            unlisted_tables: Vec::new(),
            deleted_tables: Vec::new(),
        });
    }

    fn with_wb<R>(&self, pid: u32, wb_name: &str, f: impl FnOnce(&mut WbState, &mut u64) -> R) -> R {
        let mut st = self.state.borrow_mut();
        let mut next_key = st.next_key;
        let app = st
            .apps
            .iter_mut()
            .find(|a| a.pid == pid)
            .expect("no such instance");
        let wb = app
            .workbooks
            .iter_mut()
            .find(|w| w.name == wb_name)
            .expect("no such workbook");
        let result = f(wb, &mut next_key);
        st.next_key = next_key;
        result
    }

    pub fn add_sheet(&self, pid: u32, wb_name: &str, sheet: &str, visible: bool) {
        self.with_wb(pid, wb_name, |wb, next_key| {
            *next_key += 1;
            wb.sheets.push(SheetState {
                id: *next_key,
                name: sheet.to_string(),
                visible,
                used_rows: 0,
                used_cols: 0,
                tables: Vec::new(),
            });
        });
    }

    pub fn set_sheet_used(&self, pid: u32, wb_name: &str, sheet: &str, rows: u32, cols: u32) {
        self.with_wb(pid, wb_name, |wb, _| {
            if let Some(s) = wb.sheets.iter_mut().find(|s| s.name == sheet) {
                s.used_rows = rows;
                s.used_cols = cols;
            }
        });
    }

    pub fn set_sheet_hidden(&self, pid: u32, wb_name: &str, sheet: &str) {
        self.with_wb(pid, wb_name, |wb, _| {
            if let Some(s) = wb.sheets.iter_mut().find(|s| s.name == sheet) {
                s.visible = false;
            }
        });
    }

    pub fn add_table(
        &self,
        pid: u32,
        wb_name: &str,
        sheet: &str,
        name: &str,
        range: &str,
        columns: &[&str],
        data_rows: u32,
    ) {
        let rect = parse_range(range).expect("bad range in test setup").rect;
        self.with_wb(pid, wb_name, |wb, next_key| {
            let s = wb
                .sheets
                .iter_mut()
                .find(|s| s.name == sheet)
                .expect("no such sheet");
            *next_key += 1;
            s.tables.push(TableState {
                id: *next_key,
                name: name.to_string(),
                rect,
                has_headers: true,
                columns: columns.iter().map(|c| c.to_string()).collect(),
                data_rows,
                corrupted: false,
            });
        });
    }

    pub fn set_table_corrupted(&self, pid: u32, wb_name: &str, table: &str) {
        self.with_wb(pid, wb_name, |wb, _| {
            for sheet in &mut wb.sheets {
                if let Some(t) = sheet.tables.iter_mut().find(|t| t.name == table) {
                    t.corrupted = true;
                }
            }
        });
    }

    pub fn set_workbook_locked(&self, pid: u32, wb_name: &str) {
        self.with_wb(pid, wb_name, |wb, _| {
            wb.vba_locked = true;
        });
    }

    pub fn add_module(&self, pid: u32, wb_name: &str, name: &str, kind: i32, lines: &[&str]) {
        self.with_wb(pid, wb_name, |wb, next_key| {
            *next_key += 1;
            wb.comps.push(CompState {
                id: *next_key,
                name: name.to_string(),
                kind,
                lines: lines.iter().map(|l| l.to_string()).collect(),
                predeclared: false,
                export_refuses: false,
            });
        });
    }

    pub fn set_module_predeclared(&self, pid: u32, wb_name: &str, name: &str, value: bool) {
        self.with_wb(pid, wb_name, |wb, _| {
            if let Some(c) = wb.comps.iter_mut().find(|c| c.name == name) {
                c.predeclared = value;
            }
        });
    }

    pub fn set_module_export_refuses(&self, pid: u32, wb_name: &str, name: &str) {
        self.with_wb(pid, wb_name, |wb, _| {
            if let Some(c) = wb.comps.iter_mut().find(|c| c.name == name) {
                c.export_refuses = true;
            }
        });
    }

    pub fn define_macro(&self, pid: u32, name: &str, behavior: MacroBehavior) {
        let mut st = self.state.borrow_mut();
        if let Some(app) = st.apps.iter_mut().find(|a| a.pid == pid) {
            app.macros.insert(name.to_string(), behavior);
        }
    }

    /// Sever the channel: every boundary operation fails with a disconnect.
    pub fn disconnect(&self) {
        self.state.borrow_mut().disconnected = true;
    }

    /// Fail the next boundary operation on `member` with the given record.
    pub fn fail_next(&self, member: &str, code: u32, description: &str) {
        self.state.borrow_mut().fail_next = Some(FailNext {
            member: member.to_string(),
            code,
            description: description.to_string(),
        });
    }

    pub fn set_app_prop(&self, pid: u32, flag: &str, value: Value) {
        let mut st = self.state.borrow_mut();
        if let Some(app) = st.apps.iter_mut().find(|a| a.pid == pid) {
            app.props.insert(flag.to_string(), value);
        }
    }

    // -- inspection --

    pub fn app_prop(&self, pid: u32, flag: &str) -> Option<Value> {
        let st = self.state.borrow();
        st.apps
            .iter()
            .find(|a| a.pid == pid)
            .and_then(|a| a.props.get(flag).cloned())
    }

    /// True if any instance ever saw its `Quit` verb dispatched.
    pub fn quit_invoked(&self) -> bool {
        self.state.borrow().apps.iter().any(|a| a.quit_calls > 0)
    }

    pub fn workbook_names(&self, pid: u32) -> Vec<String> {
        let st = self.state.borrow();
        st.apps
            .iter()
            .find(|a| a.pid == pid)
            .map(|a| a.workbooks.iter().map(|w| w.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn sheet_names(&self, pid: u32, wb_name: &str) -> Vec<String> {
        let st = self.state.borrow();
        st.apps
            .iter()
            .find(|a| a.pid == pid)
            .and_then(|a| a.workbooks.iter().find(|w| w.name == wb_name))
            .map(|w| w.sheets.iter().map(|s| s.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn table_names(&self, pid: u32, wb_name: &str) -> Vec<String> {
        let st = self.state.borrow();
        st.apps
            .iter()
            .find(|a| a.pid == pid)
            .and_then(|a| a.workbooks.iter().find(|w| w.name == wb_name))
            .map(|w| {
                w.sheets
                    .iter()
                    .flat_map(|s| s.tables.iter().map(|t| t.name.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn unlisted_tables(&self, pid: u32, wb_name: &str) -> Vec<String> {
        let st = self.state.borrow();
        st.apps
            .iter()
            .find(|a| a.pid == pid)
            .and_then(|a| a.workbooks.iter().find(|w| w.name == wb_name))
            .map(|w| w.unlisted_tables.clone())
            .unwrap_or_default()
    }

    pub fn deleted_tables(&self, pid: u32, wb_name: &str) -> Vec<String> {
        let st = self.state.borrow();
        st.apps
            .iter()
            .find(|a| a.pid == pid)
            .and_then(|a| a.workbooks.iter().find(|w| w.name == wb_name))
            .map(|w| w.deleted_tables.clone())
            .unwrap_or_default()
    }

    pub fn module_names(&self, pid: u32, wb_name: &str) -> Vec<String> {
        let st = self.state.borrow();
        st.apps
            .iter()
            .find(|a| a.pid == pid)
            .and_then(|a| a.workbooks.iter().find(|w| w.name == wb_name))
            .map(|w| w.comps.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn module_lines(&self, pid: u32, wb_name: &str, name: &str) -> Vec<String> {
        let st = self.state.borrow();
        st.apps
            .iter()
            .find(|a| a.pid == pid)
            .and_then(|a| a.workbooks.iter().find(|w| w.name == wb_name))
            .and_then(|w| w.comps.iter().find(|c| c.name == name))
            .map(|c| c.lines.clone())
            .unwrap_or_default()
    }

    pub fn module_predeclared(&self, pid: u32, wb_name: &str, name: &str) -> Option<bool> {
        let st = self.state.borrow();
        st.apps
            .iter()
            .find(|a| a.pid == pid)
            .and_then(|a| a.workbooks.iter().find(|w| w.name == wb_name))
            .and_then(|w| w.comps.iter().find(|c| c.name == name))
            .map(|c| c.predeclared)
    }

    pub fn run_log(&self, pid: u32) -> Vec<(String, Vec<Value>)> {
        let st = self.state.borrow();
        st.apps
            .iter()
            .find(|a| a.pid == pid)
            .map(|a| a.run_log.clone())
            .unwrap_or_default()
    }

    /// (workbook name, save intent) pairs, in close order.
    pub fn close_log(&self, pid: u32) -> Vec<(String, bool)> {
        let st = self.state.borrow();
        st.apps
            .iter()
            .find(|a| a.pid == pid)
            .map(|a| a.close_log.clone())
            .unwrap_or_default()
    }

    pub fn killed(&self) -> Vec<u32> {
        self.state.borrow().killed.clone()
    }

    /// References the channel still holds (the finalizer pass empties this).
    pub fn outstanding_objects(&self) -> usize {
        self.state.borrow().objects.len()
    }

    /// Total boundary operations dispatched so far.
    pub fn boundary_calls(&self) -> u64 {
        self.state.borrow().calls
    }
}

impl HostChannel for FakeHost {
    fn acquire_new(&self, visible: bool) -> ChannelResult<ObjId> {
        let mut st = self.state.borrow_mut();
        st.enter("acquire_new")?;
        let pid = st.next_pid;
        st.next_pid += 1;
        st.apps.push(AppState::new(pid, visible));
        Ok(st.register(Entity::App { pid }))
    }

    fn acquire_shared(&self) -> ChannelResult<ObjId> {
        let mut st = self.state.borrow_mut();
        st.enter("acquire_shared")?;
        let pid = st
            .apps
            .iter()
            .find(|a| a.in_rot)
            .map(|a| a.pid)
            .ok_or_else(|| {
                ChannelError::new("acquire_shared", hresult::MK_E_UNAVAILABLE)
                    .with_description("operation unavailable: no registered instance")
            })?;
        Ok(st.register(Entity::App { pid }))
    }

    fn connect_by_handle(&self, hwnd: isize) -> ChannelResult<ObjId> {
        let mut st = self.state.borrow_mut();
        st.enter("connect_by_handle")?;
        let pid = st
            .apps
            .iter()
            .find(|a| a.hwnd == hwnd && a.connectable)
            .map(|a| a.pid)
            .ok_or_else(|| {
                ChannelError::new("connect_by_handle", hresult::MK_E_UNAVAILABLE)
                    .with_description(format!("no instance owns window {hwnd:#x}"))
            })?;
        Ok(st.register(Entity::App { pid }))
    }

    fn connect_by_pid(&self, pid: u32) -> ChannelResult<ObjId> {
        let mut st = self.state.borrow_mut();
        st.enter("connect_by_pid")?;
        let ok = st.apps.iter().any(|a| a.pid == pid && a.connectable);
        if !ok {
            return Err(
                ChannelError::new("connect_by_pid", hresult::MK_E_UNAVAILABLE)
                    .with_description(format!("pid {pid} has no object-table entry")),
            );
        }
        Ok(st.register(Entity::App { pid }))
    }

    fn enumerate_object_table(&self) -> ChannelResult<Vec<RotEntry>> {
        let mut st = self.state.borrow_mut();
        st.enter("enumerate_object_table")?;
        let mut entries = Vec::new();
        let pids: Vec<u32> = st
            .apps
            .iter()
            .filter(|a| a.in_rot)
            .map(|a| a.pid)
            .collect();
        for pid in pids {
            let obj = st.register(Entity::App { pid });
            entries.push(RotEntry {
                obj,
                display_name: format!("Microsoft Excel - instance {pid}"),
            });
        }
        let foreign = st.foreign_rot.clone();
        for display_name in foreign {
            // A dangling entry: the object behind it answers nothing.
            let obj = st.register(Entity::App { pid: 0 });
            entries.push(RotEntry { obj, display_name });
        }
        Ok(entries)
    }

    fn enumerate_task_list(&self) -> ChannelResult<Vec<u32>> {
        let mut st = self.state.borrow_mut();
        st.enter("enumerate_task_list")?;
        let mut pids: Vec<u32> = st.apps.iter().map(|a| a.pid).collect();
        pids.extend(st.ghost_pids.iter().copied());
        Ok(pids)
    }

    fn pid_of_window(&self, hwnd: isize) -> ChannelResult<u32> {
        let mut st = self.state.borrow_mut();
        st.enter("pid_of_window")?;
        st.apps
            .iter()
            .find(|a| a.hwnd == hwnd)
            .map(|a| a.pid)
            .ok_or_else(|| {
                ChannelError::new("pid_of_window", 0)
                    .with_description(format!("no process owns window {hwnd:#x}"))
            })
    }

    fn kill_process(&self, pid: u32) -> ChannelResult<()> {
        let mut st = self.state.borrow_mut();
        st.enter("kill_process")?;
        let had_app = st.apps.iter().any(|a| a.pid == pid);
        let had_ghost = st.ghost_pids.contains(&pid);
        if !had_app && !had_ghost {
            return Err(ChannelError::new("kill_process", 0x8007_0057)
                .with_description(format!("no process with pid {pid}")));
        }
        st.apps.retain(|a| a.pid != pid);
        st.ghost_pids.retain(|p| *p != pid);
        st.killed.push(pid);
        Ok(())
    }

    fn get(&self, obj: ObjId, member: &str) -> ChannelResult<Value> {
        let mut st = self.state.borrow_mut();
        st.enter(member)?;
        let entity = st.entity(obj, member)?;
        fake_get(&mut st, &entity, member)
    }

    fn get_indexed(&self, obj: ObjId, member: &str, args: &[Value]) -> ChannelResult<Value> {
        let mut st = self.state.borrow_mut();
        st.enter(member)?;
        let entity = st.entity(obj, member)?;
        fake_get_indexed(&mut st, &entity, member, args)
    }

    fn put(&self, obj: ObjId, member: &str, value: &Value) -> ChannelResult<()> {
        let mut st = self.state.borrow_mut();
        st.enter(member)?;
        let entity = st.entity(obj, member)?;
        fake_put(&mut st, &entity, member, value)
    }

    fn call(&self, obj: ObjId, member: &str, args: &[Value]) -> ChannelResult<Value> {
        let mut st = self.state.borrow_mut();
        st.enter(member)?;
        let entity = st.entity(obj, member)?;
        fake_call(&mut st, &entity, member, args)
    }

    fn release(&self, obj: ObjId) {
        self.state.borrow_mut().objects.remove(&obj);
    }

    fn release_all(&self) {
        self.state.borrow_mut().objects.clear();
    }
}

fn fake_get(st: &mut State, entity: &Entity, member: &str) -> ChannelResult<Value> {
    match entity {
        Entity::App { pid } => match member {
            "Hwnd" => Ok(Value::Int(st.app(*pid, member)?.hwnd as i32)),
            "Workbooks" => {
                st.app(*pid, member)?;
                Ok(Value::Object(st.register(Entity::Workbooks { pid: *pid })))
            }
            "ActiveWorkbook" => {
                let wb = st.app(*pid, member)?.workbooks.last().map(|w| w.id);
                match wb {
                    Some(id) => Ok(Value::Object(
                        st.register(Entity::Workbook { pid: *pid, wb: id }),
                    )),
                    None => Ok(Value::Empty),
                }
            }
            _ => st
                .app(*pid, member)?
                .props
                .get(member)
                .cloned()
                .ok_or_else(|| {
                    ChannelError::new(member, UNKNOWN_NAME)
                        .with_description(format!("no such member '{member}'"))
                }),
        },
        Entity::Workbooks { pid } => match member {
            "Count" => Ok(Value::Int(st.app(*pid, member)?.workbooks.len() as i32)),
            _ => Err(unknown(member)),
        },
        Entity::Workbook { pid, wb } => {
            let state = st.wb(*pid, *wb, member)?;
            match member {
                "Name" => Ok(Value::Text(state.name.clone())),
                "FullName" => Ok(Value::Text(state.full_name.clone())),
                "ReadOnly" => Ok(Value::Bool(state.read_only)),
                "Saved" => Ok(Value::Bool(state.saved)),
                "Worksheets" => Ok(Value::Object(st.register(Entity::Worksheets {
                    pid: *pid,
                    wb: *wb,
                }))),
                "VBProject" => {
                    if state.vba_locked {
                        Err(host_error(
                            member,
                            "Programmatic access to Visual Basic Project is not trusted",
                        ))
                    } else {
                        Ok(Value::Object(st.register(Entity::VbProject {
                            pid: *pid,
                            wb: *wb,
                        })))
                    }
                }
                _ => Err(unknown(member)),
            }
        }
        Entity::Worksheets { pid, wb } => match member {
            "Count" => Ok(Value::Int(st.wb(*pid, *wb, member)?.sheets.len() as i32)),
            _ => Err(unknown(member)),
        },
        Entity::Worksheet { pid, wb, sheet } => {
            let position = st
                .wb(*pid, *wb, member)?
                .sheets
                .iter()
                .position(|s| s.id == *sheet);
            let state = st.sheet(*pid, *wb, *sheet, member)?;
            match member {
                "Name" => Ok(Value::Text(state.name.clone())),
                "Index" => Ok(Value::Int(position.map(|p| p as i32 + 1).unwrap_or(0))),
                "Visible" => Ok(Value::Int(if state.visible { -1 } else { 0 })),
                "UsedRange" => {
                    let rect = Rect::new(
                        1,
                        1,
                        state.used_rows.max(1),
                        state.used_cols.max(1),
                    );
                    Ok(Value::Object(st.register(Entity::Range { rect })))
                }
                "ListObjects" => Ok(Value::Object(st.register(Entity::ListObjects {
                    pid: *pid,
                    wb: *wb,
                    sheet: *sheet,
                }))),
                _ => Err(unknown(member)),
            }
        }
        Entity::Range { rect } => match member {
            "Address" => Ok(Value::Text(dollar(rect))),
            "Rows" => Ok(Value::Object(st.register(Entity::RangeAxis {
                count: rect.rows(),
            }))),
            "Columns" => Ok(Value::Object(st.register(Entity::RangeAxis {
                count: rect.cols(),
            }))),
            _ => Err(unknown(member)),
        },
        Entity::RangeAxis { count } => match member {
            "Count" => Ok(Value::Int(*count as i32)),
            _ => Err(unknown(member)),
        },
        Entity::ListObjects { pid, wb, sheet } => match member {
            "Count" => Ok(Value::Int(
                st.sheet(*pid, *wb, *sheet, member)?.tables.len() as i32,
            )),
            _ => Err(unknown(member)),
        },
        Entity::Table {
            pid,
            wb,
            sheet,
            table,
        } => {
            let state = st.table(*pid, *wb, *sheet, *table, member)?;
            if state.corrupted {
                return Err(host_error(member, "the table definition is corrupted"));
            }
            let rect = state.rect;
            let has_headers = state.has_headers;
            let data_rows = state.data_rows;
            match member {
                "Name" => Ok(Value::Text(state.name.clone())),
                "Range" => Ok(Value::Object(st.register(Entity::Range { rect }))),
                "HeaderRowRange" => {
                    if has_headers {
                        let header = Rect::new(rect.row1, rect.col1, rect.row1, rect.col2);
                        Ok(Value::Object(st.register(Entity::Range { rect: header })))
                    } else {
                        Ok(Value::Empty)
                    }
                }
                "DataBodyRange" => {
                    if data_rows == 0 {
                        Ok(Value::Empty)
                    } else {
                        let top = if has_headers { rect.row1 + 1 } else { rect.row1 };
                        let body = Rect::new(top, rect.col1, top + data_rows - 1, rect.col2);
                        Ok(Value::Object(st.register(Entity::Range { rect: body })))
                    }
                }
                "ListColumns" => Ok(Value::Object(st.register(Entity::ListColumns {
                    pid: *pid,
                    wb: *wb,
                    sheet: *sheet,
                    table: *table,
                }))),
                _ => Err(unknown(member)),
            }
        }
        Entity::ListColumns {
            pid,
            wb,
            sheet,
            table,
        } => match member {
            "Count" => Ok(Value::Int(
                st.table(*pid, *wb, *sheet, *table, member)?.columns.len() as i32,
            )),
            _ => Err(unknown(member)),
        },
        Entity::ListColumn {
            pid,
            wb,
            sheet,
            table,
            index,
        } => match member {
            "Name" => {
                let state = st.table(*pid, *wb, *sheet, *table, member)?;
                state
                    .columns
                    .get(*index)
                    .cloned()
                    .map(Value::Text)
                    .ok_or_else(|| unknown(member))
            }
            _ => Err(unknown(member)),
        },
        Entity::VbProject { pid, wb } => match member {
            "VBComponents" => {
                st.wb(*pid, *wb, member)?;
                Ok(Value::Object(st.register(Entity::VbComponents {
                    pid: *pid,
                    wb: *wb,
                })))
            }
            _ => Err(unknown(member)),
        },
        Entity::VbComponents { pid, wb } => match member {
            "Count" => Ok(Value::Int(st.wb(*pid, *wb, member)?.comps.len() as i32)),
            _ => Err(unknown(member)),
        },
        Entity::VbComponent { pid, wb, comp } => {
            let state = st.comp(*pid, *wb, *comp, member)?;
            match member {
                "Name" => Ok(Value::Text(state.name.clone())),
                "Type" => Ok(Value::Int(state.kind)),
                "CodeModule" => Ok(Value::Object(st.register(Entity::CodeModule {
                    pid: *pid,
                    wb: *wb,
                    comp: *comp,
                }))),
                _ => Err(unknown(member)),
            }
        }
        Entity::CodeModule { pid, wb, comp } => match member {
            "CountOfLines" => Ok(Value::Int(
                st.comp(*pid, *wb, *comp, member)?.lines.len() as i32,
            )),
            _ => Err(unknown(member)),
        },
        Entity::ComponentProperty { pid, wb, comp } => match member {
            "Value" => Ok(Value::Bool(st.comp(*pid, *wb, *comp, member)?.predeclared)),
            _ => Err(unknown(member)),
        },
    }
}

fn fake_get_indexed(
    st: &mut State,
    entity: &Entity,
    member: &str,
    args: &[Value],
) -> ChannelResult<Value> {
    match (entity, member) {
        (Entity::Workbooks { pid }, "Item") => {
            let index = positional_index(args, member)?;
            let wb = st
                .app(*pid, member)?
                .workbooks
                .get(index)
                .map(|w| w.id)
                .ok_or_else(|| host_error(member, "subscript out of range"))?;
            Ok(Value::Object(st.register(Entity::Workbook {
                pid: *pid,
                wb,
            })))
        }
        (Entity::Worksheets { pid, wb }, "Item") => {
            let index = positional_index(args, member)?;
            let sheet = st
                .wb(*pid, *wb, member)?
                .sheets
                .get(index)
                .map(|s| s.id)
                .ok_or_else(|| host_error(member, "subscript out of range"))?;
            Ok(Value::Object(st.register(Entity::Worksheet {
                pid: *pid,
                wb: *wb,
                sheet,
            })))
        }
        (Entity::Worksheet { .. }, "Range") => {
            let addr = args
                .first()
                .and_then(|v| v.as_str())
                .ok_or_else(|| unknown(member))?;
            let rect = parse_range(addr)
                .map_err(|_| host_error(member, format!("bad range reference '{addr}'")))?
                .rect;
            Ok(Value::Object(st.register(Entity::Range { rect })))
        }
        (Entity::ListObjects { pid, wb, sheet }, "Item") => {
            let index = positional_index(args, member)?;
            let table = st
                .sheet(*pid, *wb, *sheet, member)?
                .tables
                .get(index)
                .map(|t| t.id)
                .ok_or_else(|| host_error(member, "subscript out of range"))?;
            Ok(Value::Object(st.register(Entity::Table {
                pid: *pid,
                wb: *wb,
                sheet: *sheet,
                table,
            })))
        }
        (
            Entity::ListColumns {
                pid,
                wb,
                sheet,
                table,
            },
            "Item",
        ) => {
            let index = positional_index(args, member)?;
            let count = st.table(*pid, *wb, *sheet, *table, member)?.columns.len();
            if index >= count {
                return Err(host_error(member, "subscript out of range"));
            }
            Ok(Value::Object(st.register(Entity::ListColumn {
                pid: *pid,
                wb: *wb,
                sheet: *sheet,
                table: *table,
                index,
            })))
        }
        (Entity::VbComponents { pid, wb }, "Item") => {
            let index = positional_index(args, member)?;
            let comp = st
                .wb(*pid, *wb, member)?
                .comps
                .get(index)
                .map(|c| c.id)
                .ok_or_else(|| host_error(member, "subscript out of range"))?;
            Ok(Value::Object(st.register(Entity::VbComponent {
                pid: *pid,
                wb: *wb,
                comp,
            })))
        }
        (Entity::VbComponent { pid, wb, comp }, "Properties") => {
            let name = args.first().and_then(|v| v.as_str()).unwrap_or_default();
            if name != "PredeclaredId" {
                return Err(host_error(member, format!("no property named '{name}'")));
            }
            st.comp(*pid, *wb, *comp, member)?;
            Ok(Value::Object(st.register(Entity::ComponentProperty {
                pid: *pid,
                wb: *wb,
                comp: *comp,
            })))
        }
        _ => Err(unknown(member)),
    }
}

fn fake_put(st: &mut State, entity: &Entity, member: &str, value: &Value) -> ChannelResult<()> {
    match entity {
        Entity::App { pid } => {
            let app = st.app_mut(*pid, member)?;
            if app.props.contains_key(member) {
                app.props.insert(member.to_string(), value.clone());
                Ok(())
            } else {
                Err(unknown(member))
            }
        }
        Entity::Worksheet { pid, wb, sheet } if member == "Name" => {
            let name = value.as_str().unwrap_or_default().to_string();
            let duplicate = st
                .wb(*pid, *wb, member)?
                .sheets
                .iter()
                .any(|s| s.id != *sheet && s.name.eq_ignore_ascii_case(&name));
            if duplicate {
                return Err(host_error(member, format!("sheet name '{name}' is taken")));
            }
            st.sheet_mut(*pid, *wb, *sheet, member)?.name = name;
            Ok(())
        }
        Entity::Table {
            pid,
            wb,
            sheet,
            table,
        } if member == "Name" => {
            let name = value.as_str().unwrap_or_default().to_string();
            let duplicate = st.wb(*pid, *wb, member)?.sheets.iter().any(|s| {
                s.tables
                    .iter()
                    .any(|t| t.id != *table && t.name == name)
            });
            if duplicate {
                return Err(host_error(member, format!("table name '{name}' is taken")));
            }
            let state = st
                .sheet_mut(*pid, *wb, *sheet, member)?
                .tables
                .iter_mut()
                .find(|t| t.id == *table)
                .ok_or_else(|| unknown(member))?;
            state.name = name;
            Ok(())
        }
        Entity::VbComponent { pid, wb, comp } if member == "Name" => {
            let name = value.as_str().unwrap_or_default().to_string();
            let duplicate = st
                .wb(*pid, *wb, member)?
                .comps
                .iter()
                .any(|c| c.id != *comp && c.name.eq_ignore_ascii_case(&name));
            if duplicate {
                return Err(host_error(member, format!("module name '{name}' is taken")));
            }
            st.comp_mut(*pid, *wb, *comp, member)?.name = name;
            Ok(())
        }
        Entity::ComponentProperty { pid, wb, comp } if member == "Value" => {
            st.comp_mut(*pid, *wb, *comp, member)?.predeclared =
                value.as_bool().unwrap_or(false);
            Ok(())
        }
        _ => Err(unknown(member)),
    }
}

fn fake_call(
    st: &mut State,
    entity: &Entity,
    member: &str,
    args: &[Value],
) -> ChannelResult<Value> {
    match (entity, member) {
        (Entity::App { pid }, "Quit") => {
            st.app_mut(*pid, member)?.quit_calls += 1;
            Ok(Value::Empty)
        }
        (Entity::App { pid }, "CalculateFull") => {
            st.app(*pid, member)?;
            Ok(Value::Empty)
        }
        (Entity::App { pid }, "Run") => {
            let qualified = args
                .first()
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let rest: Vec<Value> = args.iter().skip(1).cloned().collect();
            let behavior = {
                let app = st.app(*pid, member)?;
                app.macros
                    .get(&qualified)
                    .or_else(|| {
                        // `'Book1.xlsm'!Module.Run` also matches its bare name.
                        qualified
                            .rsplit_once('!')
                            .and_then(|(_, bare)| app.macros.get(bare))
                    })
                    .cloned()
            };
            st.app_mut(*pid, member)?
                .run_log
                .push((qualified.clone(), rest));
            match behavior {
                Some(MacroBehavior::Return(v)) => Ok(v),
                Some(MacroBehavior::Error { code, description }) => {
                    Err(ChannelError::new(member, code)
                        .with_source("VBAProject")
                        .with_description(description))
                }
                None => Err(host_error(
                    member,
                    format!("Cannot run the macro '{qualified}'"),
                )),
            }
        }
        (Entity::Workbooks { pid }, "Open") => {
            let path = args
                .first()
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let read_only = args.get(2).and_then(|v| v.as_bool()).unwrap_or(false);
            let name = Path::new(&path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.clone());
            let exists = st
                .app(*pid, member)?
                .workbooks
                .iter()
                .any(|w| w.name.eq_ignore_ascii_case(&name));
            if exists {
                return Err(host_error(member, format!("'{name}' is already open")));
            }
            let wb_id = st.key();
            let sheet_id = st.key();
            let app = st.app_mut(*pid, member)?;
            app.workbooks.push(WbState {
                id: wb_id,
                name,
                full_name: path,
                read_only,
                saved: true,
                vba_locked: false,
                sheets: vec![SheetState {
                    id: sheet_id,
                    name: "Sheet1".to_string(),
                    visible: true,
                    used_rows: 0,
                    used_cols: 0,
                    tables: Vec::new(),
                }],
                comps: Vec::new(),
                unlisted_tables: Vec::new(),
                deleted_tables: Vec::new(),
            });
            Ok(Value::Object(st.register(Entity::Workbook {
                pid: *pid,
                wb: wb_id,
            })))
        }
        (Entity::Workbook { pid, wb }, "Close") => {
            let save = args.first().and_then(|v| v.as_bool()).unwrap_or(false);
            let name = st.wb(*pid, *wb, member)?.name.clone();
            let app = st.app_mut(*pid, member)?;
            app.workbooks.retain(|w| w.id != *wb);
            app.close_log.push((name, save));
            Ok(Value::Empty)
        }
        (Entity::Workbook { pid, wb }, "Save") => {
            st.wb_mut(*pid, *wb, member)?.saved = true;
            Ok(Value::Empty)
        }
        (Entity::Workbook { pid, wb }, "SaveAs") => {
            let path = args
                .first()
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let name = Path::new(&path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.clone());
            let state = st.wb_mut(*pid, *wb, member)?;
            state.full_name = path;
            state.name = name;
            state.saved = true;
            Ok(Value::Empty)
        }
        (Entity::Worksheets { pid, wb }, "Add") => {
            let after = args.get(1).and_then(|v| v.as_object());
            let after_id = match after {
                Some(obj) => match st.entity(obj, member)? {
                    Entity::Worksheet { sheet, .. } => Some(sheet),
                    _ => None,
                },
                None => None,
            };
            let sheet_id = st.key();
            let state = st.wb_mut(*pid, *wb, member)?;
            let mut n = state.sheets.len() + 1;
            let mut name = format!("Sheet{n}");
            while state.sheets.iter().any(|s| s.name.eq_ignore_ascii_case(&name)) {
                n += 1;
                name = format!("Sheet{n}");
            }
            let new_sheet = SheetState {
                id: sheet_id,
                name,
                visible: true,
                used_rows: 0,
                used_cols: 0,
                tables: Vec::new(),
            };
            let position = match after_id {
                Some(id) => state
                    .sheets
                    .iter()
                    .position(|s| s.id == id)
                    .map(|p| p + 1)
                    .unwrap_or(state.sheets.len()),
                None => 0,
            };
            state.sheets.insert(position, new_sheet);
            Ok(Value::Object(st.register(Entity::Worksheet {
                pid: *pid,
                wb: *wb,
                sheet: sheet_id,
            })))
        }
        (Entity::Worksheet { pid, wb, sheet }, "Delete") => {
            let state = st.wb_mut(*pid, *wb, member)?;
            if state.sheets.len() <= 1 {
                return Err(host_error(
                    member,
                    "a workbook must contain at least one sheet",
                ));
            }
            state.sheets.retain(|s| s.id != *sheet);
            Ok(Value::Empty)
        }
        (Entity::Worksheet { pid, wb, sheet }, "Copy") => {
            let (position, clone) = {
                let state = st.wb(*pid, *wb, member)?;
                let position = state
                    .sheets
                    .iter()
                    .position(|s| s.id == *sheet)
                    .ok_or_else(|| unknown(member))?;
                let source = &state.sheets[position];
                let mut base = format!("{} (2)", source.name);
                let mut n = 2;
                while state.sheets.iter().any(|s| s.name.eq_ignore_ascii_case(&base)) {
                    n += 1;
                    base = format!("{} ({n})", source.name);
                }
                (
                    position,
                    SheetState {
                        id: 0,
                        name: base,
                        visible: source.visible,
                        used_rows: source.used_rows,
                        used_cols: source.used_cols,
                        tables: Vec::new(),
                    },
                )
            };
            let sheet_id = st.key();
            let state = st.wb_mut(*pid, *wb, member)?;
            let mut clone = clone;
            clone.id = sheet_id;
            state.sheets.insert(position + 1, clone);
            Ok(Value::Empty)
        }
        (Entity::ListObjects { pid, wb, sheet }, "Add") => {
            let rect = match args.get(1).and_then(|v| v.as_object()) {
                Some(obj) => match st.entity(obj, member)? {
                    Entity::Range { rect } => rect,
                    _ => return Err(host_error(member, "source is not a range")),
                },
                None => return Err(host_error(member, "source range is required")),
            };
            let has_headers = args.get(3).and_then(|v| v.as_i32()).unwrap_or(2) == 1;
            let table_id = st.key();
            let taken: Vec<String> = st
                .wb(*pid, *wb, member)?
                .sheets
                .iter()
                .flat_map(|s| s.tables.iter().map(|t| t.name.clone()))
                .collect();
            let mut n = taken.len() + 1;
            let mut name = format!("Table{n}");
            while taken.contains(&name) {
                n += 1;
                name = format!("Table{n}");
            }
            let columns = (0..rect.cols())
                .map(|i| format!("Column{}", i + 1))
                .collect();
            let data_rows = rect.rows().saturating_sub(if has_headers { 1 } else { 0 });
            let state = st.sheet_mut(*pid, *wb, *sheet, member)?;
            state.tables.push(TableState {
                id: table_id,
                name,
                rect,
                has_headers,
                columns,
                data_rows,
                corrupted: false,
            });
            Ok(Value::Object(st.register(Entity::Table {
                pid: *pid,
                wb: *wb,
                sheet: *sheet,
                table: table_id,
            })))
        }
        (
            Entity::Table {
                pid,
                wb,
                sheet,
                table,
            },
            "Unlist" | "Delete",
        ) => {
            let name = st.table(*pid, *wb, *sheet, *table, member)?.name.clone();
            let force = member == "Delete";
            let wb_state = st.wb_mut(*pid, *wb, member)?;
            if force {
                wb_state.deleted_tables.push(name);
            } else {
                wb_state.unlisted_tables.push(name);
            }
            st.sheet_mut(*pid, *wb, *sheet, member)?
                .tables
                .retain(|t| t.id != *table);
            Ok(Value::Empty)
        }
        (Entity::VbComponents { pid, wb }, "Add") => {
            let kind = args.first().and_then(|v| v.as_i32()).unwrap_or(1);
            let base = match kind {
                2 => "Class",
                3 => "UserForm",
                _ => "Module",
            };
            let comp_id = st.key();
            let state = st.wb_mut(*pid, *wb, member)?;
            let mut n = 1;
            let mut name = format!("{base}{n}");
            while state.comps.iter().any(|c| c.name.eq_ignore_ascii_case(&name)) {
                n += 1;
                name = format!("{base}{n}");
            }
            state.comps.push(CompState {
                id: comp_id,
                name,
                kind,
                lines: Vec::new(),
                predeclared: false,
                export_refuses: false,
            });
            Ok(Value::Object(st.register(Entity::VbComponent {
                pid: *pid,
                wb: *wb,
                comp: comp_id,
            })))
        }
        (Entity::VbComponents { pid, wb }, "Import") => {
            let path = args
                .first()
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let bytes = std::fs::read(&path)
                .map_err(|e| host_error(member, format!("cannot import '{path}': {e}")))?;
            let (text, _, _) = WINDOWS_1252.decode(&bytes);
            let source = ModuleSource::parse(&text)
                .ok_or_else(|| host_error(member, "file has no VB_Name attribute"))?;
            let kind = match Path::new(&path)
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
                .as_deref()
            {
                Some("cls") => 2,
                Some("frm") => 3,
                _ => 1,
            };
            let comp_id = st.key();
            let state = st.wb_mut(*pid, *wb, member)?;
            // The import verb replaces an existing module of the same name.
            state
                .comps
                .retain(|c| !c.name.eq_ignore_ascii_case(&source.name));
            state.comps.push(CompState {
                id: comp_id,
                name: source.name.clone(),
                kind,
                lines: source
                    .body
                    .lines()
                    .map(|l| l.to_string())
                    .collect(),
                predeclared: source.predeclared,
                export_refuses: false,
            });
            Ok(Value::Object(st.register(Entity::VbComponent {
                pid: *pid,
                wb: *wb,
                comp: comp_id,
            })))
        }
        (Entity::VbComponents { pid, wb }, "Remove") => {
            let comp_id = match args.first().and_then(|v| v.as_object()) {
                Some(obj) => match st.entity(obj, member)? {
                    Entity::VbComponent { comp, .. } => comp,
                    _ => return Err(host_error(member, "argument is not a component")),
                },
                None => return Err(host_error(member, "component argument is required")),
            };
            st.wb_mut(*pid, *wb, member)?
                .comps
                .retain(|c| c.id != comp_id);
            Ok(Value::Empty)
        }
        (Entity::VbComponent { pid, wb, comp }, "Export") => {
            let dest = args
                .first()
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let state = st.comp(*pid, *wb, *comp, member)?;
            if state.export_refuses {
                return Err(host_error(member, "this component cannot be exported"));
            }
            let mut text = format!("Attribute VB_Name = \"{}\"\r\n", state.name);
            text.push_str(&state.lines.join("\r\n"));
            let (encoded, _, _) = WINDOWS_1252.encode(&text);
            std::fs::write(&dest, encoded)
                .map_err(|e| host_error(member, format!("cannot write '{dest}': {e}")))?;
            Ok(Value::Empty)
        }
        (Entity::CodeModule { pid, wb, comp }, "Lines") => {
            let start = args.first().and_then(|v| v.as_i32()).unwrap_or(1).max(1) as usize;
            let count = args.get(1).and_then(|v| v.as_i32()).unwrap_or(0).max(0) as usize;
            let state = st.comp(*pid, *wb, *comp, member)?;
            let end = (start - 1 + count).min(state.lines.len());
            let slice = state
                .lines
                .get(start - 1..end)
                .unwrap_or_default()
                .join("\r\n");
            Ok(Value::Text(slice))
        }
        (Entity::CodeModule { pid, wb, comp }, "AddFromString") => {
            let text = args
                .first()
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            st.comp_mut(*pid, *wb, *comp, member)?
                .lines
                .extend(text.lines().map(|l| l.to_string()));
            Ok(Value::Empty)
        }
        _ => Err(unknown(member)),
    }
}

fn positional_index(args: &[Value], member: &str) -> ChannelResult<usize> {
    let raw = args
        .first()
        .and_then(|v| v.as_i32())
        .ok_or_else(|| host_error(member, "index argument is required"))?;
    if raw < 1 {
        return Err(host_error(member, "subscript out of range"));
    }
    Ok((raw - 1) as usize)
}

fn unknown(member: &str) -> ChannelError {
    ChannelError::new(member, UNKNOWN_NAME)
        .with_description(format!("no such member '{member}'"))
}
