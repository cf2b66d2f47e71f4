//! OS task listing and process termination.

use windows::Win32::{
    Foundation::{CloseHandle, HWND},
    System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
        TH32CS_SNAPPROCESS,
    },
    System::Threading::{OpenProcess, TerminateProcess, PROCESS_TERMINATE},
    UI::WindowsAndMessaging::GetWindowThreadProcessId,
};

use excelctl_core::ChannelError;

/// Image name of the host executable in the task listing.
const HOST_IMAGE: &str = "excel.exe";

/// Enumerate pids of host processes via the toolhelp snapshot.
pub fn host_pids() -> Result<Vec<u32>, ChannelError> {
    unsafe {
        let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0).map_err(|e| {
            ChannelError::new("Toolhelp32Snapshot", e.code().0 as u32)
                .with_description(e.message().to_string())
        })?;

        let mut pids = Vec::new();
        let mut entry = PROCESSENTRY32W {
            dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
            ..Default::default()
        };
        if Process32FirstW(snapshot, &mut entry).is_ok() {
            loop {
                let name_len = entry
                    .szExeFile
                    .iter()
                    .position(|c| *c == 0)
                    .unwrap_or(entry.szExeFile.len());
                let name = String::from_utf16_lossy(&entry.szExeFile[..name_len]);
                if name.eq_ignore_ascii_case(HOST_IMAGE) {
                    pids.push(entry.th32ProcessID);
                }
                if Process32NextW(snapshot, &mut entry).is_err() {
                    break;
                }
            }
        }
        let _ = CloseHandle(snapshot);
        Ok(pids)
    }
}

/// Map a top-level window handle to its owning process id.
pub fn pid_of_window(hwnd: isize) -> Result<u32, ChannelError> {
    unsafe {
        let mut pid = 0u32;
        GetWindowThreadProcessId(HWND(hwnd as *mut _), Some(&mut pid));
        if pid == 0 {
            Err(ChannelError::new("GetWindowThreadProcessId", 0)
                .with_description(format!("no process owns window {hwnd:#x}")))
        } else {
            Ok(pid)
        }
    }
}

/// Terminate a process at the OS level.
pub fn kill(pid: u32) -> Result<(), ChannelError> {
    unsafe {
        let handle = OpenProcess(PROCESS_TERMINATE, false, pid).map_err(|e| {
            ChannelError::new("OpenProcess", e.code().0 as u32)
                .with_description(e.message().to_string())
        })?;
        let result = TerminateProcess(handle, 1);
        let _ = CloseHandle(handle);
        result.map_err(|e| {
            ChannelError::new("TerminateProcess", e.code().0 as u32)
                .with_description(e.message().to_string())
        })
    }
}
