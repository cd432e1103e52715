//! Windows process backend

use std::ffi::c_void;
use std::mem::size_of;
use std::path::PathBuf;

use tracing::debug;
use windows::Win32::Foundation::{CloseHandle, HANDLE, MAX_PATH};
use windows::Win32::System::Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, MODULEENTRY32W, Module32FirstW, Module32NextW, PROCESSENTRY32W,
    Process32FirstW, Process32NextW, TH32CS_SNAPMODULE, TH32CS_SNAPMODULE32, TH32CS_SNAPPROCESS,
};
use windows::Win32::System::Memory::{MEMORY_BASIC_INFORMATION, VirtualQueryEx};
use windows::Win32::System::Threading::{
    GetExitCodeProcess, OpenProcess, PROCESS_NAME_WIN32, PROCESS_QUERY_INFORMATION,
    PROCESS_VM_OPERATION, PROCESS_VM_READ, PROCESS_VM_WRITE, QueryFullProcessImageNameW,
};
use windows::core::PWSTR;

use crate::error::{Error, Result};
use crate::memory::process::{ModuleInfo, ProcessMemory};
use crate::memory::region::MemoryRegion;

/// `GetExitCodeProcess` value for a running process
const STILL_ACTIVE: u32 = 259;

fn wide_to_string(wide: &[u16]) -> String {
    let len = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
    String::from_utf16_lossy(&wide[..len])
}

fn strip_exe(name: &str) -> &str {
    match name.len().checked_sub(4).and_then(|split| name.split_at_checked(split)) {
        Some((stem, ext)) if ext.eq_ignore_ascii_case(".exe") => stem,
        _ => name,
    }
}

/// An opened handle to the game process
pub struct ProcessHandle {
    handle: HANDLE,
    pid: u32,
}

impl ProcessHandle {
    /// Find a running process by executable name (with or without `.exe`) and open it
    pub fn find_and_open(process_name: &str) -> Result<Self> {
        let pid = Self::find_pid(process_name)?;
        Self::open(pid)
    }

    pub fn open(pid: u32) -> Result<Self> {
        let access =
            PROCESS_VM_READ | PROCESS_VM_WRITE | PROCESS_VM_OPERATION | PROCESS_QUERY_INFORMATION;
        // SAFETY: OpenProcess has no memory-safety preconditions; failure is reported as Err.
        let handle = unsafe { OpenProcess(access, false, pid) }
            .map_err(|e| Error::ProcessOpenFailed(format!("pid {}: {}", pid, e)))?;
        debug!("Opened process {}", pid);
        Ok(Self { handle, pid })
    }

    fn find_pid(process_name: &str) -> Result<u32> {
        let wanted = strip_exe(process_name);
        // SAFETY: snapshot handle is closed below on every path.
        let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) }
            .map_err(|e| Error::ProcessNotFound(format!("{}: {}", process_name, e)))?;

        let mut entry = PROCESSENTRY32W {
            dwSize: size_of::<PROCESSENTRY32W>() as u32,
            ..Default::default()
        };
        let mut found = None;
        // SAFETY: entry is a properly sized PROCESSENTRY32W owned by this frame.
        let mut ok = unsafe { Process32FirstW(snapshot, &mut entry) }.is_ok();
        while ok {
            let exe = wide_to_string(&entry.szExeFile);
            if strip_exe(&exe).eq_ignore_ascii_case(wanted) {
                found = Some(entry.th32ProcessID);
                break;
            }
            // SAFETY: same entry buffer as above.
            ok = unsafe { Process32NextW(snapshot, &mut entry) }.is_ok();
        }
        // SAFETY: snapshot was returned by CreateToolhelp32Snapshot.
        let _ = unsafe { CloseHandle(snapshot) };

        found.ok_or_else(|| Error::ProcessNotFound(process_name.to_string()))
    }

    /// Full path of the process executable
    pub fn executable_path(&self) -> Result<PathBuf> {
        let mut buffer = vec![0u16; MAX_PATH as usize * 2];
        let mut size = buffer.len() as u32;
        // SAFETY: buffer outlives the call and size holds its capacity in characters.
        unsafe {
            QueryFullProcessImageNameW(
                self.handle,
                PROCESS_NAME_WIN32,
                PWSTR(buffer.as_mut_ptr()),
                &mut size,
            )
        }
        .map_err(|e| Error::ProcessOpenFailed(format!("image name of pid {}: {}", self.pid, e)))?;
        Ok(PathBuf::from(String::from_utf16_lossy(&buffer[..size as usize])))
    }

    fn modules(&self) -> Vec<ModuleInfo> {
        let mut modules = Vec::new();
        // SAFETY: snapshot handle is closed below.
        let Ok(snapshot) =
            (unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, self.pid) })
        else {
            return modules;
        };

        let mut entry = MODULEENTRY32W {
            dwSize: size_of::<MODULEENTRY32W>() as u32,
            ..Default::default()
        };
        // SAFETY: entry is a properly sized MODULEENTRY32W owned by this frame.
        let mut ok = unsafe { Module32FirstW(snapshot, &mut entry) }.is_ok();
        while ok {
            modules.push(ModuleInfo {
                name: wide_to_string(&entry.szModule),
                base_address: entry.modBaseAddr as u64,
                size: entry.modBaseSize as u64,
            });
            // SAFETY: same entry buffer as above.
            ok = unsafe { Module32NextW(snapshot, &mut entry) }.is_ok();
        }
        // SAFETY: snapshot was returned by CreateToolhelp32Snapshot.
        let _ = unsafe { CloseHandle(snapshot) };
        modules
    }
}

impl ProcessMemory for ProcessHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_alive(&self) -> bool {
        let mut code = 0u32;
        // SAFETY: code is a valid out pointer for the duration of the call.
        unsafe { GetExitCodeProcess(self.handle, &mut code) }.is_ok() && code == STILL_ACTIVE
    }

    fn main_module(&self) -> Option<ModuleInfo> {
        // Toolhelp lists the executable first
        self.modules().into_iter().next()
    }

    fn module(&self, name: &str) -> Option<ModuleInfo> {
        self.modules()
            .into_iter()
            .find(|module| module.name.eq_ignore_ascii_case(name))
    }

    fn read_bytes(&self, address: u64, len: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; len];
        let mut read = 0usize;
        // SAFETY: buffer is valid for `len` bytes; the remote address is only
        // dereferenced by the kernel, which reports faults as Err.
        unsafe {
            ReadProcessMemory(
                self.handle,
                address as *const c_void,
                buffer.as_mut_ptr().cast(),
                len,
                Some(&mut read),
            )
        }
        .map_err(|e| Error::read_failed(address, e.to_string()))?;

        if read != len {
            return Err(Error::read_failed(
                address,
                format!("partial read: {} of {} bytes", read, len),
            ));
        }
        Ok(buffer)
    }

    fn write_bytes(&self, address: u64, data: &[u8]) -> Result<()> {
        let mut written = 0usize;
        // SAFETY: data is valid for its length; remote faults are reported as Err.
        unsafe {
            WriteProcessMemory(
                self.handle,
                address as *const c_void,
                data.as_ptr().cast(),
                data.len(),
                Some(&mut written),
            )
        }
        .map_err(|e| Error::MemoryWriteFailed {
            address,
            message: e.to_string(),
        })?;

        if written != data.len() {
            return Err(Error::MemoryWriteFailed {
                address,
                message: format!("partial write: {} of {} bytes", written, data.len()),
            });
        }
        Ok(())
    }

    fn region_at(&self, address: u64) -> Option<MemoryRegion> {
        let mut info = MEMORY_BASIC_INFORMATION::default();
        // SAFETY: info is a properly sized MEMORY_BASIC_INFORMATION owned by this frame.
        let written = unsafe {
            VirtualQueryEx(
                self.handle,
                Some(address as *const c_void),
                &mut info,
                size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        if written == 0 {
            return None;
        }
        Some(MemoryRegion {
            base_address: info.BaseAddress as u64,
            size: info.RegionSize as u64,
            state: info.State.0,
            protect: info.Protect.0,
        })
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        // SAFETY: handle was returned by OpenProcess and is closed exactly once.
        let _ = unsafe { CloseHandle(self.handle) };
    }
}
