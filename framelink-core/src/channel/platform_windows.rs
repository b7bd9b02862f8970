//! Windows backend: named file mapping + auto-reset event.

use std::time::Duration;

use windows::core::HSTRING;
use windows::Win32::Foundation::{
    CloseHandle, HANDLE, INVALID_HANDLE_VALUE, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows::Win32::System::Memory::{
    CreateFileMappingW, MapViewOfFile, OpenFileMappingW, UnmapViewOfFile, VirtualQuery,
    FILE_MAP_ALL_ACCESS, MEMORY_BASIC_INFORMATION, MEMORY_MAPPED_VIEW_ADDRESS, PAGE_READWRITE,
};
use windows::Win32::System::Threading::{
    CreateEventW, OpenEventW, SetEvent, WaitForSingleObject, EVENT_ALL_ACCESS,
};

use crate::error::ShareError;

// ── SharedRegion ─────────────────────────────────────────────────

/// A named file-mapping view.
///
/// Windows reference-counts named mappings, so there is no unlink step:
/// the object disappears once every handle and view is closed.
#[derive(Debug)]
pub struct SharedRegion {
    mapping: HANDLE,
    view: MEMORY_MAPPED_VIEW_ADDRESS,
    len: usize,
}

// SAFETY: the mapping handle and view address are process-global and
// stay valid until drop.
unsafe impl Send for SharedRegion {}

impl SharedRegion {
    pub fn create(name: &str, len: usize) -> Result<Self, ShareError> {
        unsafe {
            let mapping = CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                None,
                PAGE_READWRITE,
                (len as u64 >> 32) as u32,
                len as u32,
                &HSTRING::from(name),
            )
            .map_err(|e| ShareError::Mapping(format!("CreateFileMappingW: {e}")))?;

            let view = MapViewOfFile(mapping, FILE_MAP_ALL_ACCESS, 0, 0, len);
            if view.Value.is_null() {
                let err = windows::core::Error::from_win32();
                let _ = CloseHandle(mapping);
                return Err(ShareError::Mapping(format!("MapViewOfFile: {err}")));
            }
            Ok(Self { mapping, view, len })
        }
    }

    /// Open an existing named mapping, sized from the mapping itself.
    pub fn open(name: &str) -> Result<Self, ShareError> {
        unsafe {
            let mapping = OpenFileMappingW(FILE_MAP_ALL_ACCESS.0, false, &HSTRING::from(name))
                .map_err(|_| ShareError::ChannelNotFound(name.to_string()))?;

            // Length 0 maps the full section; VirtualQuery recovers its size.
            let view = MapViewOfFile(mapping, FILE_MAP_ALL_ACCESS, 0, 0, 0);
            if view.Value.is_null() {
                let err = windows::core::Error::from_win32();
                let _ = CloseHandle(mapping);
                return Err(ShareError::Mapping(format!("MapViewOfFile: {err}")));
            }
            let mut info = MEMORY_BASIC_INFORMATION::default();
            if VirtualQuery(Some(view.Value), &mut info, std::mem::size_of_val(&info)) == 0 {
                let err = windows::core::Error::from_win32();
                let _ = UnmapViewOfFile(view);
                let _ = CloseHandle(mapping);
                return Err(ShareError::Mapping(format!("VirtualQuery: {err}")));
            }
            Ok(Self {
                mapping,
                view,
                len: info.RegionSize,
            })
        }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.view.Value as *mut u8
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        unsafe {
            let _ = UnmapViewOfFile(self.view);
            let _ = CloseHandle(self.mapping);
        }
    }
}

// ── FrameSignal ──────────────────────────────────────────────────

/// Named auto-reset event; one `raise` releases one waiter.
#[derive(Debug)]
pub struct FrameSignal {
    event: HANDLE,
}

// SAFETY: event handles are process-global kernel objects.
unsafe impl Send for FrameSignal {}

impl FrameSignal {
    pub fn create(name: &str) -> Result<Self, ShareError> {
        unsafe {
            let event = CreateEventW(None, false, false, &HSTRING::from(name))
                .map_err(|e| ShareError::Signal(format!("CreateEventW: {e}")))?;
            Ok(Self { event })
        }
    }

    pub fn open(name: &str) -> Result<Self, ShareError> {
        unsafe {
            let event = OpenEventW(EVENT_ALL_ACCESS, false, &HSTRING::from(name))
                .map_err(|_| ShareError::ChannelNotFound(name.to_string()))?;
            Ok(Self { event })
        }
    }

    pub fn raise(&self) {
        unsafe {
            let _ = SetEvent(self.event);
        }
    }

    /// Wait for the signal. Returns `Ok(false)` on timeout.
    pub fn wait(&self, timeout: Duration) -> Result<bool, ShareError> {
        let millis = timeout.as_millis().min(u128::from(u32::MAX - 1)) as u32;
        unsafe {
            match WaitForSingleObject(self.event, millis) {
                WAIT_OBJECT_0 => Ok(true),
                WAIT_TIMEOUT => Ok(false),
                other => Err(ShareError::Signal(format!(
                    "WaitForSingleObject returned {:#x}",
                    other.0
                ))),
            }
        }
    }
}

impl Drop for FrameSignal {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.event);
        }
    }
}
