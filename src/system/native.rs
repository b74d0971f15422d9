//! Shared Win32 plumbing: device handles, ioctls and configuration-manager
//! lookups used by every backend.

use std::ffi::c_void;
use std::io;

use rayon::prelude::*;
use windows::Win32::Devices::DeviceAndDriverInstallation::{
    CM_GET_DEVICE_INTERFACE_LIST_PRESENT, CM_Get_DevNode_PropertyW, CM_Get_Device_Interface_ListW,
    CM_Get_Device_Interface_List_SizeW, CM_Get_Device_Interface_PropertyW,
    CM_LOCATE_DEVNODE_NORMAL, CM_Locate_DevNodeW, CR_BUFFER_SMALL, CR_SUCCESS,
};
use windows::Win32::Devices::Properties::{
    DEVPKEY_Device_DeviceDesc, DEVPKEY_Device_FriendlyName, DEVPKEY_Device_InstanceId,
    DEVPROPTYPE,
};
use windows::Win32::Foundation::{CloseHandle, DEVPROPKEY, HANDLE, INVALID_HANDLE_VALUE};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_FLAGS_AND_ATTRIBUTES, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows::Win32::System::IO::DeviceIoControl;
use windows::core::{GUID, PCWSTR};

const FILE_READ_DATA: u32 = 0x0001;
const FILE_READ_ATTRIBUTES: u32 = 0x0080;
const SYNCHRONIZE: u32 = 0x0010_0000;

/// FILE_READ_ATTRIBUTES | SYNCHRONIZE
pub const QUERY_ACCESS: u32 = FILE_READ_ATTRIBUTES | SYNCHRONIZE;
/// Enough for ioctls defined with FILE_READ_ACCESS
pub const READ_ACCESS: u32 = FILE_READ_DATA | FILE_READ_ATTRIBUTES | SYNCHRONIZE;
/// FILE_GENERIC_READ
pub const GENERIC_READ_ACCESS: u32 = 0x0012_0089;

/// NUL-terminated UTF-16 copy of `s`
pub fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// UTF-16 up to the first NUL
pub fn from_wide(buf: &[u16]) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}

/// `{XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX}`
pub fn guid_string(guid: &GUID) -> String {
    format!("{{{:?}}}", guid)
}

/// Owned device handle, closed on drop
pub struct DeviceHandle(HANDLE);

impl DeviceHandle {
    pub fn open(path: &str, access: u32) -> io::Result<Self> {
        let wide = to_wide(path);
        let handle = unsafe {
            CreateFileW(
                PCWSTR(wide.as_ptr()),
                access,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                None,
                OPEN_EXISTING,
                FILE_FLAGS_AND_ATTRIBUTES(0),
                None,
            )
        }
        .map_err(io::Error::from)?;

        if handle == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }
        Ok(Self(handle))
    }

    /// Issue a buffered ioctl, returning the number of bytes written to `output`
    pub fn ioctl(&self, code: u32, input: Option<&[u8]>, output: &mut [u8]) -> io::Result<usize> {
        let mut returned: u32 = 0;
        unsafe {
            DeviceIoControl(
                self.0,
                code,
                input.map(|i| i.as_ptr() as *const c_void),
                input.map_or(0, |i| i.len() as u32),
                Some(output.as_mut_ptr() as *mut c_void),
                output.len() as u32,
                Some(&mut returned),
                None,
            )
        }
        .map_err(io::Error::from)?;
        Ok(returned as usize)
    }

    /// Ioctl whose output is a single plain-old-data struct
    pub fn ioctl_struct<T: Copy>(&self, code: u32, input: Option<&[u8]>) -> io::Result<T> {
        let mut output = vec![0u8; size_of::<T>()];
        let returned = self.ioctl(code, input, &mut output)?;
        if returned < size_of::<T>() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("ioctl {code:#x} returned {returned} bytes"),
            ));
        }
        Ok(unsafe { std::ptr::read_unaligned(output.as_ptr() as *const T) })
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

pub fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    buf.get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_ne_bytes)
}

pub fn read_u64(buf: &[u8], offset: usize) -> Option<u64> {
    buf.get(offset..offset + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_ne_bytes)
}

/// Paths of all present device interfaces of a class
pub fn device_interfaces(class: &GUID) -> Vec<String> {
    loop {
        let mut len: u32 = 0;
        let cr = unsafe {
            CM_Get_Device_Interface_List_SizeW(
                &mut len,
                class,
                PCWSTR::null(),
                CM_GET_DEVICE_INTERFACE_LIST_PRESENT,
            )
        };
        if cr != CR_SUCCESS || len <= 1 {
            return Vec::new();
        }

        let mut buffer = vec![0u16; len as usize];
        let cr = unsafe {
            CM_Get_Device_Interface_ListW(
                class,
                PCWSTR::null(),
                &mut buffer,
                CM_GET_DEVICE_INTERFACE_LIST_PRESENT,
            )
        };
        // An interface arrived between the two calls
        if cr == CR_BUFFER_SMALL {
            continue;
        }
        if cr != CR_SUCCESS {
            return Vec::new();
        }

        return buffer
            .split(|&c| c == 0)
            .filter(|s| !s.is_empty())
            .map(String::from_utf16_lossy)
            .collect();
    }
}

fn property_string(
    mut query: impl FnMut(&mut DEVPROPTYPE, Option<*mut u8>, &mut u32) -> bool,
) -> Option<String> {
    let mut kind = DEVPROPTYPE::default();
    let mut size: u32 = 0;
    query(&mut kind, None, &mut size);
    if size == 0 {
        return None;
    }

    let mut buffer = vec![0u16; (size as usize).div_ceil(2)];
    if !query(&mut kind, Some(buffer.as_mut_ptr() as *mut u8), &mut size) {
        return None;
    }
    let value = from_wide(&buffer);
    (!value.is_empty()).then_some(value)
}

fn interface_instance_id(interface: &str) -> Option<String> {
    let wide = to_wide(interface);
    property_string(|kind, buffer, size| unsafe {
        CM_Get_Device_Interface_PropertyW(
            PCWSTR(wide.as_ptr()),
            &DEVPKEY_Device_InstanceId,
            kind,
            buffer,
            size,
            0,
        ) == CR_SUCCESS
    })
}

fn devnode_string(devinst: u32, key: &DEVPROPKEY) -> Option<String> {
    property_string(|kind, buffer, size| unsafe {
        CM_Get_DevNode_PropertyW(devinst, key, kind, buffer, size, 0) == CR_SUCCESS
    })
}

/// Friendly name (or device description) of the device behind an interface
pub fn device_description(interface: &str) -> Option<String> {
    let instance_id = interface_instance_id(interface)?;
    let wide = to_wide(&instance_id);
    let mut devinst: u32 = 0;
    let cr = unsafe {
        CM_Locate_DevNodeW(&mut devinst, PCWSTR(wide.as_ptr()), CM_LOCATE_DEVNODE_NORMAL)
    };
    if cr != CR_SUCCESS {
        return None;
    }

    devnode_string(devinst, &DEVPKEY_Device_FriendlyName)
        .or_else(|| devnode_string(devinst, &DEVPKEY_Device_DeviceDesc))
}

/// Resolve descriptions for many interfaces at once. Each lookup costs
/// several configuration-manager round trips, so they run in parallel.
pub fn describe_interfaces(paths: Vec<String>) -> Vec<(String, Option<String>)> {
    paths
        .into_par_iter()
        .map(|path| {
            let description = device_description(&path);
            (path, description)
        })
        .collect()
}

/// Access bits an ioctl code demands of the handle (CTL_CODE `Access` field)
#[cfg(test)]
pub fn required_access(code: u32) -> u32 {
    match (code >> 14) & 0x3 {
        0 => 0,                             // FILE_ANY_ACCESS
        1 => FILE_READ_DATA,                // FILE_READ_ACCESS
        2 => 0x0002,                        // FILE_WRITE_ACCESS
        _ => FILE_READ_DATA | 0x0002,
    }
}
