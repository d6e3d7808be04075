//! Vendor `mcbcio32` library backend (Windows only).
use std::ffi::{CStr, CString, c_char, c_int};

use mcb_traits::{DetectorHandle, Transport, TransportResult};
use tracing::{debug, warn};

use crate::error::HwError;

const RESPONSE_MAX: usize = 128;
const NAME_MAX: usize = 128;
// MIOGetData reports returned channels in a 16-bit field.
const DATA_CHUNK: usize = 16_384;
const COMM_RETRIES: u32 = 3;

#[link(name = "mcbcio32")]
unsafe extern "system" {
    fn MIOStartup() -> c_int;
    fn MIOCleanup() -> c_int;
    fn MIOGetDetLength(hdet: c_int) -> c_int;
    fn MIOGetLastError(macro_err: *mut c_int, micro_err: *mut c_int) -> c_int;
    fn MIOOpenDetector(ndet: c_int, app: *const c_char, pass: *const c_char) -> c_int;
    fn MIOCloseDetector(hdet: c_int) -> c_int;
    fn MIOComm(
        hdet: c_int,
        cmd: *const c_char,
        pre: *const c_char,
        post: *const c_char,
        resp_max: c_int,
        resp: *mut c_char,
        resp_len: *mut c_int,
    ) -> c_int;
    fn MIOGetConfigMax(app: *const c_char, det_max: *mut c_int) -> c_int;
    fn MIOGetConfigName(
        ndet: c_int,
        app: *const c_char,
        name_max: c_int,
        name: *mut c_char,
        id: *mut c_int,
        flags: *mut c_int,
    ) -> c_int;
    fn MIOGetData(
        hdet: c_int,
        start: c_int,
        count: c_int,
        buffer: *mut u32,
        ret_chans: *mut i16,
        data_mask: *mut u32,
        roi_mask: *mut u32,
        pass: *const c_char,
    ) -> c_int;
    fn MIOGetStartTime(hdet: c_int, time: *mut i32) -> c_int;
    fn MIOIsActive(hdet: c_int) -> c_int;
}

fn last_error(call: &'static str) -> HwError {
    let mut macro_err: c_int = 0;
    let mut micro_err: c_int = 0;
    // SAFETY: both out-pointers reference live stack integers.
    let code = unsafe { MIOGetLastError(&mut macro_err, &mut micro_err) };
    debug!(call, code, macro_err, micro_err, "driver last error");
    HwError::driver(call, code)
}

/// Transport over the vendor connection library.
///
/// Startup happens in [`McbcioTransport::startup`]; cleanup on drop.
pub struct McbcioTransport {
    _priv: (),
}

impl McbcioTransport {
    pub fn startup() -> Result<Self, HwError> {
        // SAFETY: no arguments; the library tracks its own state.
        if unsafe { MIOStartup() } != 1 {
            return Err(last_error("MIOStartup"));
        }
        Ok(Self { _priv: () })
    }

    fn comm_once(&mut self, handle: DetectorHandle, command: &CString) -> Result<String, HwError> {
        let empty = c"";
        let mut buf = [0 as c_char; RESPONSE_MAX];
        let mut len: c_int = 0;
        // SAFETY: buf outlives the call and its capacity is passed as resp_max.
        let ok = unsafe {
            MIOComm(
                handle.raw(),
                command.as_ptr(),
                empty.as_ptr(),
                empty.as_ptr(),
                RESPONSE_MAX as c_int,
                buf.as_mut_ptr(),
                &mut len,
            )
        };
        if ok != 1 {
            return Err(last_error("MIOComm"));
        }
        // SAFETY: the driver NUL-terminates within resp_max.
        let resp = unsafe { CStr::from_ptr(buf.as_ptr()) };
        Ok(resp.to_string_lossy().into_owned())
    }
}

impl Drop for McbcioTransport {
    fn drop(&mut self) {
        // SAFETY: paired with the successful MIOStartup in `startup`.
        if unsafe { MIOCleanup() } != 1 {
            warn!("MIOCleanup failed");
        }
    }
}

impl Transport for McbcioTransport {
    fn detector_count(&mut self) -> TransportResult<u32> {
        let mut max: c_int = 0;
        // SAFETY: out-pointer references a live stack integer.
        if unsafe { MIOGetConfigMax(c"".as_ptr(), &mut max) } != 1 {
            return Err(Box::new(last_error("MIOGetConfigMax")));
        }
        Ok(max.max(0) as u32)
    }

    fn detector_name(&mut self, index: u32) -> TransportResult<(String, u32)> {
        let mut name = [0 as c_char; NAME_MAX];
        let mut id: c_int = 0;
        // SAFETY: name buffer capacity is passed as name_max; flags may be null.
        let ok = unsafe {
            MIOGetConfigName(
                index as c_int,
                c"".as_ptr(),
                NAME_MAX as c_int,
                name.as_mut_ptr(),
                &mut id,
                std::ptr::null_mut(),
            )
        };
        if ok != 1 {
            return Err(Box::new(last_error("MIOGetConfigName")));
        }
        // SAFETY: the driver NUL-terminates within name_max.
        let name = unsafe { CStr::from_ptr(name.as_ptr()) };
        Ok((name.to_string_lossy().into_owned(), id.max(0) as u32))
    }

    fn open(&mut self, index: u32) -> TransportResult<DetectorHandle> {
        // SAFETY: empty application and password strings are static.
        let hdet = unsafe { MIOOpenDetector(index as c_int, c"".as_ptr(), c"".as_ptr()) };
        if hdet <= 0 {
            return Err(Box::new(last_error("MIOOpenDetector")));
        }
        Ok(DetectorHandle::new(hdet))
    }

    fn close(&mut self, handle: DetectorHandle) -> TransportResult<()> {
        // SAFETY: plain integer argument.
        if unsafe { MIOCloseDetector(handle.raw()) } != 1 {
            return Err(Box::new(last_error("MIOCloseDetector")));
        }
        Ok(())
    }

    fn is_active(&mut self, handle: DetectorHandle) -> TransportResult<bool> {
        // SAFETY: plain integer argument.
        Ok(unsafe { MIOIsActive(handle.raw()) } == 1)
    }

    fn comm(&mut self, handle: DetectorHandle, command: &str) -> TransportResult<String> {
        let command = CString::new(command).map_err(|e| HwError::Io(std::io::Error::other(e)))?;
        let mut attempts = 0;
        loop {
            match self.comm_once(handle, &command) {
                Ok(resp) => return Ok(resp),
                Err(HwError::Timeout) if attempts < COMM_RETRIES => {
                    attempts += 1;
                    warn!(retries = attempts, handle = %handle, "MCB comm timeout, retrying");
                }
                Err(e) => return Err(Box::new(e)),
            }
        }
    }

    fn read_counts(
        &mut self,
        handle: DetectorHandle,
        start: usize,
        count: usize,
    ) -> TransportResult<(Vec<u32>, Vec<bool>)> {
        let mut counts = Vec::with_capacity(count);
        let mut roi = Vec::with_capacity(count);
        let mut offset = start;
        let end = start.saturating_add(count);
        while offset < end {
            let chunk = (end - offset).min(DATA_CHUNK);
            let mut buf = vec![0u32; chunk];
            let mut ret: i16 = 0;
            let mut data_mask: u32 = 0;
            let mut roi_mask: u32 = 0;
            // SAFETY: buf holds `chunk` entries and chunk is passed as the count.
            let ok = unsafe {
                MIOGetData(
                    handle.raw(),
                    offset as c_int,
                    chunk as c_int,
                    buf.as_mut_ptr(),
                    &mut ret,
                    &mut data_mask,
                    &mut roi_mask,
                    c"".as_ptr(),
                )
            };
            if ok <= 0 {
                return Err(Box::new(last_error("MIOGetData")));
            }
            counts.extend(buf.iter().map(|w| w & data_mask));
            roi.extend(buf.iter().map(|w| w & roi_mask != 0));
            offset += chunk;
        }
        Ok((counts, roi))
    }

    fn channel_count(&mut self, handle: DetectorHandle) -> TransportResult<usize> {
        // SAFETY: plain integer argument.
        let len = unsafe { MIOGetDetLength(handle.raw()) };
        if len <= 0 {
            return Err(Box::new(last_error("MIOGetDetLength")));
        }
        Ok(len as usize)
    }

    fn start_timestamp(&mut self, handle: DetectorHandle) -> TransportResult<i64> {
        let mut t: i32 = 0;
        // SAFETY: out-pointer references a live stack integer.
        let ret = unsafe { MIOGetStartTime(handle.raw(), &mut t) };
        Ok(i64::from(if t != 0 { t } else { ret }))
    }
}
