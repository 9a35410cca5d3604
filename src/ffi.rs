//! FFI bindings for Pulse Analytics
//!
//! This module provides C-compatible functions for embedding the engine in a host
//! (browser shell, webview, native app). All inputs and outputs are JSON carried
//! in null-terminated C strings. Returned strings are allocated here and must be
//! freed by the caller using `pulse_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use serde::Serialize;

use crate::config::AnalyticsConfig;
use crate::pipeline::AnalyticsEngine;
use crate::sink::{ChannelSink, Emission};
use crate::types::{EventInput, RecordOutcome, ReportPeriod, SessionDescriptor};

/// Status codes returned by `pulse_engine_record`
pub const PULSE_RECORDED: i32 = 0;
pub const PULSE_UNKNOWN_SESSION: i32 = 1;
pub const PULSE_REJECTED: i32 = 2;
pub const PULSE_ERROR: i32 = -1;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the last error message
fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Serialize a value to a newly allocated JSON C string, recording failures
fn json_to_cstr<T: Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Opaque handle for the engine
pub struct PulseEngineHandle {
    engine: AnalyticsEngine,
    emissions: Receiver<Emission>,
}

/// Resolve a handle pointer, recording an error when it is null
unsafe fn handle_mut<'a>(handle: *mut PulseEngineHandle) -> Option<&'a mut PulseEngineHandle> {
    if handle.is_null() {
        set_last_error("Null engine pointer");
        return None;
    }
    Some(&mut *handle)
}

/// Create a new engine.
///
/// # Safety
/// - `config_json` may be NULL (site default catalog) or a valid null-terminated
///   C string holding an `AnalyticsConfig`.
/// - Returns NULL on error; call `pulse_last_error` to get the error message.
/// - The returned handle must be freed with `pulse_engine_free`.
#[no_mangle]
pub unsafe extern "C" fn pulse_engine_new(config_json: *const c_char) -> *mut PulseEngineHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        AnalyticsConfig::site_defaults()
    } else {
        let Some(json) = cstr_to_string(config_json) else {
            set_last_error("Invalid config string pointer");
            return ptr::null_mut();
        };
        match AnalyticsConfig::from_json(&json) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    let (sink, emissions) = ChannelSink::new();
    let handle = Box::new(PulseEngineHandle {
        engine: AnalyticsEngine::new(config, Arc::new(sink)),
        emissions,
    });
    Box::into_raw(handle)
}

/// Free an engine.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `pulse_engine_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn pulse_engine_free(handle: *mut PulseEngineHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Start a session and return its identifier.
///
/// # Safety
/// - `handle` must be a valid engine pointer.
/// - `descriptor_json` must be a valid null-terminated C string holding a
///   `SessionDescriptor`.
/// - Returns a newly allocated string that must be freed with `pulse_free_string`,
///   or NULL on error.
#[no_mangle]
pub unsafe extern "C" fn pulse_engine_start_session(
    handle: *mut PulseEngineHandle,
    descriptor_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some(handle) = handle_mut(handle) else {
        return ptr::null_mut();
    };
    let Some(json) = cstr_to_string(descriptor_json) else {
        set_last_error("Invalid descriptor string pointer");
        return ptr::null_mut();
    };

    match serde_json::from_str::<SessionDescriptor>(&json) {
        Ok(descriptor) => string_to_cstr(&handle.engine.start_session(descriptor)),
        Err(e) => {
            set_last_error(&format!("Invalid session descriptor: {}", e));
            ptr::null_mut()
        }
    }
}

/// End a session.
///
/// Returns 1 if the session was found, 0 if it was unknown, -1 on error.
///
/// # Safety
/// - `handle` must be a valid engine pointer.
/// - `session_id` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn pulse_engine_end_session(
    handle: *mut PulseEngineHandle,
    session_id: *const c_char,
) -> i32 {
    clear_last_error();

    let Some(handle) = handle_mut(handle) else {
        return PULSE_ERROR;
    };
    let Some(id) = cstr_to_string(session_id) else {
        set_last_error("Invalid session id string pointer");
        return PULSE_ERROR;
    };

    i32::from(handle.engine.end_session(&id))
}

/// Record an event for a session.
///
/// Returns `PULSE_RECORDED`, `PULSE_UNKNOWN_SESSION`, `PULSE_REJECTED`
/// (the rejection reason is available from `pulse_last_error`) or `PULSE_ERROR`.
///
/// # Safety
/// - `handle` must be a valid engine pointer.
/// - `session_id` and `event_json` must be valid null-terminated C strings.
#[no_mangle]
pub unsafe extern "C" fn pulse_engine_record(
    handle: *mut PulseEngineHandle,
    session_id: *const c_char,
    event_json: *const c_char,
) -> i32 {
    clear_last_error();

    let Some(handle) = handle_mut(handle) else {
        return PULSE_ERROR;
    };
    let Some(id) = cstr_to_string(session_id) else {
        set_last_error("Invalid session id string pointer");
        return PULSE_ERROR;
    };
    let Some(json) = cstr_to_string(event_json) else {
        set_last_error("Invalid event string pointer");
        return PULSE_ERROR;
    };

    let input: EventInput = match serde_json::from_str(&json) {
        Ok(input) => input,
        Err(e) => {
            set_last_error(&format!("Invalid event: {}", e));
            return PULSE_ERROR;
        }
    };

    match handle.engine.record(&id, input) {
        RecordOutcome::Recorded => PULSE_RECORDED,
        RecordOutcome::UnknownSession => PULSE_UNKNOWN_SESSION,
        RecordOutcome::Rejected { rejection } => {
            set_last_error(&rejection.to_string());
            PULSE_REJECTED
        }
    }
}

/// Run a read-only query for `url` and return its JSON result
unsafe fn query_url<T: Serialize>(
    handle: *mut PulseEngineHandle,
    url: *const c_char,
    query: impl FnOnce(&AnalyticsEngine, &str) -> T,
) -> *mut c_char {
    clear_last_error();

    let Some(handle) = handle_mut(handle) else {
        return ptr::null_mut();
    };
    let Some(url) = cstr_to_string(url) else {
        set_last_error("Invalid url string pointer");
        return ptr::null_mut();
    };

    json_to_cstr(&query(&handle.engine, &url))
}

/// Behavior report for a URL over all stored sessions, as JSON.
///
/// # Safety
/// - `handle` must be a valid engine pointer.
/// - `url` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `pulse_free_string`.
#[no_mangle]
pub unsafe extern "C" fn pulse_engine_report(
    handle: *mut PulseEngineHandle,
    url: *const c_char,
) -> *mut c_char {
    query_url(handle, url, |engine, url| {
        engine.generate_report(url, ReportPeriod::all_time())
    })
}

/// Heatmap points for a URL, as a JSON array.
///
/// # Safety
/// Same contract as `pulse_engine_report`.
#[no_mangle]
pub unsafe extern "C" fn pulse_engine_heatmap(
    handle: *mut PulseEngineHandle,
    url: *const c_char,
) -> *mut c_char {
    query_url(handle, url, |engine, url| engine.heatmap(url))
}

/// Scroll depth aggregate for a URL, as JSON.
///
/// # Safety
/// Same contract as `pulse_engine_report`.
#[no_mangle]
pub unsafe extern "C" fn pulse_engine_scroll_depth(
    handle: *mut PulseEngineHandle,
    url: *const c_char,
) -> *mut c_char {
    query_url(handle, url, |engine, url| engine.scroll_depth(url))
}

/// Click map for a URL, as a JSON array.
///
/// # Safety
/// Same contract as `pulse_engine_report`.
#[no_mangle]
pub unsafe extern "C" fn pulse_engine_click_map(
    handle: *mut PulseEngineHandle,
    url: *const c_char,
) -> *mut c_char {
    query_url(handle, url, |engine, url| engine.click_map(url))
}

/// Remove sessions older than `retention_days`. Returns the number removed, or -1.
///
/// # Safety
/// - `handle` must be a valid engine pointer.
#[no_mangle]
pub unsafe extern "C" fn pulse_engine_cleanup(handle: *mut PulseEngineHandle, retention_days: u32) -> i64 {
    clear_last_error();

    let Some(handle) = handle_mut(handle) else {
        return -1;
    };
    let removed = handle.engine.cleanup_older_than(retention_days);
    i64::try_from(removed).unwrap_or(i64::MAX)
}

/// Drain sink emissions (conversions, funnel completions) queued since the last
/// call, as a JSON array.
///
/// # Safety
/// - `handle` must be a valid engine pointer.
/// - Returns a newly allocated string that must be freed with `pulse_free_string`.
#[no_mangle]
pub unsafe extern "C" fn pulse_engine_drain_emissions(handle: *mut PulseEngineHandle) -> *mut c_char {
    clear_last_error();

    let Some(handle) = handle_mut(handle) else {
        return ptr::null_mut();
    };
    let drained: Vec<Emission> = handle.emissions.try_iter().collect();
    json_to_cstr(&drained)
}

/// Free a string returned by Pulse functions.
///
/// # Safety
/// - `ptr` must be a pointer returned by a Pulse function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn pulse_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local string that is valid until the next Pulse call.
/// - Returns NULL if there was no error.
/// - Do NOT free this pointer.
#[no_mangle]
pub unsafe extern "C" fn pulse_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match e.borrow().as_ref() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the Pulse library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free this pointer.
#[no_mangle]
pub unsafe extern "C" fn pulse_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
