use crate::Core::{LinkError, LoopbackEngine};
use crate::Link::{Receiver, Sender};
use std::ffi::{c_char, CStr};
use std::ptr;
use std::time::Duration;
use tracing::error;

// Error codes
const CREDIT_LINK_SUCCESS: i32 = 0;
const CREDIT_LINK_ERROR_NULL_POINTER: i32 = -1;
const CREDIT_LINK_ERROR_INVALID_ARG: i32 = -2;
const CREDIT_LINK_ERROR_CLOSED: i32 = -3;
const CREDIT_LINK_ERROR_FATAL: i32 = -4;
const CREDIT_LINK_ERROR_EMPTY: i32 = -5;
const CREDIT_LINK_ERROR_INTERNAL: i32 = -6;

/// Handle to an engine instance (opaque pointer)
pub struct EngineHandle {
    inner: LoopbackEngine,
}

/// Handle to a sender instance (opaque pointer)
pub struct SenderHandle {
    inner: Sender,
}

/// Handle to a receiver instance (opaque pointer)
pub struct ReceiverHandle {
    inner: Receiver,
}

fn status(err: &LinkError) -> i32 {
    match err {
        LinkError::Closed | LinkError::EngineShutdown => CREDIT_LINK_ERROR_CLOSED,
        LinkError::Fatal(_) => CREDIT_LINK_ERROR_FATAL,
        LinkError::InvalidArgument(_) => CREDIT_LINK_ERROR_INVALID_ARG,
        LinkError::Io(_) => CREDIT_LINK_ERROR_INTERNAL,
    }
}

/// Borrow a C string argument, or None if it is null or not UTF-8.
///
/// # Safety
/// `s` must be null or point to a NUL-terminated string.
unsafe fn c_str<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    CStr::from_ptr(s).to_str().ok()
}

// -----------------------------------------------------------------------------
// Engine API
// -----------------------------------------------------------------------------

/// Start an in-process loopback engine.
///
/// # Returns
/// * Pointer to `EngineHandle`, or NULL on failure.
#[no_mangle]
pub extern "C" fn credit_link_engine_new() -> *mut EngineHandle {
    match LoopbackEngine::new() {
        Ok(engine) => Box::into_raw(Box::new(EngineHandle { inner: engine })),
        Err(e) => {
            error!("FFI: failed to start engine: {}", e);
            ptr::null_mut()
        }
    }
}

/// Stop the engine and free its handle. Links still open are closed.
#[no_mangle]
pub extern "C" fn credit_link_engine_free(handle: *mut EngineHandle) {
    if !handle.is_null() {
        unsafe {
            let engine = Box::from_raw(handle);
            engine.inner.shutdown();
        }
    }
}

// -----------------------------------------------------------------------------
// Sender API
// -----------------------------------------------------------------------------

/// Open a sender.
///
/// # Arguments
/// * `engine` - Pointer to `EngineHandle`.
/// * `url` - Connection URL (NUL-terminated).
/// * `address` - Target address (NUL-terminated).
///
/// # Returns
/// * Pointer to `SenderHandle`, or NULL on failure.
#[no_mangle]
pub extern "C" fn credit_link_sender_open(
    engine: *const EngineHandle,
    url: *const c_char,
    address: *const c_char,
) -> *mut SenderHandle {
    if engine.is_null() {
        return ptr::null_mut();
    }
    let (Some(url), Some(address)) = (unsafe { c_str(url) }, unsafe { c_str(address) }) else {
        return ptr::null_mut();
    };

    let engine = unsafe { &(*engine).inner };
    match Sender::open(engine, url, address) {
        Ok(sender) => Box::into_raw(Box::new(SenderHandle { inner: sender })),
        Err(e) => {
            error!("FFI: failed to open sender: {}", e);
            ptr::null_mut()
        }
    }
}

/// Send a message, blocking while the link has no credit.
///
/// # Returns
/// * 0 on success, negative error code otherwise.
#[no_mangle]
pub extern "C" fn credit_link_sender_send(
    handle: *mut SenderHandle,
    data: *const u8,
    len: usize,
) -> i32 {
    if handle.is_null() || (data.is_null() && len > 0) {
        return CREDIT_LINK_ERROR_NULL_POINTER;
    }

    let sender = unsafe { &(*handle).inner };
    let body = if len == 0 {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(data, len) }.to_vec()
    };

    match sender.send(body) {
        Ok(()) => CREDIT_LINK_SUCCESS,
        Err(e) => status(&e),
    }
}

/// Close a sender's link. Blocks until the link is open.
#[no_mangle]
pub extern "C" fn credit_link_sender_close(handle: *mut SenderHandle) -> i32 {
    if handle.is_null() {
        return CREDIT_LINK_ERROR_NULL_POINTER;
    }
    match unsafe { &(*handle).inner }.close() {
        Ok(()) => CREDIT_LINK_SUCCESS,
        Err(e) => status(&e),
    }
}

/// Free a sender handle.
#[no_mangle]
pub extern "C" fn credit_link_sender_free(handle: *mut SenderHandle) {
    if !handle.is_null() {
        unsafe {
            let _ = Box::from_raw(handle); // Dropped automatically
        }
    }
}

// -----------------------------------------------------------------------------
// Receiver API
// -----------------------------------------------------------------------------

/// Open a receiver with the default buffer capacity.
///
/// # Returns
/// * Pointer to `ReceiverHandle`, or NULL on failure.
#[no_mangle]
pub extern "C" fn credit_link_receiver_open(
    engine: *const EngineHandle,
    url: *const c_char,
    address: *const c_char,
) -> *mut ReceiverHandle {
    if engine.is_null() {
        return ptr::null_mut();
    }
    let (Some(url), Some(address)) = (unsafe { c_str(url) }, unsafe { c_str(address) }) else {
        return ptr::null_mut();
    };

    let engine = unsafe { &(*engine).inner };
    match Receiver::open(engine, url, address) {
        Ok(receiver) => Box::into_raw(Box::new(ReceiverHandle { inner: receiver })),
        Err(e) => {
            error!("FFI: failed to open receiver: {}", e);
            ptr::null_mut()
        }
    }
}

/// Receive a message.
///
/// # Arguments
/// * `handle` - Pointer to `ReceiverHandle`.
/// * `timeout_ms` - 0 waits indefinitely, otherwise the longest wait in milliseconds.
/// * `out_buf` - Buffer to write the message body into.
/// * `out_len` - Input: size of buf, Output: size of message received.
///
/// # Returns
/// * 0 on success.
/// * CREDIT_LINK_ERROR_EMPTY if the timeout elapsed.
/// * CREDIT_LINK_ERROR_INVALID_ARG if buffer too small; the message is dropped
///   and `out_len` holds its size.
#[no_mangle]
pub extern "C" fn credit_link_receiver_receive(
    handle: *mut ReceiverHandle,
    timeout_ms: u64,
    out_buf: *mut u8,
    out_len: *mut usize,
) -> i32 {
    if handle.is_null() || out_len.is_null() {
        return CREDIT_LINK_ERROR_NULL_POINTER;
    }

    let receiver = unsafe { &(*handle).inner };
    let max_len = unsafe { *out_len };

    let message = match receiver.receive(Some(Duration::from_millis(timeout_ms))) {
        Ok(Some(message)) => message,
        Ok(None) => return CREDIT_LINK_ERROR_EMPTY,
        Err(e) => return status(&e),
    };

    let body = message.body;
    unsafe { *out_len = body.len() };
    if body.len() > max_len {
        return CREDIT_LINK_ERROR_INVALID_ARG; // Buffer too small
    }
    if !body.is_empty() {
        if out_buf.is_null() {
            return CREDIT_LINK_ERROR_NULL_POINTER;
        }
        unsafe { ptr::copy_nonoverlapping(body.as_ptr(), out_buf, body.len()) };
    }
    CREDIT_LINK_SUCCESS
}

/// Close a receiver's link. Does nothing if it is not open yet.
#[no_mangle]
pub extern "C" fn credit_link_receiver_close(handle: *mut ReceiverHandle) -> i32 {
    if handle.is_null() {
        return CREDIT_LINK_ERROR_NULL_POINTER;
    }
    match unsafe { &(*handle).inner }.close() {
        Ok(()) => CREDIT_LINK_SUCCESS,
        Err(e) => status(&e),
    }
}

/// Free a receiver handle.
#[no_mangle]
pub extern "C" fn credit_link_receiver_free(handle: *mut ReceiverHandle) {
    if !handle.is_null() {
        unsafe {
            let _ = Box::from_raw(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn send_and_receive_through_c_api() {
        let engine = credit_link_engine_new();
        assert!(!engine.is_null());

        let url = CString::new("amqp://localhost").unwrap();
        let address = CString::new("ffi").unwrap();
        let receiver = credit_link_receiver_open(engine, url.as_ptr(), address.as_ptr());
        let sender = credit_link_sender_open(engine, url.as_ptr(), address.as_ptr());
        assert!(!receiver.is_null());
        assert!(!sender.is_null());

        let payload = b"hello";
        assert_eq!(
            credit_link_sender_send(sender, payload.as_ptr(), payload.len()),
            CREDIT_LINK_SUCCESS
        );

        let mut buf = [0u8; 2];
        let mut len = buf.len();
        assert_eq!(
            credit_link_receiver_receive(receiver, 5_000, buf.as_mut_ptr(), &mut len),
            CREDIT_LINK_ERROR_INVALID_ARG
        );
        assert_eq!(len, payload.len());

        assert_eq!(
            credit_link_sender_send(sender, payload.as_ptr(), payload.len()),
            CREDIT_LINK_SUCCESS
        );
        let mut roomy = [0u8; 16];
        let mut len = roomy.len();
        assert_eq!(
            credit_link_receiver_receive(receiver, 5_000, roomy.as_mut_ptr(), &mut len),
            CREDIT_LINK_SUCCESS
        );
        assert_eq!(&roomy[..len], payload);

        let mut len = buf.len();
        assert_eq!(
            credit_link_receiver_receive(receiver, 50, buf.as_mut_ptr(), &mut len),
            CREDIT_LINK_ERROR_EMPTY
        );

        assert_eq!(credit_link_sender_close(sender), CREDIT_LINK_SUCCESS);
        assert_eq!(credit_link_receiver_close(receiver), CREDIT_LINK_SUCCESS);
        credit_link_sender_free(sender);
        credit_link_receiver_free(receiver);
        credit_link_engine_free(engine);
    }

    #[test]
    fn rejects_null_arguments() {
        assert!(credit_link_sender_open(ptr::null(), ptr::null(), ptr::null()).is_null());
        assert_eq!(
            credit_link_sender_send(ptr::null_mut(), ptr::null(), 0),
            CREDIT_LINK_ERROR_NULL_POINTER
        );
        let mut len = 0usize;
        assert_eq!(
            credit_link_receiver_receive(ptr::null_mut(), 0, ptr::null_mut(), &mut len),
            CREDIT_LINK_ERROR_NULL_POINTER
        );
    }
}
