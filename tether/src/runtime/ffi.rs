//! C ABI entry point for the engine's global message callback.

use std::ffi::{c_char, c_void, CStr};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::log_error;
use crate::runtime::dispatch::DispatchShared;

/// Signature the engine expects for its message callback.
pub type NativeCallback = unsafe extern "C" fn(*const c_char, *const c_char, *mut c_void);

/// Trampoline to register with the engine, paired with
/// [`Dispatcher::user_arg`](crate::runtime::dispatch::Dispatcher::user_arg).
///
/// Null `msg` or `arg` is ignored; a null `details` is treated as an empty
/// detail. Panics are caught here and never unwind into the engine.
///
/// # Safety
/// `arg` must come from `Dispatcher::user_arg` on a dispatcher that is still
/// alive. `msg` and `details`, when non-null, must point to NUL-terminated
/// strings valid for the duration of the call.
pub unsafe extern "C" fn native_callback(
    msg: *const c_char,
    details: *const c_char,
    arg: *mut c_void,
) {
    if msg.is_null() || arg.is_null() {
        return;
    }
    let tag = CStr::from_ptr(msg).to_string_lossy();
    let detail = if details.is_null() {
        "".into()
    } else {
        CStr::from_ptr(details).to_string_lossy()
    };

    let shared_ptr = arg as *const DispatchShared;
    Arc::increment_strong_count(shared_ptr);
    let shared = Arc::from_raw(shared_ptr);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| shared.on_message(&tag, &detail)));
    if outcome.is_err() {
        log_error!("panic while accepting a native message", tag = %tag);
    }
}

/// Keeps the trampoline's type checked against [`NativeCallback`].
pub const NATIVE_CALLBACK: NativeCallback = native_callback;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::action::ActionTracker;
    use crate::runtime::config::RuntimeConfig;
    use crate::runtime::dispatch::Dispatcher;
    use crate::runtime::event_loop::EventLoop;
    use crate::runtime::message::MessageCatalog;
    use std::ffi::CString;
    use std::ptr;
    use tether_api::status::{OperationId, Status};

    #[test]
    fn trampoline_settles_through_the_dispatcher() {
        let event_loop = EventLoop::with_config(RuntimeConfig::default().with_pool_size(1)).unwrap();
        let tracker = ActionTracker::new("tasker", event_loop.handle());
        let dispatcher = Dispatcher::new(event_loop.handle(), MessageCatalog::default(), tracker.clone());
        let action = tracker.put_action(OperationId::new(17)).unwrap();

        let tag = CString::new("Tasker.Task.Succeeded").unwrap();
        let detail = CString::new(r#"{"task_id": 17}"#).unwrap();
        unsafe { NATIVE_CALLBACK(tag.as_ptr(), detail.as_ptr(), dispatcher.user_arg()) };

        assert_eq!(action.wait().sync_wait(), Status::Succeeded);
    }

    #[test]
    fn null_pointers_are_ignored() {
        let event_loop = EventLoop::with_config(RuntimeConfig::default().with_pool_size(1)).unwrap();
        let tracker = ActionTracker::new("tasker", event_loop.handle());
        let dispatcher = Dispatcher::new(event_loop.handle(), MessageCatalog::default(), tracker);
        let tag = CString::new("Tasker.Task.Succeeded").unwrap();

        unsafe {
            native_callback(ptr::null(), ptr::null(), dispatcher.user_arg());
            native_callback(tag.as_ptr(), ptr::null(), ptr::null_mut());
            native_callback(tag.as_ptr(), ptr::null(), dispatcher.user_arg());
        }
        event_loop.wait_all();

        let stats = dispatcher.stats();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.malformed, 1);
    }
}
