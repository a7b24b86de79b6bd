use std::os::raw::{c_char, c_int};

use crate::{
    boundary::{catch_termination, set_unguarded_policy, UnguardedPolicy},
    entry::MainArgv,
    termination::set_capture_backtrace,
};

/// `noexit_run_main` result: the entry point returned, `*status` is its value
pub const NOEXIT_RETURNED: c_int = 0;
/// `noexit_run_main` result: the entry point tried to exit, `*status` is the
/// code it passed
pub const NOEXIT_TERMINATED: c_int = 1;
/// `noexit_run_main` result: `entry` was NULL
pub const NOEXIT_INVALID: c_int = -1;

/// Runs `entry(argc, argv)` under a catch boundary for a C or C++ harness.
///
/// # Safety
/// `argv` must be a valid argument vector for `entry`. `status` may be NULL.
#[no_mangle]
pub unsafe extern "C-unwind" fn noexit_run_main(
    entry: Option<MainArgv>,
    argc: c_int,
    argv: *mut *mut c_char,
    status: *mut c_int,
) -> c_int {
    let Some(entry) = entry else {
        return NOEXIT_INVALID;
    };

    let (kind, code) = match catch_termination(|| entry(argc, argv)) {
        Ok(code) => (NOEXIT_RETURNED, code),
        Err(termination) => (NOEXIT_TERMINATED, termination.status),
    };

    if !status.is_null() {
        status.write(code);
    }

    kind
}

/// 0 forwards unguarded terminations to libc, 1 aborts. Returns -1 for any
/// other value and leaves the policy alone.
#[no_mangle]
pub extern "C" fn noexit_set_unguarded_policy(policy: c_int) -> c_int {
    let policy = match policy {
        0 => UnguardedPolicy::Forward,
        1 => UnguardedPolicy::Abort,
        _ => return -1,
    };

    set_unguarded_policy(policy);

    0
}

#[no_mangle]
pub extern "C" fn noexit_set_capture_backtrace(enabled: c_int) {
    set_capture_backtrace(enabled != 0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::unguarded_policy;

    unsafe extern "C-unwind" fn exits_with_argc(argc: c_int, _argv: *mut *mut c_char) -> c_int {
        crate::hooks::noexit_exit(argc + 100)
    }

    unsafe extern "C-unwind" fn returns_argc(argc: c_int, _argv: *mut *mut c_char) -> c_int {
        argc
    }

    #[test]
    fn run_main_reports_termination() {
        let mut status = 0;
        let kind = unsafe {
            noexit_run_main(Some(exits_with_argc), 2, std::ptr::null_mut(), &mut status)
        };

        assert_eq!(kind, NOEXIT_TERMINATED);
        assert_eq!(status, 102);
    }

    #[test]
    fn run_main_reports_return_value() {
        let mut status = -1;
        let kind =
            unsafe { noexit_run_main(Some(returns_argc), 3, std::ptr::null_mut(), &mut status) };

        assert_eq!(kind, NOEXIT_RETURNED);
        assert_eq!(status, 3);
    }

    #[test]
    fn run_main_tolerates_null_arguments() {
        let kind = unsafe {
            noexit_run_main(Some(exits_with_argc), 0, std::ptr::null_mut(), std::ptr::null_mut())
        };
        assert_eq!(kind, NOEXIT_TERMINATED);

        let kind = unsafe {
            noexit_run_main(None, 0, std::ptr::null_mut(), std::ptr::null_mut())
        };
        assert_eq!(kind, NOEXIT_INVALID);
    }

    #[test]
    fn unknown_policy_is_refused() {
        let before = unguarded_policy();
        assert_eq!(noexit_set_unguarded_policy(7), -1);
        assert_eq!(unguarded_policy(), before);
    }
}
