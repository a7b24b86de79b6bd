use std::{os::raw::c_int, panic, process, thread};

use libc::c_void;
use once_cell::sync::OnceCell;

use crate::{
    boundary::{self, UnguardedPolicy},
    termination::{Primitive, Termination},
};

type ExitFn = unsafe extern "C" fn(c_int) -> !;

static EXIT_ADDRESS: OnceCell<Option<ExitFn>> = OnceCell::new();
#[cfg(feature = "hook__exit")]
static UNDERSCORE_EXIT_ADDRESS: OnceCell<Option<ExitFn>> = OnceCell::new();
#[cfg(feature = "hook__Exit")]
static UPPER_EXIT_ADDRESS: OnceCell<Option<ExitFn>> = OnceCell::new();

// libc for android doesn't define this for android yet
// bionic defines this here https://github.com/aosp-mirror/platform_bionic/blob/master/libc/include/dlfcn.h
#[cfg(all(target_os = "android", target_pointer_width = "64"))]
const RTLD_NEXT: *mut c_void = -1i64 as *mut c_void;
#[cfg(all(target_os = "android", not(target_pointer_width = "64")))]
const RTLD_NEXT: *mut c_void = 0xfffffffe as *mut c_void;

#[cfg(not(target_os = "android"))]
use libc::RTLD_NEXT;

/// Looks up the next definition of `symbol` after ours, i.e. the libc one.
/// `symbol` must be NUL-terminated.
fn real_fn(cell: &OnceCell<Option<ExitFn>>, symbol: &'static [u8]) -> Option<ExitFn> {
    *cell.get_or_init(|| {
        let fn_address = unsafe { libc::dlsym(RTLD_NEXT, symbol.as_ptr().cast()) };
        if fn_address.is_null() {
            None
        } else {
            Some(unsafe { std::mem::transmute::<*mut c_void, ExitFn>(fn_address) })
        }
    })
}

fn real_exit_for(primitive: Primitive) -> Option<ExitFn> {
    match primitive {
        #[cfg(feature = "hook__exit")]
        Primitive::UnderscoreExit => real_fn(&UNDERSCORE_EXIT_ADDRESS, b"_exit\0"),
        #[cfg(feature = "hook__Exit")]
        Primitive::UpperExit => real_fn(&UPPER_EXIT_ADDRESS, b"_Exit\0"),
        _ => real_fn(&EXIT_ADDRESS, b"exit\0"),
    }
}

/// Hands the call to libc for a thread that has no catch boundary.
fn unguarded(status: c_int, primitive: Primitive) -> ! {
    match boundary::unguarded_policy() {
        UnguardedPolicy::Forward => match real_exit_for(primitive) {
            Some(real_exit) => {
                log::debug!("no catch boundary, forwarding {primitive}({status}) to libc");
                unsafe { real_exit(status) }
            }
            None => {
                log::error!("no catch boundary and real `{primitive}` could not be resolved");
                process::abort()
            }
        },
        UnguardedPolicy::Abort => {
            log::error!("{primitive}({status}) called outside of a catch boundary");
            process::abort()
        }
    }
}

fn intercept(status: c_int, primitive: Primitive) -> ! {
    // A second unwind while one is already in flight would abort anyway, do it
    // with a message.
    if thread::panicking() {
        log::error!("{primitive}({status}) called while the thread is already unwinding");
        process::abort();
    }

    if !boundary::mark_terminated() {
        unguarded(status, primitive);
    }

    let termination = Termination::new(status, primitive);
    log::debug!("intercepted {termination}");

    // resume_unwind skips the panic hook, a termination is not a crash
    panic::resume_unwind(Box::new(termination))
}

/// Raises an intercepted termination with `status`. Rust targets call this
/// instead of `std::process::exit`.
pub fn terminate(status: c_int) -> ! {
    intercept(status, Primitive::Redirect)
}

/// The function the pre-include header substitutes for `exit` and `_exit`.
#[no_mangle]
pub extern "C-unwind" fn noexit_exit(status: c_int) -> ! {
    intercept(status, Primitive::Redirect)
}

#[no_mangle]
#[cfg(feature = "hook_exit")]
pub extern "C-unwind" fn exit(status: c_int) -> ! {
    intercept(status, Primitive::Exit)
}

#[no_mangle]
#[cfg(feature = "hook__exit")]
pub extern "C-unwind" fn _exit(status: c_int) -> ! {
    intercept(status, Primitive::UnderscoreExit)
}

#[no_mangle]
#[allow(non_snake_case)]
#[cfg(feature = "hook__Exit")]
pub extern "C-unwind" fn _Exit(status: c_int) -> ! {
    intercept(status, Primitive::UpperExit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::catch_termination;

    #[test]
    fn statuses_arrive_unmodified() {
        for status in [0, 1, -1, 255, 256, 1000, c_int::MIN, c_int::MAX] {
            let termination = catch_termination(|| noexit_exit(status)).unwrap_err();
            assert_eq!(termination.status, status);
            assert_eq!(termination.primitive, Primitive::Redirect);
        }
    }

    #[test]
    #[allow(unreachable_code)]
    fn code_after_the_call_never_runs() {
        let mut reached = false;
        let result = catch_termination(|| {
            terminate(2);
            reached = true;
        });

        assert_eq!(result.unwrap_err().status, 2);
        assert!(!reached);
    }

    #[test]
    #[cfg(feature = "hook_exit")]
    fn exit_is_intercepted() {
        let termination = catch_termination(|| exit(1)).unwrap_err();
        assert_eq!(termination.status, 1);
        assert_eq!(termination.primitive, Primitive::Exit);
    }

    #[test]
    #[cfg(feature = "hook__exit")]
    fn underscore_exit_is_intercepted() {
        let termination = catch_termination(|| _exit(0)).unwrap_err();
        assert_eq!(termination.status, 0);
        assert_eq!(termination.primitive, Primitive::UnderscoreExit);
    }

    #[test]
    #[cfg(feature = "hook__Exit")]
    fn upper_exit_is_intercepted() {
        let termination = catch_termination(|| _Exit(4)).unwrap_err();
        assert_eq!(termination.primitive, Primitive::UpperExit);
    }

    #[test]
    fn real_exit_resolves_past_the_hook() {
        let real = real_exit_for(Primitive::Exit).expect("libc exit not found");
        assert_ne!(real as usize, noexit_exit as usize);
        #[cfg(feature = "hook_exit")]
        assert_ne!(real as usize, exit as usize);
    }
}
