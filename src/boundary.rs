use std::{
    cell::RefCell,
    fmt,
    panic::{self, AssertUnwindSafe},
    str::FromStr,
    sync::atomic::{AtomicU8, Ordering},
};

use serde::{Deserialize, Serialize};

use crate::termination::Termination;

thread_local! {
    /// One entry per active boundary on this thread, innermost last
    static BOUNDARIES: RefCell<Vec<IterationState>> = RefCell::new(Vec::new());
}

static UNGUARDED_POLICY: AtomicU8 = AtomicU8::new(UnguardedPolicy::Forward as u8);

/// State of the innermost catch boundary. A boundary starts out `Running` and
/// moves to `Terminated` once a termination has been raised inside it; it
/// never goes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationState {
    Running,
    Terminated,
}

/// What to do when a termination primitive is called on a thread that has no
/// catch boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum UnguardedPolicy {
    /// Call the real libc routine; the process really ends
    Forward = 0,
    /// Abort the process
    Abort = 1,
}

impl UnguardedPolicy {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => UnguardedPolicy::Abort,
            _ => UnguardedPolicy::Forward,
        }
    }
}

impl FromStr for UnguardedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forward" => Ok(UnguardedPolicy::Forward),
            "abort" => Ok(UnguardedPolicy::Abort),
            other => Err(format!(
                "unknown policy `{other}`, expected `forward` or `abort`"
            )),
        }
    }
}

impl fmt::Display for UnguardedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnguardedPolicy::Forward => "forward",
            UnguardedPolicy::Abort => "abort",
        })
    }
}

pub fn set_unguarded_policy(policy: UnguardedPolicy) {
    UNGUARDED_POLICY.store(policy as u8, Ordering::Relaxed);
}

pub fn unguarded_policy() -> UnguardedPolicy {
    UnguardedPolicy::from_u8(UNGUARDED_POLICY.load(Ordering::Relaxed))
}

/// Pops the boundary it pushed, whether `catch_termination` returns or
/// unwinds past it.
struct BoundaryGuard {
    depth: usize,
}

impl BoundaryGuard {
    fn enter() -> Self {
        let depth = BOUNDARIES.with(|boundaries| {
            let mut boundaries = boundaries.borrow_mut();
            boundaries.push(IterationState::Running);
            boundaries.len()
        });

        BoundaryGuard { depth }
    }

    fn state(&self) -> IterationState {
        BOUNDARIES.with(|boundaries| boundaries.borrow()[self.depth - 1])
    }
}

impl Drop for BoundaryGuard {
    fn drop(&mut self) {
        let _ = BOUNDARIES.try_with(|boundaries| {
            boundaries.borrow_mut().truncate(self.depth - 1);
        });
    }
}

/// Runs `f` under a fresh catch boundary.
///
/// If `f` (or anything it calls on this thread) calls an intercepted
/// termination primitive, the stack is unwound back here and the termination
/// is returned as `Err`. Any other panic passes through untouched.
///
/// Boundaries nest; a termination is always received by the innermost one.
pub fn catch_termination<F, R>(f: F) -> Result<R, Termination>
where
    F: FnOnce() -> R,
{
    let guard = BoundaryGuard::enter();
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    let state = guard.state();
    drop(guard);

    match result {
        Ok(value) => {
            if state == IterationState::Terminated {
                log::warn!("a termination raised inside this boundary was caught before reaching it");
            }

            Ok(value)
        }
        Err(payload) => match payload.downcast::<Termination>() {
            Ok(termination) => Err(*termination),
            Err(payload) => panic::resume_unwind(payload),
        },
    }
}

/// State of the innermost boundary on this thread, `None` when the thread is
/// not inside any.
pub fn state() -> Option<IterationState> {
    BOUNDARIES
        .try_with(|boundaries| boundaries.borrow().last().copied())
        .ok()
        .flatten()
}

/// Number of boundaries currently active on this thread
pub fn depth() -> usize {
    BOUNDARIES
        .try_with(|boundaries| boundaries.borrow().len())
        .unwrap_or(0)
}

/// Moves the innermost boundary to `Terminated`. Returns false if there is no
/// boundary to receive a termination, including while the thread's locals are
/// being torn down.
pub(crate) fn mark_terminated() -> bool {
    BOUNDARIES
        .try_with(|boundaries| match boundaries.borrow_mut().last_mut() {
            Some(state) => {
                *state = IterationState::Terminated;
                true
            }
            None => false,
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::terminate;

    #[test]
    fn no_boundary_outside_catch() {
        assert_eq!(state(), None);
        assert_eq!(depth(), 0);
    }

    #[test]
    fn running_inside_catch() {
        let seen = catch_termination(|| (state(), depth())).unwrap();
        assert_eq!(seen, (Some(IterationState::Running), 1));
        assert_eq!(depth(), 0);
    }

    #[test]
    fn innermost_boundary_receives_termination() {
        let outer = catch_termination(|| {
            let inner = catch_termination(|| terminate(5));
            let inner_status = inner.map_err(|t| t.status);
            (inner_status, state(), depth())
        })
        .unwrap();

        assert_eq!(outer, (Err(5), Some(IterationState::Running), 1));
    }

    #[test]
    fn boundary_is_popped_after_termination() {
        let result = catch_termination(|| terminate(1));
        assert!(result.is_err());
        assert_eq!(depth(), 0);
    }

    #[test]
    fn ordinary_panics_pass_through() {
        let result = panic::catch_unwind(|| {
            let _ = catch_termination(|| panic!("not a termination"));
        });

        let payload = result.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"not a termination"));
        assert_eq!(depth(), 0);
    }

    #[test]
    fn destructors_observe_terminated_state() {
        struct Probe(std::rc::Rc<std::cell::Cell<Option<IterationState>>>);

        impl Drop for Probe {
            fn drop(&mut self) {
                self.0.set(state());
            }
        }

        let seen = std::rc::Rc::new(std::cell::Cell::new(None));
        let probe = Probe(seen.clone());
        let result = catch_termination(move || {
            let _probe = probe;
            terminate(9)
        });

        assert_eq!(result.unwrap_err().status, 9);
        assert_eq!(seen.get(), Some(IterationState::Terminated));
    }

    #[test]
    fn policy_parses_from_cli_names() {
        assert_eq!("forward".parse(), Ok(UnguardedPolicy::Forward));
        assert_eq!("abort".parse(), Ok(UnguardedPolicy::Abort));
        assert!("ignore".parse::<UnguardedPolicy>().is_err());
        assert_eq!(UnguardedPolicy::from_u8(UnguardedPolicy::Abort as u8), UnguardedPolicy::Abort);
    }
}
