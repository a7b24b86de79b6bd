use std::{
    fmt,
    os::raw::c_int,
    sync::atomic::{AtomicBool, Ordering},
};

use backtrace::Backtrace;
use serde::{Deserialize, Serialize};

static CAPTURE_BACKTRACE: AtomicBool = AtomicBool::new(false);

/// Record an (unresolved) backtrace with every intercepted termination. Off by
/// default since it is taken on the hot path of every iteration that exits.
pub fn set_capture_backtrace(enabled: bool) {
    CAPTURE_BACKTRACE.store(enabled, Ordering::Relaxed);
}

pub fn capture_backtrace() -> bool {
    CAPTURE_BACKTRACE.load(Ordering::Relaxed)
}

/// The process-termination routine the target tried to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Primitive {
    /// `exit(3)`
    Exit,
    /// `_exit(2)`
    UnderscoreExit,
    /// `_Exit(3)`
    UpperExit,
    /// `noexit_exit`, which the pre-include header substitutes for both
    /// `exit` and `_exit`, or a direct call from Rust
    Redirect,
}

impl Primitive {
    /// Name of the C symbol this primitive is reached through
    pub fn symbol(&self) -> &'static str {
        match self {
            Primitive::Exit => "exit",
            Primitive::UnderscoreExit => "_exit",
            Primitive::UpperExit => "_Exit",
            Primitive::Redirect => crate::header::EXIT_SYMBOL,
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// An intercepted call to a termination primitive.
///
/// This is the payload unwound from the call site to the innermost catch
/// boundary. It only ever lives between those two points; the shim never
/// keeps a copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Termination {
    /// Status code the target passed, unmodified. No truncation to the 8 bits
    /// a real exit status would keep.
    pub status: c_int,
    pub primitive: Primitive,
    /// OS thread id of the thread that raised the termination
    pub thread: usize,
    #[serde(skip)]
    pub backtrace: Option<Backtrace>,
}

impl Termination {
    pub(crate) fn new(status: c_int, primitive: Primitive) -> Self {
        let backtrace = if capture_backtrace() {
            Some(Backtrace::new_unresolved())
        } else {
            None
        };

        Termination {
            status,
            primitive,
            thread: thread_id::get(),
            backtrace,
        }
    }

    /// Resolves symbol names for the captured backtrace, if there is one.
    pub fn resolved_backtrace(&mut self) -> Option<&Backtrace> {
        if let Some(backtrace) = self.backtrace.as_mut() {
            backtrace.resolve();
        }

        self.backtrace.as_ref()
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.primitive, self.status)
    }
}

/// How a guarded run of an entry point ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Outcome {
    /// The entry point returned normally with this value
    Returned(c_int),
    /// The entry point tried to terminate the process
    Terminated(Termination),
}

impl Outcome {
    /// The status the process would have ended with had it not been guarded
    pub fn status(&self) -> c_int {
        match self {
            Outcome::Returned(code) => *code,
            Outcome::Terminated(termination) => termination.status,
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Outcome::Terminated(_))
    }

    pub fn termination(&self) -> Option<&Termination> {
        match self {
            Outcome::Terminated(termination) => Some(termination),
            Outcome::Returned(_) => None,
        }
    }
}

impl From<Result<c_int, Termination>> for Outcome {
    fn from(result: Result<c_int, Termination>) -> Self {
        match result {
            Ok(code) => Outcome::Returned(code),
            Err(termination) => Outcome::Terminated(termination),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_status_covers_both_kinds() {
        assert_eq!(Outcome::Returned(7).status(), 7);

        let terminated = Outcome::Terminated(Termination::new(-3, Primitive::Exit));
        assert_eq!(terminated.status(), -3);
        assert!(terminated.is_terminated());
        assert_eq!(terminated.termination().map(|t| t.primitive), Some(Primitive::Exit));
    }

    #[test]
    fn termination_records_calling_thread() {
        let termination = Termination::new(0, Primitive::UnderscoreExit);
        assert_eq!(termination.thread, thread_id::get());
        assert_eq!(termination.to_string(), "_exit(0)");
    }

    #[test]
    fn outcome_serializes_with_kind_tag() {
        let json = serde_json::to_value(Outcome::Returned(2)).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "returned", "value": 2 }));

        let json =
            serde_json::to_value(Outcome::Terminated(Termination::new(1, Primitive::Exit))).unwrap();
        assert_eq!(json["kind"], "terminated");
        assert_eq!(json["value"]["status"], 1);
        assert_eq!(json["value"]["primitive"], "exit");
        assert!(json["value"].get("backtrace").is_none());
    }
}
