//! Scoped diagnostic context for the front end's use during lowering
//! (§4.2, §9 "scoped context stacks").
//!
//! The IR core never reports *semantic* errors itself — by the time the
//! builder is called, inputs are assumed well-typed (§7) — but the
//! front end needs somewhere to attribute diagnostics it raises while
//! driving the builder. This module gives it a stack of sinks with
//! deterministic release on every exit path, including panics.

use std::cell::RefCell;
use std::rc::Rc;

/// Something that can receive a diagnostic message tagged with a
/// severity. The front end implements this; the core only pushes and
/// pops it.
pub trait DiagnosticSink {
    fn emit(&self, severity: Severity, message: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// Falls back to the `log` crate when no front-end sink has been
/// pushed, so builder-internal diagnostics (pass non-convergence, LICM
/// decisions) are never silently dropped.
struct LogSink;

impl DiagnosticSink for LogSink {
    fn emit(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Warning => log::warn!("{message}"),
            Severity::Error => log::error!("{message}"),
        }
    }
}

thread_local! {
    static STACK: RefCell<Vec<Rc<dyn DiagnosticSink>>> = const { RefCell::new(Vec::new()) };
}

/// Pushes `sink` as the active diagnostic target. Returns a guard that
/// pops it again when dropped — on scope exit, early return, or
/// unwinding, matching spec.md §9's guidance to use a scoped-acquisition
/// primitive rather than manual push/pop pairs.
pub fn push_scope(sink: Rc<dyn DiagnosticSink>) -> LoggerScope {
    STACK.with(|s| s.borrow_mut().push(sink));
    LoggerScope { _private: () }
}

pub struct LoggerScope {
    _private: (),
}

impl Drop for LoggerScope {
    fn drop(&mut self) {
        STACK.with(|s| {
            s.borrow_mut().pop();
        });
    }
}

/// Emits to the innermost pushed sink, falling back to `log`.
pub fn emit(severity: Severity, message: &str) {
    let sink = STACK.with(|s| s.borrow().last().cloned());
    match sink {
        Some(sink) => sink.emit(severity, message),
        None => LogSink.emit(severity, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingSink {
        count: Cell<u32>,
    }

    impl DiagnosticSink for CountingSink {
        fn emit(&self, _severity: Severity, _message: &str) {
            self.count.set(self.count.get() + 1);
        }
    }

    #[test]
    fn scope_routes_diagnostics_to_the_pushed_sink() {
        let sink = Rc::new(CountingSink { count: Cell::new(0) });
        {
            let _scope = push_scope(sink.clone());
            emit(Severity::Warning, "hoisted nothing this round");
        }
        assert_eq!(sink.count.get(), 1);
    }

    #[test]
    fn scope_pops_on_drop() {
        let sink = Rc::new(CountingSink { count: Cell::new(0) });
        {
            let _scope = push_scope(sink.clone());
        }
        emit(Severity::Warning, "no active scope");
        assert_eq!(sink.count.get(), 0);
    }
}
