//! Buffered writer whose output appears only on commit
//!
//! Bytes written from closed code are held in a buffer. An abort truncates
//! the buffer back to where the aborted frame started writing; the commit
//! of the whole nest writes the buffer to the sink and then performs at
//! most one flush, if any closed code asked for one.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;
use txmem_engine::{is_closed, on_abort, pop_on_commit_handler, push_on_commit_handler, HandlerKey};

struct WriterState<W> {
    sink: W,
    buffer: Vec<u8>,
    flush_requested: bool,
    last_error: Option<io::Error>,
}

impl<W: Write> WriterState<W> {
    fn publish(&mut self) {
        let buffer = std::mem::take(&mut self.buffer);
        let flush = std::mem::replace(&mut self.flush_requested, false);
        let mut result = self.sink.write_all(&buffer);
        if result.is_ok() && flush {
            result = self.sink.flush();
        }
        if let Err(error) = result {
            tracing::warn!(%error, bytes = buffer.len(), "deferred write failed");
            self.last_error = Some(error);
        }
    }
}

/// A [`Write`] adaptor that defers closed-code output until commit
///
/// Cloning yields another handle to the same sink.
pub struct TxWriter<W> {
    state: Rc<RefCell<WriterState<W>>>,
}

impl<W> Clone for TxWriter<W> {
    fn clone(&self) -> Self {
        TxWriter {
            state: Rc::clone(&self.state),
        }
    }
}

impl<W: Write + 'static> TxWriter<W> {
    /// Wrap `sink`
    pub fn new(sink: W) -> Self {
        TxWriter {
            state: Rc::new(RefCell::new(WriterState {
                sink,
                buffer: Vec::new(),
                flush_requested: false,
                last_error: None,
            })),
        }
    }

    /// Bytes written by closed code and not yet published
    pub fn pending_len(&self) -> usize {
        self.state.borrow().buffer.len()
    }

    /// Run `f` on the underlying sink
    pub fn with_sink<R>(&self, f: impl FnOnce(&mut W) -> R) -> R {
        f(&mut self.state.borrow_mut().sink)
    }

    /// Take the error of the last failed deferred write, if any
    pub fn take_error(&self) -> Option<io::Error> {
        self.state.borrow_mut().last_error.take()
    }

    fn key(&self) -> HandlerKey {
        HandlerKey::from_ptr(Rc::as_ptr(&self.state))
    }

    /// Replace this nest's publish handler so exactly one runs on commit
    fn schedule_publish(&self) {
        let key = self.key();
        pop_on_commit_handler(key);
        let state = Rc::clone(&self.state);
        push_on_commit_handler(key, move || state.borrow_mut().publish());
    }
}

impl<W: Write + 'static> Write for TxWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !is_closed() {
            return self.state.borrow_mut().sink.write(buf);
        }
        let start = {
            let mut state = self.state.borrow_mut();
            let start = state.buffer.len();
            state.buffer.extend_from_slice(buf);
            start
        };
        let state = Rc::clone(&self.state);
        on_abort(move || state.borrow_mut().buffer.truncate(start));
        self.schedule_publish();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !is_closed() {
            return self.state.borrow_mut().sink.flush();
        }
        let was_requested = {
            let mut state = self.state.borrow_mut();
            std::mem::replace(&mut state.flush_requested, true)
        };
        if !was_requested {
            let state = Rc::clone(&self.state);
            on_abort(move || state.borrow_mut().flush_requested = false);
        }
        self.schedule_publish();
        Ok(())
    }
}

impl<W> std::fmt::Debug for TxWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("TxWriter")
            .field("pending", &state.buffer.len())
            .field("flush_requested", &state.flush_requested)
            .finish_non_exhaustive()
    }
}
