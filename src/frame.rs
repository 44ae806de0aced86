use crate::channel::CancelSignal;
use crate::value::Value;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A deferred call: the callable plus arguments evaluated at the defer
/// statement.
#[derive(Clone)]
pub struct Deferred {
    pub callee: Value,
    pub args: Vec<Value>,
}

/// Values for one execution level (a function activation).
///
/// A frame is single-writer: only the task executing the function writes
/// slots. Captured frames are read by other tasks under `data`'s lock.
pub struct Frame {
    /// Run id for cancellation, compared against the interpreter's counter
    /// on each step. Kept first in the record.
    id: AtomicU64,

    /// Ancestor frame: the definition frame for closures, the global frame
    /// for package-level code.
    pub anc: Option<Arc<Frame>>,
    pub data: RwLock<Vec<Value>>,

    pub defers: Mutex<Vec<Deferred>>,
    /// Pending panic value made visible to `recover` while defers drain.
    pub recovered: Mutex<Option<Value>>,
    /// Cancellation signal shared with ancestors; the evaluator rewires
    /// the root frame's signal per cancellable invocation.
    done: Mutex<CancelSignal>,
}

impl Frame {
    pub fn new(anc: Option<Arc<Frame>>, len: usize, id: u64) -> Arc<Frame> {
        let done = anc
            .as_ref()
            .map(|a| a.done_signal())
            .unwrap_or_default();
        Arc::new(Frame {
            id: AtomicU64::new(id),
            anc,
            data: RwLock::new(vec![Value::Nil; len]),
            defers: Mutex::new(Vec::new()),
            recovered: Mutex::new(None),
            done: Mutex::new(done),
        })
    }

    pub fn runid(&self) -> u64 {
        self.id.load(Ordering::Acquire)
    }

    pub fn set_runid(&self, id: u64) {
        self.id.store(id, Ordering::Release)
    }

    pub fn done_signal(&self) -> CancelSignal {
        self.done.lock().clone()
    }

    pub fn set_done(&self, done: CancelSignal) {
        *self.done.lock() = done;
    }

    /// Walks `level` ancestor links. Level 0 is the frame itself.
    pub fn ancestor(self: &Arc<Frame>, level: usize) -> Arc<Frame> {
        let mut cur = self.clone();
        for _ in 0..level {
            match &cur.anc {
                Some(anc) => {
                    let next = anc.clone();
                    cur = next;
                }
                None => break,
            }
        }
        cur
    }

    pub fn get(&self, index: usize) -> Value {
        self.data.read().get(index).cloned().unwrap_or(Value::Nil)
    }

    pub fn set(&self, index: usize, value: Value) {
        let mut data = self.data.write();
        if index >= data.len() {
            data.resize(index + 1, Value::Nil);
        }
        data[index] = value;
    }

    /// Grows the frame to `len` slots, used by the global frame as
    /// successive evaluations declare more package-level symbols.
    pub fn resize(&self, len: usize) {
        let mut data = self.data.write();
        if len > data.len() {
            data.resize(len, Value::Nil);
        }
    }

    pub fn push_defer(&self, deferred: Deferred) {
        self.defers.lock().push(deferred);
    }

    /// Drains the defer stack in reverse insertion order.
    pub fn take_defers(&self) -> Vec<Deferred> {
        let mut defers = self.defers.lock();
        let mut out: Vec<Deferred> = defers.drain(..).collect();
        out.reverse();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ancestor_walks_the_chain() {
        let root = Frame::new(None, 1, 7);
        root.set(0, Value::Int(1));
        let mid = Frame::new(Some(root.clone()), 1, 7);
        let leaf = Frame::new(Some(mid.clone()), 1, 7);

        assert!(Arc::ptr_eq(&leaf.ancestor(0), &leaf));
        assert!(Arc::ptr_eq(&leaf.ancestor(1), &mid));
        assert!(Arc::ptr_eq(&leaf.ancestor(2), &root));
        assert!(leaf.ancestor(2).get(0).equal(&Value::Int(1)));
    }

    #[test]
    fn defers_drain_in_reverse_order() {
        let frame = Frame::new(None, 0, 0);
        for n in 1..=3 {
            frame.push_defer(Deferred {
                callee: Value::Int(n),
                args: Vec::new(),
            });
        }
        let order: Vec<i64> = frame
            .take_defers()
            .into_iter()
            .map(|d| match d.callee {
                Value::Int(v) => v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(order, vec![3, 2, 1]);
        assert!(frame.take_defers().is_empty());
    }

    #[test]
    fn frames_inherit_the_cancellation_signal() {
        let root = Frame::new(None, 0, 0);
        let child = Frame::new(Some(root.clone()), 0, 0);
        root.done_signal().close();
        assert!(child.done_signal().is_closed());
    }
}
