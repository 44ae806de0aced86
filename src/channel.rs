use crate::exec::RuntimeError;
use crate::value::Value;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long a cancellable blocking operation sleeps between checks of the
/// cancellation signal. Bounds the latency of cancellation observation.
const CANCEL_POLL: Duration = Duration::from_millis(1);

/// The interpreter's task-cancellation signal: the "done channel". Closing
/// it makes every cancellable channel operation fail with a cancellation
/// error in bounded time.
#[derive(Clone, Debug, Default)]
pub struct CancelSignal {
    closed: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

struct ChanState {
    /// Pending values with their send sequence numbers.
    queue: VecDeque<(u64, Value)>,
    next_seq: u64,
    /// Number of values consumed by receivers so far.
    consumed: u64,
    cap: usize,
    closed: bool,
    /// Receivers currently blocked, used by non-blocking send probes on
    /// unbuffered channels.
    recv_waiting: usize,
}

struct ChanInner {
    state: Mutex<ChanState>,
    send_cv: Condvar,
    recv_cv: Condvar,
}

/// A channel value. Cloning shares the channel.
#[derive(Clone)]
pub struct ChanVal {
    inner: Arc<ChanInner>,
}

impl ChanVal {
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Arc::new(ChanInner {
                state: Mutex::new(ChanState {
                    queue: VecDeque::new(),
                    next_seq: 0,
                    consumed: 0,
                    cap,
                    closed: false,
                    recv_waiting: 0,
                }),
                send_cv: Condvar::new(),
                recv_cv: Condvar::new(),
            }),
        }
    }

    pub fn ptr_eq(&self, other: &ChanVal) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn cap(&self) -> usize {
        self.inner.state.lock().cap
    }

    pub fn close(&self) -> Result<(), RuntimeError> {
        let mut st = self.inner.state.lock();
        if st.closed {
            return Err(RuntimeError::CloseOfClosed);
        }
        st.closed = true;
        self.inner.send_cv.notify_all();
        self.inner.recv_cv.notify_all();
        Ok(())
    }

    /// Blocking send. With a cancellation signal the wait is a select
    /// between the send and the signal.
    pub fn send(&self, value: Value, cancel: Option<&CancelSignal>) -> Result<(), RuntimeError> {
        let mut st = self.inner.state.lock();

        if st.cap > 0 {
            loop {
                if st.closed {
                    return Err(RuntimeError::SendOnClosed);
                }
                if st.queue.len() < st.cap {
                    let seq = st.next_seq;
                    st.next_seq += 1;
                    st.queue.push_back((seq, value));
                    self.inner.recv_cv.notify_one();
                    return Ok(());
                }
                self.wait(&self.inner.send_cv, &mut st, cancel)?;
            }
        }

        // Unbuffered: enqueue and wait for a receiver to take our value.
        if st.closed {
            return Err(RuntimeError::SendOnClosed);
        }
        let seq = st.next_seq;
        st.next_seq += 1;
        st.queue.push_back((seq, value));
        self.inner.recv_cv.notify_one();
        loop {
            if st.consumed > seq {
                return Ok(());
            }
            if st.closed {
                self.drop_pending(&mut st, seq);
                return Err(RuntimeError::SendOnClosed);
            }
            if let Err(err) = self.wait(&self.inner.send_cv, &mut st, cancel) {
                if st.consumed <= seq {
                    self.drop_pending(&mut st, seq);
                }
                return Err(err);
            }
        }
    }

    fn drop_pending(&self, st: &mut ChanState, seq: u64) {
        if let Some(pos) = st.queue.iter().position(|(s, _)| *s == seq) {
            st.queue.remove(pos);
        }
    }

    /// Blocking receive. `Ok(None)` means the channel is closed and
    /// drained.
    pub fn recv(&self, cancel: Option<&CancelSignal>) -> Result<Option<Value>, RuntimeError> {
        let mut st = self.inner.state.lock();
        loop {
            if let Some((_, value)) = st.queue.pop_front() {
                st.consumed += 1;
                self.inner.send_cv.notify_all();
                return Ok(Some(value));
            }
            if st.closed {
                return Ok(None);
            }
            st.recv_waiting += 1;
            let waited = self.wait(&self.inner.recv_cv, &mut st, cancel);
            st.recv_waiting -= 1;
            waited?;
        }
    }

    /// Non-blocking send probe for select.
    pub fn try_send(&self, value: Value) -> Result<bool, RuntimeError> {
        let mut st = self.inner.state.lock();
        if st.closed {
            return Err(RuntimeError::SendOnClosed);
        }
        let room = if st.cap > 0 {
            st.queue.len() < st.cap
        } else {
            st.recv_waiting > st.queue.len()
        };
        if !room {
            return Ok(false);
        }
        let seq = st.next_seq;
        st.next_seq += 1;
        st.queue.push_back((seq, value));
        self.inner.recv_cv.notify_one();
        Ok(true)
    }

    /// Non-blocking receive probe for select. The outer option is the
    /// readiness; the inner one mirrors `recv`.
    pub fn try_recv(&self) -> Option<Option<Value>> {
        let mut st = self.inner.state.lock();
        if let Some((_, value)) = st.queue.pop_front() {
            st.consumed += 1;
            self.inner.send_cv.notify_all();
            return Some(Some(value));
        }
        if st.closed {
            return Some(None);
        }
        None
    }

    fn wait(
        &self,
        cv: &Condvar,
        st: &mut MutexGuard<'_, ChanState>,
        cancel: Option<&CancelSignal>,
    ) -> Result<(), RuntimeError> {
        match cancel {
            Some(signal) => {
                if signal.is_closed() {
                    return Err(RuntimeError::Cancelled);
                }
                cv.wait_for(st, CANCEL_POLL);
                if signal.is_closed() {
                    return Err(RuntimeError::Cancelled);
                }
                Ok(())
            }
            None => {
                cv.wait(st);
                Ok(())
            }
        }
    }
}

/// One armed case of a select statement.
pub enum SelectOp {
    Send { chan: ChanVal, value: Value },
    Recv { chan: ChanVal },
}

/// Outcome of a ready select case.
pub enum SelectReady {
    Sent,
    Received(Option<Value>),
}

/// Runs a select over `ops`. Returns the index of the chosen case and its
/// outcome, or `None` when `has_default` and nothing was ready. Blocks by
/// polling so the cancellation signal is observed in bounded time.
pub fn select(
    ops: &[SelectOp],
    has_default: bool,
    cancel: Option<&CancelSignal>,
) -> Result<Option<(usize, SelectReady)>, RuntimeError> {
    // Rotate the starting point so a busy first case cannot starve others.
    let mut start = 0usize;
    loop {
        for probe in 0..ops.len() {
            let idx = (start + probe) % ops.len();
            match &ops[idx] {
                SelectOp::Send { chan, value } => {
                    if chan.try_send(value.clone())? {
                        return Ok(Some((idx, SelectReady::Sent)));
                    }
                }
                SelectOp::Recv { chan } => {
                    if let Some(received) = chan.try_recv() {
                        return Ok(Some((idx, SelectReady::Received(received))));
                    }
                }
            }
        }
        if has_default {
            return Ok(None);
        }
        if let Some(signal) = cancel {
            if signal.is_closed() {
                return Err(RuntimeError::Cancelled);
            }
        }
        if ops.is_empty() && cancel.is_none() {
            return Err(RuntimeError::DeadLock);
        }
        std::thread::sleep(CANCEL_POLL);
        start = start.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn buffered_send_and_receive_keep_order() {
        let ch = ChanVal::new(2);
        ch.send(Value::Int(1), None).expect("send 1");
        ch.send(Value::Int(2), None).expect("send 2");
        assert!(ch.recv(None).expect("recv").expect("value").equal(&Value::Int(1)));
        assert!(ch.recv(None).expect("recv").expect("value").equal(&Value::Int(2)));
    }

    #[test]
    fn receive_on_closed_drained_channel_reports_closed() {
        let ch = ChanVal::new(1);
        ch.send(Value::Int(7), None).expect("send");
        ch.close().expect("close");
        assert!(ch.recv(None).expect("recv").is_some());
        assert!(ch.recv(None).expect("recv").is_none());
    }

    #[test]
    fn send_on_closed_channel_panics() {
        let ch = ChanVal::new(1);
        ch.close().expect("close");
        assert!(matches!(
            ch.send(Value::Int(1), None),
            Err(RuntimeError::SendOnClosed)
        ));
        assert!(matches!(ch.close(), Err(RuntimeError::CloseOfClosed)));
    }

    #[test]
    fn unbuffered_channels_rendezvous() {
        let ch = ChanVal::new(0);
        let sender = {
            let ch = ch.clone();
            thread::spawn(move || ch.send(Value::Int(42), None))
        };
        let got = ch.recv(None).expect("recv").expect("value");
        assert!(got.equal(&Value::Int(42)));
        sender.join().expect("join").expect("send");
    }

    #[test]
    fn cancellation_unblocks_a_pending_receive() {
        let ch = ChanVal::new(0);
        let signal = CancelSignal::new();
        let waiter = {
            let ch = ch.clone();
            let signal = signal.clone();
            thread::spawn(move || ch.recv(Some(&signal)))
        };
        thread::sleep(Duration::from_millis(20));
        signal.close();
        let res = waiter.join().expect("join");
        assert!(matches!(res, Err(RuntimeError::Cancelled)));
    }

    #[test]
    fn select_prefers_a_ready_case_and_falls_back_to_default() {
        let a = ChanVal::new(1);
        let b = ChanVal::new(1);
        b.send(Value::Int(5), None).expect("send");
        let ops = [
            SelectOp::Recv { chan: a.clone() },
            SelectOp::Recv { chan: b.clone() },
        ];
        match select(&ops, false, None).expect("select") {
            Some((1, SelectReady::Received(Some(v)))) => assert!(v.equal(&Value::Int(5))),
            other => panic!("unexpected select result: {:?}", other.is_some()),
        }
        let empty = [SelectOp::Recv { chan: a }];
        assert!(select(&empty, true, None).expect("select").is_none());
    }
}
