use crate::channel::{self, CancelSignal, SelectOp, SelectReady};
use crate::frame::{Deferred, Frame};
use crate::interp::InterpCore;
use crate::node::{NodeId, Unit};
use crate::ops::{BinFn, ConvFn, UnFn};
use crate::types::{Selected, TypeId};
use crate::value::{FuncVal, IfaceVal, PathStep, PtrVal, SliceVal, StructVal, Value};
use std::fmt;
use std::sync::Arc;

/// A runtime failure. Everything except cancellation propagates like a
/// panic: frames drain their defers and `recover` may consume it.
#[derive(Clone)]
pub enum RuntimeError {
    /// The interpreted `panic` builtin.
    Panicked { value: Box<Value> },
    NilDeref,
    DivByZero,
    OutOfBounds { index: i64, len: usize },
    SliceBounds { low: usize, high: usize, cap: usize },
    SendOnClosed,
    CloseOfClosed,
    CloseOfNil,
    AssertFailed { want: String, got: String },
    Unhashable,
    NotAFunction,
    MissingMethod { name: String },
    DeadLock,
    /// A host callable reported an error.
    Host { message: String },
    /// Evaluation was cancelled; runs defers but cannot be recovered.
    Cancelled,
    Internal { message: String },
}

impl RuntimeError {
    pub fn internal(message: &str) -> Self {
        RuntimeError::Internal {
            message: message.to_string(),
        }
    }

    /// Whether `recover` may consume this error.
    pub fn recoverable(&self) -> bool {
        !matches!(self, RuntimeError::Cancelled)
    }

    /// The value `recover` returns for this error.
    pub fn panic_value(&self) -> Value {
        match self {
            RuntimeError::Panicked { value } => (**value).clone(),
            other => Value::str(&other.to_string()),
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Panicked { value } => write!(f, "{value}"),
            RuntimeError::NilDeref => write!(
                f,
                "runtime error: invalid memory address or nil pointer dereference"
            ),
            RuntimeError::DivByZero => write!(f, "runtime error: integer divide by zero"),
            RuntimeError::OutOfBounds { index, len } => write!(
                f,
                "runtime error: index out of range [{index}] with length {len}"
            ),
            RuntimeError::SliceBounds { low, high, cap } => write!(
                f,
                "runtime error: slice bounds out of range [{low}:{high}] with capacity {cap}"
            ),
            RuntimeError::SendOnClosed => write!(f, "send on closed channel"),
            RuntimeError::CloseOfClosed => write!(f, "close of closed channel"),
            RuntimeError::CloseOfNil => write!(f, "close of nil channel"),
            RuntimeError::AssertFailed { want, got } => {
                write!(f, "interface conversion: interface is {got}, not {want}")
            }
            RuntimeError::Unhashable => write!(f, "runtime error: hash of unhashable value"),
            RuntimeError::NotAFunction => write!(f, "call of non-function value"),
            RuntimeError::MissingMethod { name } => write!(f, "undefined method {name}"),
            RuntimeError::DeadLock => write!(f, "all tasks are asleep - deadlock"),
            RuntimeError::Host { message } => write!(f, "{message}"),
            RuntimeError::Cancelled => write!(f, "execution cancelled"),
            RuntimeError::Internal { message } => write!(f, "internal error: {message}"),
        }
    }
}

impl fmt::Debug for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl std::error::Error for RuntimeError {}

/// Per-task interpreter state: the stack of frames currently draining
/// defers, which scopes `recover`.
#[derive(Default)]
pub struct TaskState {
    pub defer_frames: parking_lot::Mutex<Vec<Arc<Frame>>>,
}

/// Everything an action closure needs at run time.
pub struct ExecCtx {
    pub interp: Arc<InterpCore>,
    pub unit: Arc<Unit>,
    pub task: Arc<TaskState>,
    /// The run id pinned when this evaluation started. Every frame the
    /// evaluation creates carries it, so bumping the interpreter's counter
    /// cancels the whole evaluation without racing frame creation.
    pub run_id: u64,
}

impl ExecCtx {
    pub fn with_unit(&self, unit: Arc<Unit>) -> ExecCtx {
        ExecCtx {
            interp: self.interp.clone(),
            unit,
            task: self.task.clone(),
            run_id: self.run_id,
        }
    }
}

/// The cancellation signal channel operations select against, or `None`
/// when `fast_chan` disables cancellable channel operations.
fn chan_cancel(ctx: &ExecCtx, frame: &Arc<Frame>) -> Option<CancelSignal> {
    if ctx.interp.cancellable_chans() {
        Some(frame.done_signal())
    } else {
        None
    }
}

/// A generated action closure: executes one node and yields the next.
pub type ExecFn =
    Arc<dyn Fn(&ExecCtx, &Arc<Frame>) -> Result<Option<NodeId>, RuntimeError> + Send + Sync>;

/// Walks the CFG from `start`, dispatching each node's action closure. The
/// run id is compared once per node transition to observe cancellation.
pub fn run_cfg(ctx: &ExecCtx, start: NodeId, frame: &Arc<Frame>) -> Result<(), RuntimeError> {
    let mut cur = Some(start);
    while let Some(id) = cur {
        if frame.runid() != ctx.interp.runid() {
            return Err(RuntimeError::Cancelled);
        }
        let action = ctx
            .unit
            .exec
            .get(id as usize)
            .and_then(|a| a.as_ref())
            .ok_or_else(|| RuntimeError::internal("unreachable node entered"))?;
        cur = action(ctx, frame)?;
    }
    Ok(())
}

/// Boxes a concrete value for an interface-typed destination. Preexisting
/// interface values and nil pass through unchanged.
pub fn coerce(value: Value, wrap: Option<TypeId>) -> Value {
    match wrap {
        Some(typ) => match value {
            Value::Nil | Value::Iface(_) => value,
            concrete => Value::Iface(Box::new(IfaceVal { typ, val: concrete })),
        },
        None => value,
    }
}

// ---- lvalue plans ----

/// One step along a location path.
#[derive(Clone, Debug)]
pub enum Step {
    /// Struct field with a constant index.
    Field(usize),
    /// Array element; index read from a frame slot, bounds-checked against
    /// the array length.
    Index { slot: usize, len: usize },
    /// Follow the pointer found at this point.
    Deref,
    /// Index into the slice found at this point.
    SliceIndex { slot: usize },
}

/// An assignable (or addressable) location, planned at CFG time.
#[derive(Clone, Debug)]
pub enum Loc {
    /// Discard writes.
    Blank,
    Slot {
        level: usize,
        index: usize,
        steps: Vec<Step>,
    },
    /// Element of the slice held in `slice` at the index held in `index`.
    SliceElem {
        slice: usize,
        index: usize,
        steps: Vec<Step>,
    },
    /// Entry of the map held in `map` at the key held in `key`.
    MapElem { map: usize, key: usize },
    /// Through the pointer value held in `ptr`.
    Deref { ptr: usize, steps: Vec<Step> },
}

impl Loc {
    pub fn slot(level: usize, index: usize) -> Loc {
        Loc::Slot {
            level,
            index,
            steps: Vec::new(),
        }
    }
}

fn slot_int(frame: &Arc<Frame>, slot: usize) -> Result<i64, RuntimeError> {
    match frame.get(slot).concrete() {
        Value::Int(v) => Ok(v),
        Value::Uint(v) => Ok(v as i64),
        _ => Err(RuntimeError::internal("index slot holds a non-integer")),
    }
}

/// Resolves a location to a pointer. Map entries are not addressable and
/// are handled by the assignment actions directly.
pub fn resolve_ptr(frame: &Arc<Frame>, loc: &Loc) -> Result<PtrVal, RuntimeError> {
    let (mut ptr, steps) = match loc {
        Loc::Blank => return Err(RuntimeError::internal("address of blank location")),
        Loc::MapElem { .. } => return Err(RuntimeError::internal("address of map element")),
        Loc::Slot {
            level,
            index,
            steps,
        } => (PtrVal::slot(frame.ancestor(*level), *index), steps),
        Loc::SliceElem {
            slice,
            index,
            steps,
        } => {
            let idx = slot_int(frame, *index)?;
            match frame.get(*slice).concrete() {
                Value::Slice(s) => {
                    if idx < 0 || idx as usize >= s.len {
                        return Err(RuntimeError::OutOfBounds {
                            index: idx,
                            len: s.len,
                        });
                    }
                    (
                        PtrVal::slice_elem(s.arr.clone(), s.off + idx as usize),
                        steps,
                    )
                }
                Value::Nil => return Err(RuntimeError::NilDeref),
                _ => return Err(RuntimeError::internal("slice element of non-slice")),
            }
        }
        Loc::Deref { ptr, steps } => match frame.get(*ptr).concrete() {
            Value::Ptr(p) => (p, steps),
            Value::Nil => return Err(RuntimeError::NilDeref),
            _ => return Err(RuntimeError::internal("deref of non-pointer")),
        },
    };

    for step in steps {
        match step {
            Step::Field(idx) => ptr = ptr.child(PathStep::Elem(*idx)),
            Step::Index { slot, len } => {
                let idx = slot_int(frame, *slot)?;
                if idx < 0 || idx as usize >= *len {
                    return Err(RuntimeError::OutOfBounds {
                        index: idx,
                        len: *len,
                    });
                }
                ptr = ptr.child(PathStep::Elem(idx as usize));
            }
            Step::Deref => match ptr.load()? {
                Value::Ptr(p) => ptr = p,
                Value::Nil => return Err(RuntimeError::NilDeref),
                _ => return Err(RuntimeError::internal("deref of non-pointer")),
            },
            Step::SliceIndex { slot } => {
                let idx = slot_int(frame, *slot)?;
                match ptr.load()? {
                    Value::Slice(s) => {
                        if idx < 0 || idx as usize >= s.len {
                            return Err(RuntimeError::OutOfBounds {
                                index: idx,
                                len: s.len,
                            });
                        }
                        ptr = PtrVal::slice_elem(s.arr.clone(), s.off + idx as usize);
                    }
                    Value::Nil => return Err(RuntimeError::NilDeref),
                    _ => return Err(RuntimeError::internal("slice index of non-slice")),
                }
            }
        }
    }
    Ok(ptr)
}

/// Writes `value` to `loc`.
pub fn write_loc(frame: &Arc<Frame>, loc: &Loc, value: Value) -> Result<(), RuntimeError> {
    match loc {
        Loc::Blank => Ok(()),
        Loc::Slot {
            level,
            index,
            steps,
        } if steps.is_empty() => {
            frame.ancestor(*level).set(*index, value);
            Ok(())
        }
        Loc::MapElem { map, key } => {
            let key_val = frame.get(*key).concrete();
            match frame.get(*map).concrete() {
                Value::Map(m) => {
                    m.map.write().insert(key_val.to_key()?, value);
                    Ok(())
                }
                Value::Nil => Err(RuntimeError::Panicked {
                    value: Box::new(Value::str("assignment to entry in nil map")),
                }),
                _ => Err(RuntimeError::internal("map assignment to non-map")),
            }
        }
        other => resolve_ptr(frame, other)?.store(value),
    }
}

/// Reads the value at `loc`. `missing` is the zero value returned for an
/// absent map key.
pub fn read_loc(frame: &Arc<Frame>, loc: &Loc, missing: &Value) -> Result<Value, RuntimeError> {
    match loc {
        Loc::Blank => Ok(Value::Nil),
        Loc::Slot {
            level,
            index,
            steps,
        } if steps.is_empty() => Ok(frame.ancestor(*level).get(*index)),
        Loc::MapElem { map, key } => {
            let key_val = frame.get(*key).concrete();
            match frame.get(*map).concrete() {
                Value::Map(m) => Ok(m
                    .map
                    .read()
                    .get(&key_val.to_key()?)
                    .cloned()
                    .unwrap_or_else(|| missing.clone())),
                Value::Nil => Ok(missing.clone()),
                _ => Err(RuntimeError::internal("map read of non-map")),
            }
        }
        other => resolve_ptr(frame, other)?.load(),
    }
}

// ---- call protocol ----

/// Calls `callee` with `args`, returning its results. Frames are sized to
/// the callee's layout; defers drain at exit even under panic; `recover`
/// inside a deferred call consumes the pending panic.
pub fn call_value(
    ctx: &ExecCtx,
    callee: &Value,
    mut args: Vec<Value>,
) -> Result<Vec<Value>, RuntimeError> {
    match callee.clone().concrete() {
        Value::HostFn(host) => (host.call)(&args),
        Value::Func(func) => {
            if let Some(recv) = &func.recv {
                args.insert(0, (**recv).clone());
            }
            call_func(ctx, &func, args)
        }
        Value::Nil => Err(RuntimeError::NilDeref),
        _ => Err(RuntimeError::NotAFunction),
    }
}

fn call_func(ctx: &ExecCtx, func: &FuncVal, args: Vec<Value>) -> Result<Vec<Value>, RuntimeError> {
    let callee_ctx = ctx.with_unit(func.unit.clone());
    let def = callee_ctx.unit.node(func.node);
    let size = def.findex.unwrap_or(0);

    let frame = Frame::new(
        func.frame
            .clone()
            .or_else(|| Some(ctx.interp.global_frame())),
        size,
        ctx.run_id,
    );
    if let Some(zeros) = callee_ctx.unit.zeros.get(&func.node) {
        let mut data = frame.data.write();
        for (idx, zero) in zeros.iter().enumerate() {
            if idx < data.len() {
                data[idx] = zero.clone();
            }
        }
    }

    let (nres, first_param) = result_layout(&callee_ctx.unit, func.node);
    {
        let mut data = frame.data.write();
        for (idx, arg) in args.into_iter().enumerate() {
            let slot = first_param + idx;
            if slot < data.len() {
                data[slot] = arg;
            }
        }
    }

    let result = match def.start {
        Some(start) => run_cfg(&callee_ctx, start, &frame),
        None => Ok(()),
    };

    match drain_defers(&callee_ctx, &frame, result.err()) {
        Some(err) => Err(err),
        None => {
            let data = frame.data.read();
            Ok((0..nres).map(|i| data[i].clone()).collect())
        }
    }
}

/// Result count and first argument slot of a function definition node.
/// The frame layout is `[results][receiver?][params][locals...]`; a bound
/// receiver arrives as the leading argument.
fn result_layout(unit: &Unit, node: NodeId) -> (usize, usize) {
    let def = unit.node(node);
    match &def.kind {
        crate::node::NodeKind::FuncDecl { sig, .. } => (sig.results.len(), sig.results.len()),
        crate::node::NodeKind::FuncLitExpr { sig } => (sig.results.len(), sig.results.len()),
        _ => (0, 0),
    }
}

/// Runs the frame's deferred calls in reverse insertion order. Returns the
/// error still pending afterwards, if any.
fn drain_defers(
    ctx: &ExecCtx,
    frame: &Arc<Frame>,
    failure: Option<RuntimeError>,
) -> Option<RuntimeError> {
    let defers = frame.take_defers();
    if defers.is_empty() {
        return failure;
    }

    let mut pending = failure;
    if let Some(err) = &pending {
        if err.recoverable() {
            *frame.recovered.lock() = Some(err.panic_value());
        }
    }

    ctx.task.defer_frames.lock().push(frame.clone());
    for deferred in defers {
        match call_value(ctx, &deferred.callee, deferred.args) {
            Ok(_) => {}
            Err(err) => {
                // A panic raised by a deferred call replaces the pending
                // one; cancellation always wins.
                if err.recoverable() {
                    *frame.recovered.lock() = Some(err.panic_value());
                    pending = Some(err);
                } else {
                    ctx.task.defer_frames.lock().pop();
                    return Some(err);
                }
            }
        }
    }
    ctx.task.defer_frames.lock().pop();

    let still_pending = frame.recovered.lock().take();
    match (&pending, still_pending) {
        (Some(_), Some(_)) => pending,
        (Some(err), None) if !err.recoverable() => pending,
        _ => None,
    }
}

/// Consumes the innermost pending panic, if any. Implements `recover`.
pub fn take_recover(ctx: &ExecCtx) -> Value {
    let frames = ctx.task.defer_frames.lock();
    for frame in frames.iter().rev() {
        if let Some(value) = frame.recovered.lock().take() {
            return value;
        }
    }
    Value::Nil
}

/// Starts a concurrent task running `callee(args)`. The task owns a fresh
/// frame chain and defer stacks but shares the interpreter.
pub fn spawn_task(ctx: &ExecCtx, callee: Value, args: Vec<Value>) {
    let task_ctx = ExecCtx {
        interp: ctx.interp.clone(),
        unit: ctx.unit.clone(),
        task: Arc::new(TaskState::default()),
        run_id: ctx.run_id,
    };
    std::thread::spawn(move || {
        if let Err(err) = call_value(&task_ctx, &callee, args) {
            if !matches!(err, RuntimeError::Cancelled) {
                task_ctx.interp.write_err(&format!("task panic: {err}\n"));
            }
        }
    });
}

// ---- action generators ----

/// Boolean nodes wired with a false successor dispatch on their value.
fn branch(tnext: Option<NodeId>, fnext: Option<NodeId>, value: &Value) -> Option<NodeId> {
    match fnext {
        Some(_) if !value.as_bool().unwrap_or(false) => fnext,
        _ => tnext,
    }
}

pub fn gen_jump(tnext: Option<NodeId>) -> ExecFn {
    Arc::new(move |_, _| Ok(tnext))
}

pub fn gen_const(
    dest: usize,
    value: Value,
    tnext: Option<NodeId>,
    fnext: Option<NodeId>,
) -> ExecFn {
    Arc::new(move |_, frame| {
        frame.set(dest, value.clone());
        Ok(branch(tnext, fnext, &value))
    })
}

/// Copies a captured variable from an ancestor frame into a local slot.
pub fn gen_var_copy(
    dest: usize,
    level: usize,
    index: usize,
    tnext: Option<NodeId>,
    fnext: Option<NodeId>,
) -> ExecFn {
    Arc::new(move |_, frame| {
        let value = frame.ancestor(level).get(index);
        frame.set(dest, value.clone());
        Ok(branch(tnext, fnext, &value))
    })
}

pub fn gen_binary(
    op: BinFn,
    lhs: usize,
    rhs: usize,
    dest: usize,
    tnext: Option<NodeId>,
    fnext: Option<NodeId>,
) -> ExecFn {
    Arc::new(move |_, frame| {
        let a = frame.get(lhs).concrete();
        let b = frame.get(rhs).concrete();
        let value = op(&a, &b)?;
        frame.set(dest, value.clone());
        Ok(branch(tnext, fnext, &value))
    })
}

pub fn gen_unary(
    op: UnFn,
    operand: usize,
    dest: usize,
    tnext: Option<NodeId>,
    fnext: Option<NodeId>,
) -> ExecFn {
    Arc::new(move |_, frame| {
        let v = frame.get(operand).concrete();
        let value = op(&v)?;
        frame.set(dest, value.clone());
        Ok(branch(tnext, fnext, &value))
    })
}

pub fn gen_convert(conv: ConvFn, operand: usize, dest: usize, tnext: Option<NodeId>) -> ExecFn {
    Arc::new(move |_, frame| {
        let v = frame.get(operand).concrete();
        frame.set(dest, conv(&v)?);
        Ok(tnext)
    })
}

/// Reads a planned location into the node's slot.
pub fn gen_read_loc(
    loc: Loc,
    missing: Value,
    dest: usize,
    tnext: Option<NodeId>,
    fnext: Option<NodeId>,
) -> ExecFn {
    Arc::new(move |_, frame| {
        let value = read_loc(frame, &loc, &missing)?;
        frame.set(dest, value.clone());
        Ok(branch(tnext, fnext, &value))
    })
}

/// Indexes a string, yielding the byte value.
pub fn gen_index_string(subject: usize, index: usize, dest: usize, tnext: Option<NodeId>) -> ExecFn {
    Arc::new(move |_, frame| {
        let idx = slot_int(frame, index)?;
        match frame.get(subject).concrete() {
            Value::Str(s) => {
                let bytes = s.as_bytes();
                if idx < 0 || idx as usize >= bytes.len() {
                    return Err(RuntimeError::OutOfBounds {
                        index: idx,
                        len: bytes.len(),
                    });
                }
                frame.set(dest, Value::Uint(bytes[idx as usize] as u64));
                Ok(tnext)
            }
            _ => Err(RuntimeError::internal("string index of non-string")),
        }
    })
}

/// `s[low:high]` over slices, strings and addressable arrays.
pub fn gen_slice_expr(
    subject: usize,
    low: Option<usize>,
    high: Option<usize>,
    dest: usize,
    tnext: Option<NodeId>,
) -> ExecFn {
    Arc::new(move |_, frame| {
        let low_idx = match low {
            Some(slot) => slot_int(frame, slot)?.max(0) as usize,
            None => 0,
        };
        match frame.get(subject).concrete() {
            Value::Slice(s) => {
                let high_idx = match high {
                    Some(slot) => slot_int(frame, slot)?.max(0) as usize,
                    None => s.len,
                };
                match s.subslice(low_idx, high_idx) {
                    Some(sub) => {
                        frame.set(dest, Value::Slice(sub));
                        Ok(tnext)
                    }
                    None => Err(RuntimeError::SliceBounds {
                        low: low_idx,
                        high: high_idx,
                        cap: s.cap(),
                    }),
                }
            }
            Value::Str(s) => {
                let high_idx = match high {
                    Some(slot) => slot_int(frame, slot)?.max(0) as usize,
                    None => s.len(),
                };
                if low_idx > high_idx || high_idx > s.len() {
                    return Err(RuntimeError::SliceBounds {
                        low: low_idx,
                        high: high_idx,
                        cap: s.len(),
                    });
                }
                frame.set(dest, Value::str(&s[low_idx..high_idx]));
                Ok(tnext)
            }
            Value::Array(items) => {
                let high_idx = match high {
                    Some(slot) => slot_int(frame, slot)?.max(0) as usize,
                    None => items.len(),
                };
                if low_idx > high_idx || high_idx > items.len() {
                    return Err(RuntimeError::SliceBounds {
                        low: low_idx,
                        high: high_idx,
                        cap: items.len(),
                    });
                }
                frame.set(
                    dest,
                    Value::Slice(SliceVal::from_vec(items[low_idx..high_idx].to_vec())),
                );
                Ok(tnext)
            }
            Value::Nil => {
                let high_idx = match high {
                    Some(slot) => slot_int(frame, slot)?.max(0) as usize,
                    None => 0,
                };
                if low_idx == 0 && high_idx == 0 {
                    frame.set(dest, Value::Nil);
                    Ok(tnext)
                } else {
                    Err(RuntimeError::SliceBounds {
                        low: low_idx,
                        high: high_idx,
                        cap: 0,
                    })
                }
            }
            _ => Err(RuntimeError::internal("slice of unsupported value")),
        }
    })
}

/// Takes the address of a planned location.
pub fn gen_addr(loc: Loc, dest: usize, tnext: Option<NodeId>) -> ExecFn {
    Arc::new(move |_, frame| {
        let ptr = resolve_ptr(frame, &loc)?;
        frame.set(dest, Value::Ptr(ptr));
        Ok(tnext)
    })
}

/// Boxes a freshly evaluated composite into a cell: `&T{...}`.
pub fn gen_addr_of_value(src: usize, dest: usize, tnext: Option<NodeId>) -> ExecFn {
    Arc::new(move |_, frame| {
        let value = frame.get(src);
        frame.set(dest, Value::Ptr(PtrVal::cell(value)));
        Ok(tnext)
    })
}

/// One assignment target with the source slot and interface-boxing plan.
#[derive(Clone)]
pub struct AssignPlan {
    pub loc: Loc,
    pub src: usize,
    pub wrap: Option<TypeId>,
    /// Binary op for compound assignments (`+=`), applied as
    /// `loc = op(loc, src)`.
    pub op: Option<BinFn>,
}

pub fn gen_assign(plans: Vec<AssignPlan>, tnext: Option<NodeId>) -> ExecFn {
    Arc::new(move |_, frame| {
        // All sources were evaluated by the wiring; writes go left to
        // right after every source is read.
        let mut values = Vec::with_capacity(plans.len());
        for plan in &plans {
            let rhs = frame.get(plan.src);
            let value = match &plan.op {
                Some(op) => {
                    let old = read_loc(frame, &plan.loc, &Value::Nil)?.concrete();
                    op(&old, &rhs.concrete())?
                }
                None => coerce(rhs, plan.wrap),
            };
            values.push(value);
        }
        for (plan, value) in plans.iter().zip(values) {
            write_loc(frame, &plan.loc, value)?;
        }
        Ok(tnext)
    })
}

/// Comma-ok assignment sources: map index, channel receive, type
/// assertion.
#[derive(Clone)]
pub enum OkSource {
    MapIndex {
        map: usize,
        key: usize,
        missing: Value,
    },
    ChanRecv {
        chan: usize,
    },
    TypeAssert {
        src: usize,
        accept: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
        keep_iface: bool,
        missing: Value,
    },
}

pub fn gen_assign_ok(
    source: OkSource,
    value_loc: Loc,
    ok_loc: Loc,
    wrap: Option<TypeId>,
    tnext: Option<NodeId>,
) -> ExecFn {
    Arc::new(move |ctx, frame| {
        let (value, ok) = match &source {
            OkSource::MapIndex { map, key, missing } => {
                let key_val = frame.get(*key).concrete();
                match frame.get(*map).concrete() {
                    Value::Map(m) => match m.map.read().get(&key_val.to_key()?) {
                        Some(v) => (v.clone(), true),
                        None => (missing.clone(), false),
                    },
                    Value::Nil => (missing.clone(), false),
                    _ => return Err(RuntimeError::internal("map read of non-map")),
                }
            }
            OkSource::ChanRecv { chan } => match frame.get(*chan).concrete() {
                Value::Chan(ch) => match ch.recv(chan_cancel(ctx, frame).as_ref())? {
                    Some(v) => (v, true),
                    None => (Value::Nil, false),
                },
                Value::Nil => return block_on_nil_chan(ctx, frame),
                _ => return Err(RuntimeError::internal("receive from non-channel")),
            },
            OkSource::TypeAssert {
                src,
                accept,
                keep_iface,
                missing,
            } => {
                let subject = frame.get(*src);
                if !subject.is_nil() && accept(&subject) {
                    let v = if *keep_iface {
                        subject
                    } else {
                        subject.concrete()
                    };
                    (v, true)
                } else {
                    (missing.clone(), false)
                }
            }
        };
        write_loc(frame, &value_loc, coerce(value, wrap))?;
        write_loc(frame, &ok_loc, Value::Bool(ok))?;
        Ok(tnext)
    })
}

fn block_on_nil_chan<T>(ctx: &ExecCtx, frame: &Arc<Frame>) -> Result<T, RuntimeError> {
    // Operations on a nil channel block forever; under cancellation they
    // unwind, otherwise the task is deadlocked.
    match chan_cancel(ctx, frame) {
        Some(signal) => loop {
            if signal.is_closed() {
                return Err(RuntimeError::Cancelled);
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        },
        None => Err(RuntimeError::DeadLock),
    }
}

pub fn gen_recv(chan: usize, dest: usize, tnext: Option<NodeId>) -> ExecFn {
    Arc::new(move |ctx, frame| match frame.get(chan).concrete() {
        Value::Chan(ch) => {
            let value = ch.recv(chan_cancel(ctx, frame).as_ref())?.unwrap_or(Value::Nil);
            frame.set(dest, value);
            Ok(tnext)
        }
        Value::Nil => block_on_nil_chan(ctx, frame),
        _ => Err(RuntimeError::internal("receive from non-channel")),
    })
}

pub fn gen_send(chan: usize, value: usize, wrap: Option<TypeId>, tnext: Option<NodeId>) -> ExecFn {
    Arc::new(move |ctx, frame| {
        let v = coerce(frame.get(value), wrap);
        match frame.get(chan).concrete() {
            Value::Chan(ch) => {
                ch.send(v, chan_cancel(ctx, frame).as_ref())?;
                Ok(tnext)
            }
            Value::Nil => block_on_nil_chan(ctx, frame),
            _ => Err(RuntimeError::internal("send to non-channel")),
        }
    })
}

// ---- calls ----

#[derive(Clone)]
pub enum Callee {
    /// Callable value read from a slot.
    Slot { slot: usize },
    /// Method: receiver plan plus either a static target or a dynamic
    /// (interface) lookup by name.
    Method {
        recv: Loc,
        recv_is_ptr: bool,
        want_ptr: bool,
        name: String,
        target: Option<(usize, NodeId)>,
    },
}

#[derive(Clone)]
pub struct CallPlan {
    pub callee: Callee,
    /// Argument slots with their interface-boxing plans.
    pub args: Vec<(usize, Option<TypeId>)>,
    /// Variadic callees: the fixed parameter count; the argument tail
    /// packs into a slice unless `spread` passes one through.
    pub pack_from: Option<usize>,
    pub spread: bool,
    pub dest: usize,
    pub nret: usize,
}

impl CallPlan {
    fn collect_args(&self, frame: &Arc<Frame>) -> Vec<Value> {
        let mut args: Vec<Value> = Vec::with_capacity(self.args.len());
        for (slot, wrap) in &self.args {
            args.push(coerce(frame.get(*slot), *wrap));
        }
        if let Some(fixed) = self.pack_from {
            if !self.spread {
                let tail: Vec<Value> = args.split_off(fixed.min(args.len()));
                args.push(Value::Slice(SliceVal::from_vec(tail)));
            }
        }
        args
    }

    /// Resolves the callee into a callable value, binding method
    /// receivers.
    fn resolve_callee(&self, ctx: &ExecCtx, frame: &Arc<Frame>) -> Result<Value, RuntimeError> {
        match &self.callee {
            Callee::Slot { slot } => Ok(frame.get(*slot)),
            Callee::Method {
                recv,
                recv_is_ptr,
                want_ptr,
                name,
                target,
            } => match target {
                Some((unit_idx, node)) => {
                    let recv_value = if *want_ptr && !*recv_is_ptr {
                        Value::Ptr(resolve_ptr(frame, recv)?)
                    } else {
                        let v = read_loc(frame, recv, &Value::Nil)?;
                        if !*want_ptr && *recv_is_ptr {
                            match v.concrete() {
                                Value::Ptr(p) => p.load()?,
                                Value::Nil => return Err(RuntimeError::NilDeref),
                                other => other,
                            }
                        } else {
                            v
                        }
                    };
                    Ok(Value::Func(FuncVal {
                        unit: ctx.interp.unit(*unit_idx),
                        node: *node,
                        frame: Some(ctx.interp.global_frame()),
                        recv: Some(Box::new(recv_value)),
                    }))
                }
                None => {
                    // Interface dispatch on the dynamic type.
                    let subject = read_loc(frame, recv, &Value::Nil)?;
                    let (typ, inner) = match &subject {
                        Value::Iface(b) => (b.typ, b.val.clone()),
                        Value::Nil => return Err(RuntimeError::NilDeref),
                        Value::Struct(s) => (s.typ, subject.clone()),
                        _ => {
                            return Err(RuntimeError::MissingMethod { name: name.clone() });
                        }
                    };
                    let (func, path) = resolve_method(ctx, typ, name)?;
                    Ok(Value::Func(FuncVal {
                        recv: Some(Box::new(walk_promotion(inner, &path)?)),
                        ..func
                    }))
                }
            },
        }
    }
}

fn resolve_method(
    ctx: &ExecCtx,
    typ: TypeId,
    name: &str,
) -> Result<(FuncVal, Vec<usize>), RuntimeError> {
    let globals = ctx.interp.globals();
    let selected = globals
        .types
        .select(typ, name)
        .map_err(|_| RuntimeError::MissingMethod {
            name: name.to_string(),
        })?;
    match selected {
        Selected::Method { path, sym } => {
            let symbol = globals.scopes.sym(sym);
            let (unit_idx, node) = symbol.node.ok_or_else(|| RuntimeError::MissingMethod {
                name: name.to_string(),
            })?;
            drop(globals);
            Ok((
                FuncVal {
                    unit: ctx.interp.unit(unit_idx),
                    node,
                    frame: Some(ctx.interp.global_frame()),
                    recv: None,
                },
                path,
            ))
        }
        Selected::Field { .. } => Err(RuntimeError::MissingMethod {
            name: name.to_string(),
        }),
    }
}

fn walk_promotion(mut value: Value, path: &[usize]) -> Result<Value, RuntimeError> {
    for idx in path {
        value = match value.concrete() {
            Value::Struct(s) => s.fields.get(*idx).cloned().ok_or(RuntimeError::NilDeref)?,
            Value::Ptr(p) => match p.load()? {
                Value::Struct(s) => s.fields.get(*idx).cloned().ok_or(RuntimeError::NilDeref)?,
                _ => return Err(RuntimeError::NilDeref),
            },
            _ => return Err(RuntimeError::NilDeref),
        };
    }
    Ok(value)
}

pub fn gen_call(plan: CallPlan, tnext: Option<NodeId>) -> ExecFn {
    Arc::new(move |ctx, frame| {
        let args = plan.collect_args(frame);
        let callee = plan.resolve_callee(ctx, frame)?;
        let results = call_value(ctx, &callee, args)?;
        let mut data = frame.data.write();
        for (idx, value) in results.into_iter().take(plan.nret).enumerate() {
            let slot = plan.dest + idx;
            if slot < data.len() {
                data[slot] = value;
            }
        }
        Ok(tnext)
    })
}

/// `go f(args)`: arguments are evaluated in the caller, the call runs on a
/// new task.
pub fn gen_go(plan: CallPlan, tnext: Option<NodeId>) -> ExecFn {
    Arc::new(move |ctx, frame| {
        let args = plan.collect_args(frame);
        let callee = plan.resolve_callee(ctx, frame)?;
        spawn_task(ctx, callee, args);
        Ok(tnext)
    })
}

/// `defer f(args)`: records the callable and its evaluated arguments on
/// the frame's defer stack.
pub fn gen_defer(plan: CallPlan, tnext: Option<NodeId>) -> ExecFn {
    Arc::new(move |ctx, frame| {
        let args = plan.collect_args(frame);
        let callee = plan.resolve_callee(ctx, frame)?;
        frame.push_defer(Deferred { callee, args });
        Ok(tnext)
    })
}

/// Writes return values to the frame's result slots and leaves the CFG.
pub fn gen_return(sources: Vec<(usize, Option<TypeId>)>) -> ExecFn {
    Arc::new(move |_, frame| {
        let values: Vec<Value> = sources
            .iter()
            .map(|(slot, wrap)| coerce(frame.get(*slot), *wrap))
            .collect();
        let mut data = frame.data.write();
        for (idx, value) in values.into_iter().enumerate() {
            if idx < data.len() {
                data[idx] = value;
            }
        }
        Ok(None)
    })
}

/// Defines a function: stores its value into the declaring slot. Methods
/// have no slot; their symbol records the definition node instead.
pub fn gen_func_decl(
    node: NodeId,
    level: usize,
    index: Option<usize>,
    tnext: Option<NodeId>,
) -> ExecFn {
    Arc::new(move |ctx, frame| {
        if let Some(index) = index {
            let value = Value::Func(FuncVal {
                unit: ctx.unit.clone(),
                node,
                frame: Some(frame.ancestor(level)),
                recv: None,
            });
            frame.ancestor(level).set(index, value);
        }
        Ok(tnext)
    })
}

/// A function literal: captures the current frame.
pub fn gen_func_lit(node: NodeId, dest: usize, tnext: Option<NodeId>) -> ExecFn {
    Arc::new(move |ctx, frame| {
        frame.set(
            dest,
            Value::Func(FuncVal {
                unit: ctx.unit.clone(),
                node,
                frame: Some(frame.clone()),
                recv: None,
            }),
        );
        Ok(tnext)
    })
}

// ---- composites ----

#[derive(Clone)]
pub enum CompositePlan {
    Struct {
        typ: TypeId,
        /// (field index, source slot, wrap).
        elems: Vec<(usize, usize, Option<TypeId>)>,
        zeros: Vec<Value>,
    },
    Array {
        len: usize,
        elems: Vec<(usize, usize, Option<TypeId>)>,
        zero: Value,
    },
    Slice {
        elems: Vec<(usize, usize, Option<TypeId>)>,
        zero: Value,
    },
    Map {
        /// (key slot, value slot, wrap).
        pairs: Vec<(usize, usize, Option<TypeId>)>,
    },
}

pub fn gen_composite(plan: CompositePlan, dest: usize, tnext: Option<NodeId>) -> ExecFn {
    Arc::new(move |_, frame| {
        let value = match &plan {
            CompositePlan::Struct { typ, elems, zeros } => {
                let mut fields = zeros.clone();
                for (field, slot, wrap) in elems {
                    if *field < fields.len() {
                        fields[*field] = coerce(frame.get(*slot), *wrap);
                    }
                }
                Value::Struct(StructVal { typ: *typ, fields })
            }
            CompositePlan::Array { len, elems, zero } => {
                let mut items = vec![zero.clone(); *len];
                for (idx, slot, wrap) in elems {
                    if *idx < items.len() {
                        items[*idx] = coerce(frame.get(*slot), *wrap);
                    }
                }
                Value::Array(items)
            }
            CompositePlan::Slice { elems, zero } => {
                let len = elems.iter().map(|(i, _, _)| i + 1).max().unwrap_or(0);
                let mut items = vec![zero.clone(); len];
                for (idx, slot, wrap) in elems {
                    items[*idx] = coerce(frame.get(*slot), *wrap);
                }
                Value::Slice(SliceVal::from_vec(items))
            }
            CompositePlan::Map { pairs } => {
                let map = crate::value::MapVal::new();
                {
                    let mut inner = map.map.write();
                    for (key, value, wrap) in pairs {
                        let k = frame.get(*key).concrete().to_key()?;
                        inner.insert(k, coerce(frame.get(*value), *wrap));
                    }
                }
                Value::Map(map)
            }
        };
        frame.set(dest, value);
        Ok(tnext)
    })
}

// ---- type assertions ----

/// Single-result type assertion: panics on mismatch.
pub fn gen_type_assert(
    src: usize,
    accept: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
    want: String,
    got_desc: Arc<dyn Fn(&Value) -> String + Send + Sync>,
    keep_iface: bool,
    dest: usize,
    tnext: Option<NodeId>,
) -> ExecFn {
    Arc::new(move |_, frame| {
        let subject = frame.get(src);
        if subject.is_nil() || !accept(&subject) {
            return Err(RuntimeError::AssertFailed {
                want: want.clone(),
                got: got_desc(&subject),
            });
        }
        let value = if keep_iface {
            subject
        } else {
            subject.concrete()
        };
        frame.set(dest, value);
        Ok(tnext)
    })
}

/// One arm of a type switch: `accept` yields the value to bind when the
/// subject's dynamic type matches.
pub fn gen_type_test(
    src: usize,
    accept: Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>,
    bind: Option<usize>,
    tnext: Option<NodeId>,
    fnext: Option<NodeId>,
) -> ExecFn {
    Arc::new(move |_, frame| {
        let subject = frame.get(src);
        match accept(&subject) {
            Some(value) => {
                if let Some(slot) = bind {
                    frame.set(slot, value);
                }
                Ok(tnext)
            }
            None => Ok(fnext),
        }
    })
}

/// A method value expression `x.m`: binds the receiver now, calls later.
pub fn gen_method_value(
    recv: Loc,
    recv_is_ptr: bool,
    want_ptr: bool,
    name: String,
    target: Option<(usize, NodeId)>,
    dest: usize,
    tnext: Option<NodeId>,
) -> ExecFn {
    Arc::new(move |ctx, frame| {
        let value = match target {
            Some((unit_idx, node)) => {
                let recv_value = if want_ptr && !recv_is_ptr {
                    Value::Ptr(resolve_ptr(frame, &recv)?)
                } else {
                    let v = read_loc(frame, &recv, &Value::Nil)?;
                    if !want_ptr && recv_is_ptr {
                        match v.concrete() {
                            Value::Ptr(p) => p.load()?,
                            Value::Nil => return Err(RuntimeError::NilDeref),
                            other => other,
                        }
                    } else {
                        v
                    }
                };
                Value::Func(FuncVal {
                    unit: ctx.interp.unit(unit_idx),
                    node,
                    frame: Some(ctx.interp.global_frame()),
                    recv: Some(Box::new(recv_value)),
                })
            }
            None => {
                let subject = read_loc(frame, &recv, &Value::Nil)?;
                let (typ, inner) = match &subject {
                    Value::Iface(b) => (b.typ, b.val.clone()),
                    Value::Nil => return Err(RuntimeError::NilDeref),
                    Value::Struct(s) => (s.typ, subject.clone()),
                    _ => return Err(RuntimeError::MissingMethod { name: name.clone() }),
                };
                let (func, path) = resolve_method(ctx, typ, &name)?;
                Value::Func(FuncVal {
                    recv: Some(Box::new(walk_promotion(inner, &path)?)),
                    ..func
                })
            }
        };
        frame.set(dest, value);
        Ok(tnext)
    })
}

// ---- select ----

#[derive(Clone)]
pub enum CommPlan {
    Send {
        chan: usize,
        value: usize,
        wrap: Option<TypeId>,
    },
    Recv {
        chan: usize,
        value_loc: Option<Loc>,
        ok_loc: Option<Loc>,
    },
    Default,
}

#[derive(Clone)]
pub struct SelectCasePlan {
    pub comm: CommPlan,
    pub body: Option<NodeId>,
}

pub fn gen_select(cases: Vec<SelectCasePlan>, tnext: Option<NodeId>) -> ExecFn {
    Arc::new(move |ctx, frame| {
        let mut ops = Vec::new();
        let mut op_cases = Vec::new();
        let mut default_case: Option<&SelectCasePlan> = None;
        for case in &cases {
            match &case.comm {
                CommPlan::Send { chan, value, wrap } => match frame.get(*chan).concrete() {
                    Value::Chan(ch) => {
                        ops.push(SelectOp::Send {
                            chan: ch,
                            value: coerce(frame.get(*value), *wrap),
                        });
                        op_cases.push(case);
                    }
                    // A nil channel case never becomes ready.
                    Value::Nil => continue,
                    _ => return Err(RuntimeError::internal("select send on non-channel")),
                },
                CommPlan::Recv { chan, .. } => match frame.get(*chan).concrete() {
                    Value::Chan(ch) => {
                        ops.push(SelectOp::Recv { chan: ch });
                        op_cases.push(case);
                    }
                    Value::Nil => continue,
                    _ => return Err(RuntimeError::internal("select receive on non-channel")),
                },
                CommPlan::Default => default_case = Some(case),
            }
        }

        if ops.is_empty() && default_case.is_none() {
            return block_on_nil_chan(ctx, frame);
        }

        let picked = channel::select(
            &ops,
            default_case.is_some(),
            chan_cancel(ctx, frame).as_ref(),
        )?;
        match picked {
            Some((idx, ready)) => {
                let case = op_cases[idx];
                if let (
                    CommPlan::Recv {
                        value_loc, ok_loc, ..
                    },
                    SelectReady::Received(received),
                ) = (&case.comm, ready)
                {
                    let ok = received.is_some();
                    if let Some(loc) = value_loc {
                        write_loc(frame, loc, received.unwrap_or(Value::Nil))?;
                    }
                    if let Some(loc) = ok_loc {
                        write_loc(frame, loc, Value::Bool(ok))?;
                    }
                }
                Ok(case.body.or(tnext))
            }
            None => Ok(default_case.and_then(|c| c.body).or(tnext)),
        }
    })
}

// ---- range ----

#[derive(Clone)]
pub enum RangePlan {
    /// Slices, arrays and strings: iterate by index (byte offsets and
    /// runes for strings).
    Indexed {
        subject: usize,
        state: usize,
        key_loc: Option<Loc>,
        value_loc: Option<Loc>,
    },
    Map {
        subject: usize,
        state: usize,
        keys: usize,
        key_loc: Option<Loc>,
        value_loc: Option<Loc>,
    },
    Chan {
        subject: usize,
        key_loc: Option<Loc>,
    },
}

/// Resets range state; wired between the subject expression and the range
/// header so re-entering the loop restarts iteration.
pub fn gen_range_init(plan: RangePlan, tnext: Option<NodeId>) -> ExecFn {
    Arc::new(move |_, frame| {
        match &plan {
            RangePlan::Indexed { state, .. } => frame.set(*state, Value::Int(0)),
            RangePlan::Map {
                state,
                keys,
                subject,
                ..
            } => {
                frame.set(*state, Value::Int(0));
                let snapshot: Vec<Value> = match frame.get(*subject).concrete() {
                    Value::Map(m) => m.map.read().keys().map(key_to_value).collect(),
                    _ => Vec::new(),
                };
                frame.set(*keys, Value::Slice(SliceVal::from_vec(snapshot)));
            }
            RangePlan::Chan { .. } => {}
        }
        Ok(tnext)
    })
}

pub fn key_to_value(key: &crate::value::MapKey) -> Value {
    use crate::value::MapKey;
    match key {
        MapKey::Nil => Value::Nil,
        MapKey::Bool(b) => Value::Bool(*b),
        MapKey::Int(v) => Value::Int(*v),
        MapKey::Uint(v) => Value::Uint(*v),
        MapKey::Float(bits) => Value::Float(f64::from_bits(*bits)),
        MapKey::Complex(re, im) => Value::Complex(crate::value::Complex::new(
            f64::from_bits(*re),
            f64::from_bits(*im),
        )),
        MapKey::Str(s) => Value::Str(s.clone()),
        // Identity keys cannot be rebuilt into standalone values.
        MapKey::Addr(_) | MapKey::Iface(..) | MapKey::Composite(_) => Value::Nil,
    }
}

pub fn gen_range(plan: RangePlan, body: Option<NodeId>, exit: Option<NodeId>) -> ExecFn {
    Arc::new(move |ctx, frame| match &plan {
        RangePlan::Indexed {
            subject,
            state,
            key_loc,
            value_loc,
        } => {
            let idx = slot_int(frame, *state)?;
            match frame.get(*subject).concrete() {
                Value::Slice(s) => {
                    if (idx as usize) >= s.len {
                        return Ok(exit);
                    }
                    if let Some(loc) = key_loc {
                        write_loc(frame, loc, Value::Int(idx))?;
                    }
                    if let Some(loc) = value_loc {
                        let v = s.get(idx as usize).unwrap_or(Value::Nil);
                        write_loc(frame, loc, v)?;
                    }
                    frame.set(*state, Value::Int(idx + 1));
                    Ok(body)
                }
                Value::Array(items) => {
                    if (idx as usize) >= items.len() {
                        return Ok(exit);
                    }
                    if let Some(loc) = key_loc {
                        write_loc(frame, loc, Value::Int(idx))?;
                    }
                    if let Some(loc) = value_loc {
                        write_loc(frame, loc, items[idx as usize].clone())?;
                    }
                    frame.set(*state, Value::Int(idx + 1));
                    Ok(body)
                }
                Value::Str(s) => {
                    if (idx as usize) >= s.len() {
                        return Ok(exit);
                    }
                    let ch = s[idx as usize..].chars().next().unwrap_or('\u{fffd}');
                    if let Some(loc) = key_loc {
                        write_loc(frame, loc, Value::Int(idx))?;
                    }
                    if let Some(loc) = value_loc {
                        write_loc(frame, loc, Value::Int(ch as i64))?;
                    }
                    frame.set(*state, Value::Int(idx + ch.len_utf8() as i64));
                    Ok(body)
                }
                Value::Nil => Ok(exit),
                _ => Err(RuntimeError::internal("range over unsupported value")),
            }
        }
        RangePlan::Map {
            subject,
            state,
            keys,
            key_loc,
            value_loc,
        } => {
            let idx = slot_int(frame, *state)?;
            let keys_val = match frame.get(*keys).concrete() {
                Value::Slice(s) => s,
                _ => return Ok(exit),
            };
            let map = match frame.get(*subject).concrete() {
                Value::Map(m) => m,
                _ => return Ok(exit),
            };
            let mut cursor = idx as usize;
            loop {
                let Some(key) = keys_val.get(cursor) else {
                    return Ok(exit);
                };
                cursor += 1;
                let mk = key.to_key()?;
                // Entries deleted since the snapshot are skipped.
                let entry = map.map.read().get(&mk).cloned();
                if let Some(value) = entry {
                    if let Some(loc) = key_loc {
                        write_loc(frame, loc, key)?;
                    }
                    if let Some(loc) = value_loc {
                        write_loc(frame, loc, value)?;
                    }
                    frame.set(*state, Value::Int(cursor as i64));
                    return Ok(body);
                }
            }
        }
        RangePlan::Chan { subject, key_loc } => match frame.get(*subject).concrete() {
            Value::Chan(ch) => match ch.recv(chan_cancel(ctx, frame).as_ref())? {
                Some(value) => {
                    if let Some(loc) = key_loc {
                        write_loc(frame, loc, value)?;
                    }
                    Ok(body)
                }
                None => Ok(exit),
            },
            Value::Nil => block_on_nil_chan(ctx, frame),
            _ => Err(RuntimeError::internal("range over non-channel")),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerce_boxes_concrete_values_once() {
        let boxed = coerce(Value::Int(1), Some(crate::types::INT));
        assert!(matches!(boxed, Value::Iface(_)));
        let again = coerce(boxed.clone(), Some(crate::types::INT));
        assert!(matches!(again, Value::Iface(ref b) if !matches!(b.val, Value::Iface(_))));
        assert!(coerce(Value::Nil, Some(crate::types::INT)).is_nil());
    }

    #[test]
    fn write_and_read_loc_roundtrip_through_slots() {
        let frame = Frame::new(None, 3, 0);
        let loc = Loc::slot(0, 2);
        write_loc(&frame, &loc, Value::Int(9)).expect("write");
        let got = read_loc(&frame, &loc, &Value::Nil).expect("read");
        assert!(got.equal(&Value::Int(9)));
    }

    #[test]
    fn nested_field_writes_mutate_in_place() {
        let frame = Frame::new(None, 1, 0);
        frame.set(
            0,
            Value::Struct(StructVal {
                typ: crate::types::INT,
                fields: vec![Value::Int(1), Value::Int(2)],
            }),
        );
        let loc = Loc::Slot {
            level: 0,
            index: 0,
            steps: vec![Step::Field(1)],
        };
        write_loc(&frame, &loc, Value::Int(20)).expect("write");
        match frame.get(0) {
            Value::Struct(s) => assert!(s.fields[1].equal(&Value::Int(20))),
            other => panic!("unexpected value: {other:?}"),
        }
    }
}
