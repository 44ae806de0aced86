use crate::cfg::{self, CompileError};
use crate::channel::CancelSignal;
use crate::exec::{self, ExecCtx, RuntimeError, TaskState};
use crate::frame::Frame;
use crate::gta;
use crate::host::{self, BinPkgs, Exports, HostExport};
use crate::node::{self, Unit};
use crate::parser::{self, ParseError};
use crate::scope::{BuiltinId, ScopeId, ScopeStore, SymKind, Symbol};
use crate::source::{FileSet, Span};
use crate::types::{self, TypeStore};
use crate::value::{FuncVal, Value};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// The name used when no source file name was given to an eval.
pub const DEFAULT_SOURCE_NAME: &str = "_.skf";

const MAIN_ID: &str = "main";

/// The aggregated error type of the embedding API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Parse(#[from] ParseError),
    #[error("{0}")]
    Compile(#[from] CompileError),
    /// A panic that reached the top of the evaluation, with the host stack
    /// captured where it surfaced.
    #[error("{value}")]
    Panic { value: Value, stack: String },
    #[error("evaluation cancelled")]
    Cancelled,
    #[error("{0}")]
    Io(#[from] io::Error),
}

impl Error {
    fn from_runtime(err: RuntimeError) -> Error {
        match err {
            RuntimeError::Cancelled => Error::Cancelled,
            other => Error::Panic {
                value: other.panic_value(),
                stack: std::backtrace::Backtrace::force_capture().to_string(),
            },
        }
    }
}

/// A cancellation token for [`Interpreter::eval_with_context`]. Firing it
/// stops the associated evaluation at its next suspension point.
#[derive(Clone, Default)]
pub struct CancelToken {
    fired: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.fired.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

/// Interpreter creation options.
pub struct Options {
    /// Standard streams; default to the process streams.
    pub stdin: Option<Box<dyn Read + Send>>,
    pub stdout: Option<Box<dyn Write + Send>>,
    pub stderr: Option<Box<dyn Write + Send>>,
    /// Root directory searched for source package imports.
    pub source_root: Option<PathBuf>,
    /// Build constraint tags.
    pub build_tags: Vec<String>,
    /// Whether the input is interactive (REPL prompts). Defaults to
    /// terminal detection on the process stdin.
    pub tty: Option<bool>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            stdin: None,
            stdout: None,
            stderr: None,
            source_root: None,
            build_tags: Vec::new(),
            tty: None,
        }
    }
}

/// Analysis state shared by every evaluation of one interpreter, guarded
/// by a single readers-writer lock: type descriptors, scopes and symbols,
/// package tables, and the host-bridge registry.
pub struct Globals {
    pub types: TypeStore,
    pub scopes: ScopeStore,
    pub universe: ScopeId,
    /// Package-level scopes, keyed by import path.
    pub pkg_scopes: HashMap<String, ScopeId>,
    /// Package names, keyed by import path.
    pub pkg_names: HashMap<String, String>,
    pub bin_pkgs: BinPkgs,
}

impl Globals {
    fn new() -> Globals {
        let mut scopes = ScopeStore::new();
        let universe = scopes.enter(None, true, true);
        let mut globals = Globals {
            types: TypeStore::new(),
            scopes,
            universe,
            pkg_scopes: HashMap::new(),
            pkg_names: HashMap::new(),
            bin_pkgs: HashMap::new(),
        };
        globals.init_universe();
        globals
    }

    /// Declares the predefined types, constants and builtins.
    fn init_universe(&mut self) {
        let universe = self.universe;
        let mut declare_type = |name: &str, typ: types::TypeId, scopes: &mut ScopeStore| {
            let mut sym = Symbol::new(SymKind::Type, name, universe);
            sym.typ = Some(typ);
            let _ = scopes.declare(sym);
        };
        declare_type("bool", types::BOOL, &mut self.scopes);
        declare_type("int", types::INT, &mut self.scopes);
        declare_type("int8", types::INT8, &mut self.scopes);
        declare_type("int16", types::INT16, &mut self.scopes);
        declare_type("int32", types::INT32, &mut self.scopes);
        declare_type("int64", types::INT64, &mut self.scopes);
        declare_type("uint", types::UINT, &mut self.scopes);
        declare_type("uint8", types::UINT8, &mut self.scopes);
        declare_type("uint16", types::UINT16, &mut self.scopes);
        declare_type("uint32", types::UINT32, &mut self.scopes);
        declare_type("uint64", types::UINT64, &mut self.scopes);
        declare_type("uintptr", types::UINTPTR, &mut self.scopes);
        declare_type("float32", types::FLOAT32, &mut self.scopes);
        declare_type("float64", types::FLOAT64, &mut self.scopes);
        declare_type("complex64", types::COMPLEX64, &mut self.scopes);
        declare_type("complex128", types::COMPLEX128, &mut self.scopes);
        declare_type("string", types::STRING, &mut self.scopes);
        declare_type("error", types::ERROR, &mut self.scopes);
        declare_type("byte", types::UINT8, &mut self.scopes);
        declare_type("rune", types::INT32, &mut self.scopes);

        let mut declare_const = |name: &str, typ: types::TypeId, value: Value, scopes: &mut ScopeStore| {
            let mut sym = Symbol::new(SymKind::Const, name, universe);
            sym.typ = Some(typ);
            sym.value = Some(value);
            let _ = scopes.declare(sym);
        };
        declare_const("true", types::UNTYPED_BOOL, Value::Bool(true), &mut self.scopes);
        declare_const("false", types::UNTYPED_BOOL, Value::Bool(false), &mut self.scopes);
        declare_const("nil", types::UNTYPED_NIL, Value::Nil, &mut self.scopes);

        for builtin in BuiltinId::ALL {
            let mut sym = Symbol::new(SymKind::Builtin, builtin.name(), universe);
            sym.typ = Some(types::BUILTIN);
            sym.builtin = Some(builtin);
            let _ = self.scopes.declare(sym);
        }
    }
}

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Interpreter global resources and state. Shared by evaluations, tasks
/// and the REPL; the embedding handle [`Interpreter`] wraps it.
pub struct InterpCore {
    /// Run counter for cancellation; each frame captures it at creation
    /// and the executor compares per step. Kept first in the record.
    id: AtomicU64,

    pub ast_dot: bool,
    pub cfg_dot: bool,
    pub dot_cmd: String,
    pub no_run: bool,
    fast_chan: bool,
    /// Whether channel operations currently select against the done
    /// signal (enabled by cancellable evaluations unless `fast_chan`).
    cancel_chan: AtomicBool,

    name: Mutex<String>,
    /// Run id pinned by a cancellable invocation, used by the evaluation
    /// (possibly on another thread) instead of the live counter.
    pinned_run: Mutex<Option<u64>>,
    pub fset: Mutex<FileSet>,
    globals: RwLock<Globals>,
    units: RwLock<Vec<Arc<Unit>>>,
    global_frame: Arc<Frame>,
    done: Mutex<CancelSignal>,
    /// Source packages being imported, for cycle detection.
    importing: Mutex<HashMap<String, bool>>,

    stdin_tty: bool,
    stdin: Mutex<Option<Box<dyn Read + Send>>>,
    stdout: Sink,
    stderr: Sink,
    pub source_root: Option<PathBuf>,
    pub build_tags: Vec<String>,
}

impl InterpCore {
    fn new(options: Options) -> InterpCore {
        let env_flag = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false)
        };

        let stdin_tty = options.tty.unwrap_or_else(|| {
            use std::io::IsTerminal;
            options.stdin.is_none() && io::stdin().is_terminal()
        });
        let stdout: Sink = Arc::new(Mutex::new(match options.stdout {
            Some(w) => w,
            None => Box::new(io::stdout()),
        }));
        let stderr: Sink = Arc::new(Mutex::new(match options.stderr {
            Some(w) => w,
            None => Box::new(io::stderr()),
        }));

        InterpCore {
            id: AtomicU64::new(0),
            ast_dot: env_flag("AST_DOT"),
            cfg_dot: env_flag("CFG_DOT"),
            dot_cmd: std::env::var("DOT_CMD").unwrap_or_default(),
            no_run: env_flag("NO_RUN"),
            fast_chan: env_flag("FAST_CHAN"),
            cancel_chan: AtomicBool::new(false),
            name: Mutex::new(String::new()),
            pinned_run: Mutex::new(None),
            fset: Mutex::new(FileSet::new()),
            globals: RwLock::new(Globals::new()),
            units: RwLock::new(Vec::new()),
            global_frame: Frame::new(None, 0, 0),
            done: Mutex::new(CancelSignal::new()),
            importing: Mutex::new(HashMap::new()),
            stdin_tty,
            stdin: Mutex::new(options.stdin),
            stdout,
            stderr,
            source_root: options.source_root,
            build_tags: options.build_tags,
        }
    }

    /// A bare core for unit tests of runtime helpers.
    pub fn for_tests() -> Arc<InterpCore> {
        Arc::new(InterpCore::new(Options {
            stdout: Some(Box::new(io::sink())),
            stderr: Some(Box::new(io::sink())),
            ..Options::default()
        }))
    }

    pub fn runid(&self) -> u64 {
        self.id.load(Ordering::Acquire)
    }

    /// Stops the current evaluation: bumps the run id so every frame's
    /// per-step check fails, and closes the done signal so blocked channel
    /// operations unwind. Called once per cancellable evaluation.
    pub fn stop(&self) {
        self.id.fetch_add(1, Ordering::AcqRel);
        self.done.lock().close();
    }

    pub fn cancellable_chans(&self) -> bool {
        self.cancel_chan.load(Ordering::Acquire)
    }

    pub fn globals(&self) -> RwLockReadGuard<'_, Globals> {
        self.globals.read()
    }

    pub fn globals_mut(&self) -> RwLockWriteGuard<'_, Globals> {
        self.globals.write()
    }

    pub fn unit(&self, idx: usize) -> Arc<Unit> {
        self.units.read()[idx].clone()
    }

    pub fn unit_count(&self) -> usize {
        self.units.read().len()
    }

    pub fn global_frame(&self) -> Arc<Frame> {
        self.global_frame.clone()
    }

    pub fn done(&self) -> CancelSignal {
        self.done.lock().clone()
    }

    pub fn write_out(&self, text: &str) {
        let mut out = self.stdout.lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }

    pub fn write_err(&self, text: &str) {
        let mut out = self.stderr.lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }

    pub fn stdin_tty(&self) -> bool {
        self.stdin_tty
    }

    pub fn take_stdin(&self) -> Option<Box<dyn Read + Send>> {
        self.stdin.lock().take()
    }
}

/// An interpreter instance. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Interpreter {
    core: Arc<InterpCore>,
}

impl Interpreter {
    /// Creates a new interpreter. Debug and tuning switches are read from
    /// the environment: `AST_DOT`, `CFG_DOT`, `NO_RUN`, `FAST_CHAN`,
    /// `DOT_CMD`.
    pub fn new(options: Options) -> Interpreter {
        let interp = Interpreter {
            core: Arc::new(InterpCore::new(options)),
        };
        // The error-interface wrapper is always available to the bridge.
        let mut anonymous: HashMap<String, HostExport> = HashMap::new();
        anonymous.insert(
            "_error".to_string(),
            HostExport::Wrapper(host::error_wrapper()),
        );
        let mut exports = Exports::new();
        exports.insert(String::new(), anonymous);
        interp.use_exports(exports);
        interp
    }

    pub fn core(&self) -> &Arc<InterpCore> {
        &self.core
    }

    /// Evaluates a source string and returns the last expression's value.
    pub fn eval(&self, src: &str) -> Result<Value, Error> {
        self.eval_named(src, "", true)
    }

    /// Reads and evaluates the file at `path`.
    pub fn eval_path(&self, path: &str) -> Result<Value, Error> {
        let src = std::fs::read_to_string(path)?;
        self.eval_named(&src, path, false)
    }

    /// Evaluates with external cancellation: when `token` fires, the run
    /// id is bumped and the done signal closed, and the evaluation returns
    /// a cancellation error once every task observes it.
    pub fn eval_with_context(&self, token: &CancelToken, src: &str) -> Result<Value, Error> {
        // A token fired before the first byte is read cancels cleanly,
        // with no effect on the interpreter's registries.
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        {
            let core = &self.core;
            let fresh = CancelSignal::new();
            *core.done.lock() = fresh.clone();
            core.global_frame.set_done(fresh);
            core.cancel_chan
                .store(!core.fast_chan, Ordering::Release);
            *core.pinned_run.lock() = Some(core.runid());
        }

        let (tx, rx) = std::sync::mpsc::channel();
        let worker = {
            let interp = self.clone();
            let src = src.to_string();
            std::thread::spawn(move || {
                let _ = tx.send(interp.eval(&src));
            })
        };

        let result = loop {
            if token.is_cancelled() {
                self.core.stop();
                // The worker unwinds at its next suspension point.
                let _ = worker.join();
                // Resynchronise the global frame for future evaluations.
                self.core.global_frame.set_runid(self.core.runid());
                break Err(Error::Cancelled);
            }
            match rx.recv_timeout(std::time::Duration::from_millis(1)) {
                Ok(result) => {
                    let _ = worker.join();
                    break result;
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    break Err(Error::Cancelled)
                }
            }
        };
        *self.core.pinned_run.lock() = None;
        result
    }

    /// Loads host package symbols so interpreted code can use them.
    /// Registering the well-known `fmt` package redirects its print family
    /// to the interpreter's configured streams.
    pub fn use_exports(&self, exports: Exports) {
        let fix = exports.contains_key("fmt");
        {
            let mut globals = self.core.globals_mut();
            for (path, symbols) in exports {
                for (name, export) in symbols {
                    let resolved = host::resolve_export(&mut globals.types, &name, &export);
                    globals
                        .bin_pkgs
                        .entry(path.clone())
                        .or_default()
                        .insert(name, resolved);
                }
            }
        }
        if fix {
            host::fix_stdio(&self.core);
        }
    }

    /// Runs the interactive loop. See the `repl` module.
    pub fn repl(&self) -> Result<Value, Error> {
        crate::repl::run(self)
    }

    // ---- pipeline ----

    pub(crate) fn eval_named(
        &self,
        src: &str,
        name: &str,
        incremental: bool,
    ) -> Result<Value, Error> {
        let core = &self.core;
        {
            let mut cur = core.name.lock();
            if !name.is_empty() {
                *cur = name.to_string();
            }
            if cur.is_empty() {
                *cur = DEFAULT_SOURCE_NAME.to_string();
            }
        }
        let display_name = core.name.lock().clone();

        // Parse source to AST.
        let base = core.fset.lock().add(&display_name, src);
        let file = parser::parse(src, base)?;
        let _ = incremental;

        // Annotate the raw syntax into the node arena.
        let mut unit = Unit::new();
        let root = node::annotate(&mut unit, &file);

        if core.ast_dot {
            crate::dot::dump_ast(core, &unit, root, &display_name);
            if core.no_run {
                return Ok(Value::Nil);
            }
        }

        let pkg_name = file
            .package
            .as_ref()
            .map(|p| p.name.clone())
            .unwrap_or_else(|| MAIN_ID.to_string());

        // Resolve imports ahead of analysis: host packages come from the
        // bridge registry, source packages are evaluated recursively.
        self.load_imports(&file)?;

        let unit_idx = core.unit_count();
        let pkg_scope = {
            let mut globals = core.globals_mut();
            match globals.pkg_scopes.get(&pkg_name) {
                Some(scope) => *scope,
                None => {
                    let universe = globals.universe;
                    let scope = globals.scopes.enter(Some(universe), true, false);
                    globals.pkg_scopes.insert(pkg_name.clone(), scope);
                    globals.pkg_names.insert(pkg_name.clone(), pkg_name.clone());
                    scope
                }
            }
        };

        // Global type analysis, then CFG construction and action
        // generation.
        {
            let mut globals = core.globals_mut();
            gta::run(&mut globals, &mut unit, root, pkg_scope, unit_idx)?;
        }
        let output = {
            let mut globals = core.globals_mut();
            cfg::build(&mut globals, &mut unit, root, pkg_scope, core)
        };
        let output = match output {
            Ok(out) => out,
            Err(err) => {
                if core.cfg_dot {
                    crate::dot::dump_cfg(core, &unit, root, &display_name);
                }
                return Err(err.into());
            }
        };

        // Make the package visible under a path identical to its name.
        {
            let mut globals = core.globals_mut();
            if globals.scopes.lookup_local(globals.universe, &pkg_name).is_none() {
                let typ = globals.types.src_pkg(&pkg_name);
                let universe = globals.universe;
                let mut sym = Symbol::new(SymKind::Package, &pkg_name, universe);
                sym.typ = Some(typ);
                let _ = globals.scopes.declare(sym);
            }
        }

        if core.cfg_dot {
            crate::dot::dump_cfg(core, &unit, root, &display_name);
        }

        if core.no_run {
            return Ok(Value::Nil);
        }

        // Freeze the unit and size the global frame to the package layout.
        let unit = Arc::new(unit);
        core.units.write().push(unit.clone());
        let frame_len = {
            let globals = core.globals();
            globals.scopes.frame_len(globals.universe)
        };
        core.global_frame.resize(frame_len);
        let pinned = *core.pinned_run.lock();
        if pinned.is_none() {
            // Plain evaluations are not cancellable; clear the channel
            // select mode a previous cancellable invocation enabled.
            core.cancel_chan.store(false, Ordering::Release);
        }
        let run_id = pinned.unwrap_or_else(|| core.runid());
        core.global_frame.set_runid(run_id);

        // Execute: file chain (declarations and top-level statements),
        // then init functions, then main when a full program was given.
        let ctx = ExecCtx {
            interp: core.clone(),
            unit: unit.clone(),
            task: Arc::new(TaskState::default()),
            run_id,
        };
        let frame = core.global_frame();
        if let Some(start) = unit.node(root).start {
            exec::run_cfg(&ctx, start, &frame).map_err(Error::from_runtime)?;
        }
        for init in &output.init_nodes {
            let func = Value::Func(FuncVal {
                unit: unit.clone(),
                node: *init,
                frame: Some(frame.clone()),
                recv: None,
            });
            exec::call_value(&ctx, &func, Vec::new()).map_err(Error::from_runtime)?;
        }

        if file.package.is_some() {
            let main_sym = {
                let globals = core.globals();
                globals
                    .scopes
                    .lookup_local(pkg_scope, MAIN_ID)
                    .map(|sym| globals.scopes.sym(sym).clone())
            };
            if let Some(sym) = main_sym {
                if sym.kind == SymKind::Func {
                    if let Some((unit_idx, node_id)) = sym.node {
                        let func = Value::Func(FuncVal {
                            unit: core.unit(unit_idx),
                            node: node_id,
                            frame: Some(frame.clone()),
                            recv: None,
                        });
                        exec::call_value(&ctx, &func, Vec::new())
                            .map_err(Error::from_runtime)?;
                    }
                }
            }
        }

        let result = match output.result_slot {
            Some(slot) => frame.get(slot),
            None => Value::Nil,
        };
        Ok(result)
    }

    /// Resolves the file's imports: host packages must already be
    /// registered; source packages are parsed and evaluated from the
    /// source root, with import-cycle detection.
    fn load_imports(&self, file: &crate::ast::FileAst) -> Result<(), Error> {
        for import in &file.imports {
            let path = &import.path;
            {
                let globals = self.core.globals();
                if globals.bin_pkgs.contains_key(path) || globals.pkg_scopes.contains_key(path) {
                    continue;
                }
            }
            {
                let mut importing = self.core.importing.lock();
                if importing.get(path).copied().unwrap_or(false) {
                    return Err(Error::Compile(CompileError {
                        message: format!("import cycle not allowed: {path}"),
                        span: import.span,
                    }));
                }
                importing.insert(path.clone(), true);
            }
            let result = self.load_src_package(path, import.span);
            self.core.importing.lock().remove(path);
            result?;
        }
        Ok(())
    }

    fn load_src_package(&self, path: &str, span: Span) -> Result<(), Error> {
        let Some(root) = &self.core.source_root else {
            return Err(Error::Compile(CompileError {
                message: format!("package not found: {path}"),
                span,
            }));
        };
        let mut file = root.join(path);
        file.set_extension("skf");
        let candidate = if file.is_file() {
            file
        } else {
            let dir_file = root.join(path).join("pkg.skf");
            if dir_file.is_file() {
                dir_file
            } else {
                return Err(Error::Compile(CompileError {
                    message: format!("package not found: {path}"),
                    span,
                }));
            }
        };
        let src = std::fs::read_to_string(&candidate)?;
        self.eval_named(&src, &candidate.display().to_string(), false)?;

        // Key the package scope by import path as well as by name, so two
        // packages sharing a name do not collide on path lookups.
        let declared = parser::parse(&src, 0)
            .ok()
            .and_then(|f| f.package.map(|p| p.name));
        if let Some(name) = declared {
            let mut globals = self.core.globals_mut();
            if let Some(scope) = globals.pkg_scopes.get(&name).copied() {
                globals.pkg_scopes.insert(path.to_string(), scope);
                globals.pkg_names.insert(path.to_string(), name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_fires_once_and_stays_fired() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn universe_declares_types_constants_and_builtins() {
        let core = InterpCore::for_tests();
        let globals = core.globals();
        for name in ["bool", "int", "string", "error", "byte", "rune"] {
            assert!(
                globals.scopes.lookup(globals.universe, name).is_some(),
                "missing predeclared type {name}"
            );
        }
        for name in ["true", "false", "nil", "len", "append", "recover"] {
            assert!(
                globals.scopes.lookup(globals.universe, name).is_some(),
                "missing predeclared symbol {name}"
            );
        }
    }

    #[test]
    fn stop_bumps_the_run_id_and_closes_done() {
        let core = InterpCore::for_tests();
        let before = core.runid();
        let done = core.done();
        core.stop();
        assert_eq!(core.runid(), before + 1);
        assert!(done.is_closed());
    }
}
