#![forbid(unsafe_code)]

//! Skiff: an embeddable tree-walking interpreter for a statically-typed,
//! garbage-collected imperative scripting language with packages, structs,
//! interfaces, channel-based concurrency, deferred calls, panic/recover,
//! and first-class functions with closures.
//!
//! Source text goes through three stages: the front-end parses it into a
//! raw syntax tree which the annotator turns into a node arena; global
//! type analysis and the CFG builder resolve names, check types, allocate
//! frame slots and wire an executable control-flow graph; the executor
//! then walks that graph, one generated action closure per node.

/// Source spans and the interpreter's file set.
pub mod source;

mod ast;
mod lexer;
mod parser;

/// Type descriptors, assignability and conversion rules, method lookup.
pub mod types;

/// Lexical scopes, symbols and frame-index allocation.
pub mod scope;

/// The annotated node arena shared by analysis and execution.
pub mod node;

/// Global type analysis: fixed-point resolution of package declarations.
mod gta;

/// CFG construction: typing, slot allocation, action selection, wiring.
pub mod cfg;

/// Runtime values.
pub mod value;

/// Channels and the cancellation signal.
pub mod channel;

/// Per-activation frames with defer stacks and run ids.
pub mod frame;

/// The executor: CFG walking, calls, defers, panics, tasks.
pub mod exec;

/// Typed operator actions selected at CFG time.
mod ops;

/// Predeclared builtin functions.
mod builtins;

/// The host bridge: registering host packages, value marshalling,
/// wrappers.
pub mod host;

/// Debug graph dumps of the AST and CFG.
mod dot;

/// The interactive loop.
mod repl;

mod interp;

pub use host::{bridge_in, bridge_out, Exports, HostData, HostExport, HostType};
pub use interp::{CancelToken, Error, Interpreter, Options, DEFAULT_SOURCE_NAME};
pub use parser::ParseError;
pub use value::Value;
