//! A small shell that compiles command lines into concurrent command graphs.
//!
//! Source text goes through the [`lexer`] and [`parser`] into a syntax tree,
//! which the [`Compiler`] turns into a [`Program`]: every command name is
//! resolved and every argument has an expansion plan before anything runs.
//! The [`Interpreter`] then runs each top-level statement under its own
//! [`Supervisor`](supervisor::Supervisor). Pipeline stages run as separate
//! tasks and exchange [`Record`]s through bounded channels.
//!
//! The public modules [`command`] and [`env`] expose the traits and types for
//! implementing your own commands and for working with the shell state.

pub mod ast;
pub mod builtin;
pub mod channel;
pub mod command;
pub mod compiler;
pub mod config;
pub mod env;
mod external;
pub mod interpreter;
pub mod lexer;
pub mod nodes;
pub mod parser;
pub mod record;
pub mod registry;
pub mod repl;
pub mod resolvable;
pub mod resolver;
pub mod supervisor;

pub use channel::ProducerClosed;
pub use command::{ExitStatus, Position, StageIo};
pub use compiler::{CompileError, Compiler};
pub use env::Environment;
pub use external::ExternalCommand;
pub use interpreter::{Interpreter, NoLineReader};
pub use nodes::Program;
pub use record::Record;
pub use registry::CommandRegistry;
