//! The compiled command graph.
//!
//! A [`Program`] is a list of top-level [`Statement`]s. Each statement pairs a
//! [`CommandNode`] with the expansion plans of its arguments. The graph is
//! built once by the compiler and never changes afterwards, so it is shared
//! between tasks through `Arc`s.

mod lambda;
mod pipeline;
mod sequence;
mod wrapper;

pub use lambda::LambdaCommand;
pub use pipeline::PipelineCommand;
pub use sequence::SequenceCommand;
pub use wrapper::{CommandWrapperDecorator, run_wrapped};

use crate::command::Command;
use crate::resolvable::Resolvable;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct Program {
    pub statements: Vec<Arc<Statement>>,
}

#[derive(Debug)]
pub struct Statement {
    pub command: CommandNode,
    pub arguments: Vec<Resolvable>,
    /// Label attached to the errors of this statement, usually the command
    /// name. Empty for nodes the compiler made up (sequences, pipelines).
    pub location: String,
}

impl Statement {
    pub fn new(command: CommandNode, arguments: Vec<Resolvable>, location: impl Into<String>) -> Self {
        Self {
            command,
            arguments,
            location: location.into(),
        }
    }

    pub fn synthetic(command: CommandNode) -> Self {
        Self::new(command, Vec::new(), String::new())
    }
}

pub enum CommandNode {
    Leaf(Arc<dyn Command>),
    Pipeline(PipelineCommand),
    Sequence(SequenceCommand),
    Wrapped(CommandWrapperDecorator),
    Lambda(LambdaCommand),
}

impl fmt::Debug for CommandNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandNode::Leaf(command) => f.debug_tuple("Leaf").field(&command.name()).finish(),
            CommandNode::Pipeline(pipeline) => pipeline.fmt(f),
            CommandNode::Sequence(sequence) => sequence.fmt(f),
            CommandNode::Wrapped(wrapped) => wrapped.fmt(f),
            CommandNode::Lambda(lambda) => lambda.fmt(f),
        }
    }
}
