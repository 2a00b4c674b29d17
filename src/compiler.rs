//! Syntax tree to command graph.
//!
//! The compiler resolves every command name up front, decides how each
//! argument is expanded, and rejects the shapes the parser lets through:
//! unknown commands, wrapper/block mismatches, unclosed or empty blocks and
//! dangling pipes. Nothing of a [`Program`] runs unless all of it compiled.

use crate::ast::{self, Expansion, Span, StringPart, SyntaxTree, Word, WordPart};
use crate::command::ResolvedCommand;
use crate::env::Environment;
use crate::nodes::{
    CommandNode, CommandWrapperDecorator, LambdaCommand, PipelineCommand, Program,
    SequenceCommand, Statement,
};
use crate::parser::{self, ParsingError};
use crate::resolvable::Resolvable;
use crate::resolver::{AggregateResolver, CommandResolver};
use std::sync::Arc;
use thiserror::Error;

/// A static error, reported before anything runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}:{column}: {message}")]
pub struct CompileError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl CompileError {
    pub fn at(span: Span, message: impl Into<String>) -> Self {
        Self {
            line: span.line,
            column: span.column,
            message: message.into(),
        }
    }
}

impl From<ParsingError> for CompileError {
    fn from(e: ParsingError) -> Self {
        CompileError::at(e.span(), e.message())
    }
}

pub struct Compiler {
    resolver: Box<dyn CommandResolver>,
}

impl Compiler {
    pub fn new(resolver: impl CommandResolver + 'static) -> Self {
        Self {
            resolver: Box::new(resolver),
        }
    }

    /// Resolves names against the environment's registry, search path and
    /// current directory as they are right now.
    pub fn for_environment(env: &Environment) -> Self {
        Self::new(AggregateResolver::for_environment(env))
    }

    /// Parses and compiles a script or one interactive line.
    pub fn compile_source(&self, source: &str) -> Result<Program, CompileError> {
        let tree = parser::parse(source)?;
        self.compile(&tree)
    }

    pub fn compile(&self, tree: &SyntaxTree) -> Result<Program, CompileError> {
        let statements = tree
            .statements
            .iter()
            .map(|sequence| self.compile_sequence(sequence).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Program { statements })
    }

    /// `a ; b ; c` becomes `Sequence(a, Sequence(b, c))`.
    fn compile_sequence(&self, sequence: &ast::Sequence) -> Result<Statement, CompileError> {
        let mut pipelines = sequence
            .pipelines
            .iter()
            .map(|pipeline| self.compile_pipeline(pipeline))
            .collect::<Result<Vec<_>, _>>()?;
        let last = pipelines
            .pop()
            .ok_or_else(|| CompileError::at(Span::default(), "empty statement"))?;
        Ok(chain(pipelines, last))
    }

    fn compile_pipeline(&self, pipeline: &ast::Pipeline) -> Result<Statement, CompileError> {
        let mut stages = pipeline
            .stages
            .iter()
            .map(|stage| self.compile_stage(stage))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(span) = pipeline.dangling_pipe {
            return Err(CompileError::at(span, "unexpected trailing '|'"));
        }
        if stages.len() == 1 {
            if let Some(stage) = stages.pop() {
                return Ok(stage);
            }
        }
        Ok(Statement::synthetic(CommandNode::Pipeline(PipelineCommand {
            stages: stages.into_iter().map(Arc::new).collect(),
        })))
    }

    fn compile_stage(&self, stage: &ast::Stage) -> Result<Statement, CompileError> {
        match stage {
            ast::Stage::Command(command) => self.compile_command(command),
            ast::Stage::Lambda(lambda) => {
                if !lambda.closed {
                    return Err(CompileError::at(lambda.span, "missing closing '}'"));
                }
                let nested = self.compile_command(&lambda.body)?;
                Ok(Statement::synthetic(CommandNode::Lambda(LambdaCommand {
                    nested: Arc::new(nested),
                    binding_key: lambda.binding.clone(),
                })))
            }
        }
    }

    fn compile_command(&self, command: &ast::SimpleCommand) -> Result<Statement, CompileError> {
        let (head, rest) = command
            .words
            .split_first()
            .ok_or_else(|| CompileError::at(command.span, "expected a command"))?;
        let name = head.as_literal().ok_or_else(|| {
            CompileError::at(head.span, "command name can't contain expansions")
        })?;
        let resolved = self
            .resolver
            .try_resolve(&name)
            .ok_or_else(|| CompileError::at(head.span, format!("unknown command: {name}")))?;
        let arguments = rest.iter().map(plan).collect();

        let node = match (resolved, &command.block) {
            (ResolvedCommand::Plain(leaf), None) => CommandNode::Leaf(leaf),
            (ResolvedCommand::Plain(_), Some(block)) => {
                return Err(CompileError::at(
                    block.span,
                    format!("{name} does not accept a nested block"),
                ));
            }
            (ResolvedCommand::Wrapper(_), None) => {
                return Err(CompileError::at(
                    head.span,
                    format!("{name} is a command wrapper and needs a {{ block }}"),
                ));
            }
            (ResolvedCommand::Wrapper(wrapper), Some(block)) => {
                if !block.closed {
                    return Err(CompileError::at(block.span, "missing closing '}'"));
                }
                let nested = self.compile_block(&block.body, block.span)?;
                CommandNode::Wrapped(CommandWrapperDecorator {
                    nested: Arc::new(nested),
                    wrapper,
                })
            }
        };
        tracing::debug!(name, "compiled command");
        Ok(Statement::new(node, arguments, name))
    }

    /// The statements of a block run one after another, like `;`.
    fn compile_block(&self, body: &SyntaxTree, span: Span) -> Result<Statement, CompileError> {
        let mut statements = body
            .statements
            .iter()
            .map(|sequence| self.compile_sequence(sequence))
            .collect::<Result<Vec<_>, _>>()?;
        let last = statements
            .pop()
            .ok_or_else(|| CompileError::at(span, "empty block"))?;
        Ok(chain(statements, last))
    }
}

/// Right-nests `first.. ; last` into sequence nodes.
fn chain(first: Vec<Statement>, last: Statement) -> Statement {
    first.into_iter().rev().fold(last, |second, first| {
        Statement::synthetic(CommandNode::Sequence(SequenceCommand {
            first: Arc::new(first),
            second: Arc::new(second),
        }))
    })
}

/// Expansion plan of one argument word.
fn plan(word: &Word) -> Resolvable {
    match word.parts.as_slice() {
        [WordPart::Literal(text)] | [WordPart::SingleQuoted(text)] => {
            Resolvable::Constant(text.clone())
        }
        [WordPart::Expansion(expansion)] => expand(expansion),
        parts => Resolvable::Composite(parts.iter().flat_map(plan_part).collect()),
    }
}

fn plan_part(part: &WordPart) -> Vec<Resolvable> {
    match part {
        WordPart::Literal(text) | WordPart::SingleQuoted(text) => {
            vec![Resolvable::Constant(text.clone())]
        }
        WordPart::Expansion(expansion) => vec![expand(expansion)],
        WordPart::DoubleQuoted(pieces) => pieces
            .iter()
            .map(|piece| match piece {
                StringPart::Literal(text) => Resolvable::Constant(text.clone()),
                StringPart::Expansion(expansion) => expand(expansion),
            })
            .collect(),
    }
}

fn expand(expansion: &Expansion) -> Resolvable {
    match &expansion.fallback {
        Some(fallback) => Resolvable::VariableOrFallback {
            name: expansion.name.clone(),
            fallback: fallback.clone(),
        },
        None => Resolvable::Variable(expansion.name.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Variables;
    use crate::registry::CommandRegistry;
    use crate::resolver::BuiltinResolver;

    fn compiler() -> Compiler {
        Compiler::new(BuiltinResolver::new(Arc::new(
            CommandRegistry::with_builtins(),
        )))
    }

    fn compile_err(source: &str) -> CompileError {
        compiler().compile_source(source).unwrap_err()
    }

    #[test]
    fn test_unknown_command_reports_line() {
        let err = compile_err("echo ok\n\nbadcmd arg");
        assert_eq!((err.line, err.column), (3, 1));
        assert!(err.message.contains("unknown command"), "{err}");
        assert!(err.to_string().starts_with("line 3:1"));
    }

    #[test]
    fn test_unknown_command_inside_pipeline_and_block() {
        assert_eq!(compile_err("seq 3 | nope").column, 9);
        assert_eq!(compile_err("retry 2 { echo a; nope }").column, 19);
    }

    #[test]
    fn test_wrapper_block_mismatch() {
        assert!(compile_err("retry 3").message.contains("is a command wrapper"));
        assert!(
            compile_err("echo a { true }")
                .message
                .contains("does not accept a nested block")
        );
    }

    #[test]
    fn test_malformed_blocks() {
        assert_eq!(compile_err("retry 3 { true").message, "missing closing '}'");
        assert_eq!(compile_err("retry 3 { }").message, "empty block");
        assert_eq!(compile_err("seq 3 | { value -> echo").message, "missing closing '}'");
    }

    #[test]
    fn test_trailing_pipe_is_a_compile_error() {
        let err = compile_err("seq 3 | ");
        assert_eq!(err.message, "unexpected trailing '|'");
        assert_eq!((err.line, err.column), (1, 7));
    }

    #[test]
    fn test_parse_errors_keep_their_position() {
        let err = compile_err("echo 'open");
        assert_eq!((err.line, err.column), (1, 6));
    }

    #[test]
    fn test_graph_shapes() {
        let program = compiler()
            .compile_source("echo a; echo b; echo c\nseq 3 | take 1 | count")
            .unwrap();
        assert_eq!(program.statements.len(), 2);

        let CommandNode::Sequence(outer) = &program.statements[0].command else {
            panic!("expected a sequence");
        };
        assert_eq!(outer.first.location, "echo");
        assert!(matches!(outer.second.command, CommandNode::Sequence(_)));
        assert!(program.statements[0].location.is_empty());

        let CommandNode::Pipeline(pipeline) = &program.statements[1].command else {
            panic!("expected a pipeline");
        };
        let names: Vec<_> = pipeline.stages.iter().map(|s| s.location.as_str()).collect();
        assert_eq!(names, vec!["seq", "take", "count"]);
    }

    #[test]
    fn test_argument_plans() {
        let program = compiler()
            .compile_source(r#"echo plain 'raw ${X}' ${X} ${Y!none} "a${X}b" pre${X}"#)
            .unwrap();
        let arguments = &program.statements[0].arguments;
        assert_eq!(arguments[0], Resolvable::Constant("plain".to_string()));
        assert_eq!(arguments[1], Resolvable::Constant("raw ${X}".to_string()));
        assert_eq!(arguments[2], Resolvable::Variable("X".to_string()));
        assert_eq!(
            arguments[3],
            Resolvable::VariableOrFallback {
                name: "Y".to_string(),
                fallback: "none".to_string()
            }
        );

        let variables: Variables = [("X".to_string(), "1".to_string())].into_iter().collect();
        assert_eq!(arguments[4].resolve(&variables).unwrap(), "a1b");
        assert_eq!(arguments[5].resolve(&variables).unwrap(), "pre1");
    }
}
