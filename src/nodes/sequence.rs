use super::Statement;
use crate::command::{ExitStatus, StageIo};
use crate::interpreter::Interpreter;
use anyhow::Result;
use std::sync::Arc;

/// `first ; second`: runs `second` only if `first` succeeded.
#[derive(Debug)]
pub struct SequenceCommand {
    pub first: Arc<Statement>,
    pub second: Arc<Statement>,
}

impl SequenceCommand {
    pub async fn run(&self, interpreter: &Interpreter, io: StageIo) -> Result<ExitStatus> {
        let status = interpreter.eval(&self.first, io.clone()).await?;
        if status.is_error() {
            return Ok(status);
        }
        interpreter.eval(&self.second, io).await
    }
}
