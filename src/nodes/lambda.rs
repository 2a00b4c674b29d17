use super::Statement;
use crate::command::{ExitStatus, StageIo};
use crate::env::Environment;
use crate::interpreter::Interpreter;
use anyhow::{Result, anyhow};
use std::sync::Arc;

/// `{ name -> command }`: runs `command` once per input record, with the
/// record's `name` field bound to the variable `name`.
#[derive(Debug)]
pub struct LambdaCommand {
    pub nested: Arc<Statement>,
    pub binding_key: String,
}

impl LambdaCommand {
    pub async fn run(&self, interpreter: &Interpreter, io: StageIo) -> Result<ExitStatus> {
        let env = interpreter.env();
        let mut status = ExitStatus::success();
        while let Some(record) = io.input.receive().await {
            let value = record
                .get(&self.binding_key)
                .ok_or_else(|| anyhow!("record has no field named '{}'", self.binding_key))?
                .to_string();

            let _restore = Rebind::new(env, &self.binding_key, value);
            // the nested command shares our streams and may read more records
            status = interpreter.eval(&self.nested, io.clone()).await?;
            if status.is_error() {
                break;
            }
        }
        Ok(status)
    }
}

/// Binds one variable until dropped, then puts back its previous value.
///
/// Only the bound key is touched, so stages running concurrently in the same
/// pipeline keep their own bindings.
struct Rebind {
    env: Arc<Environment>,
    key: String,
    previous: Option<String>,
}

impl Rebind {
    fn new(env: &Arc<Environment>, key: &str, value: String) -> Self {
        let previous = env.replace_var(key, Some(value));
        Self {
            env: env.clone(),
            key: key.to_string(),
            previous,
        }
    }
}

impl Drop for Rebind {
    fn drop(&mut self) {
        self.env.replace_var(&self.key, self.previous.take());
    }
}
