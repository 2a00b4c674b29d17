use super::Statement;
use crate::command::{
    BoxFuture, CommandContext, CommandWrapper, ExitStatus, HelpShown, WrapperCommand,
};
use anyhow::Result;
use std::fmt;
use std::sync::Arc;

/// `wrapper args { nested }`.
pub struct CommandWrapperDecorator {
    pub nested: Arc<Statement>,
    pub wrapper: Arc<dyn WrapperCommand>,
}

impl CommandWrapperDecorator {
    pub async fn run(&self, ctx: CommandContext) -> Result<ExitStatus> {
        self.wrapper.wrap(&self.nested, ctx).await
    }
}

impl fmt::Debug for CommandWrapperDecorator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandWrapperDecorator")
            .field("nested", &self.nested)
            .finish_non_exhaustive()
    }
}

impl<W: CommandWrapper> WrapperCommand for W {
    fn wrap<'a>(
        &'a self,
        nested: &'a Arc<Statement>,
        ctx: CommandContext,
    ) -> BoxFuture<'a, Result<ExitStatus>> {
        Box::pin(run_wrapped(self, nested, ctx))
    }
}

/// Runs `nested` inside the `before`/`retry`/`after` lifecycle of `wrapper`.
///
/// If `before` yields no resource the result is an error and neither `retry`
/// nor `after` is called; answering `--help` is a success. Otherwise `after`
/// runs exactly once, on the way out, whether the loop ended normally, with a
/// fault or by cancellation.
pub async fn run_wrapped<W: CommandWrapper>(
    wrapper: &W,
    nested: &Arc<Statement>,
    ctx: CommandContext,
) -> Result<ExitStatus> {
    let resource = match wrapper.before(&ctx).await {
        Ok(Some(resource)) => resource,
        Ok(None) => {
            ctx.report("resource not acquired").await?;
            return Ok(ExitStatus::error(1));
        }
        Err(e) if e.is::<HelpShown>() => return Ok(ExitStatus::success()),
        Err(e) => return Err(e),
    };
    let mut release = Release {
        wrapper,
        resource: Some(resource),
    };

    let mut status;
    loop {
        status = ctx.interpreter.eval(nested, ctx.io()).await?;
        let Some(resource) = release.resource.as_mut() else {
            break;
        };
        if !wrapper.retry(resource, status, &ctx).await? {
            break;
        }
    }
    Ok(status)
}

struct Release<'a, W: CommandWrapper> {
    wrapper: &'a W,
    resource: Option<W::Resource>,
}

impl<W: CommandWrapper> Drop for Release<'_, W> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.wrapper.after(resource);
        }
    }
}
