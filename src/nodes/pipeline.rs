use super::Statement;
use crate::channel::{InputChannel, OutputChannel, PipelineChannel, ProducerClosed};
use crate::command::{ExitStatus, Position, StageIo};
use crate::interpreter::{Interpreter, report_fault};
use crate::supervisor::Supervisor;
use anyhow::Result;
use std::sync::Arc;

/// `a | b | c`: every stage runs as its own task, connected by channels.
#[derive(Debug)]
pub struct PipelineCommand {
    /// At least two stages, in source order.
    pub stages: Vec<Arc<Statement>>,
}

impl PipelineCommand {
    pub async fn run(&self, interpreter: &Interpreter, io: StageIo) -> Result<ExitStatus> {
        // the statement's own supervisor owns the interrupt handler
        let mut supervisor = Supervisor::without_signals();
        let last = self.stages.len().saturating_sub(1);

        let mut input = io.input.clone();
        let mut upstream: Option<Arc<PipelineChannel>> = None;
        for (i, stage) in self.stages.iter().enumerate() {
            let downstream = (i < last)
                .then(|| Arc::new(PipelineChannel::new(interpreter.channel_capacity())));
            let output: Arc<dyn OutputChannel> = match &downstream {
                Some(channel) => channel.clone(),
                None => io.output.clone(),
            };
            let position = Position::from_ends(
                i == 0 && io.position.inherits_input(),
                i == last && io.position.inherits_output(),
            );
            let stage_io = StageIo {
                input,
                output,
                error: io.error.clone(),
                position,
            };
            supervisor.submit(run_stage(
                interpreter.clone(),
                stage.clone(),
                stage_io,
                upstream.take(),
                downstream.clone(),
            ));

            input = match &downstream {
                Some(channel) => channel.clone() as Arc<dyn InputChannel>,
                None => io.input.clone(),
            };
            upstream = downstream;
        }

        Ok(supervisor.wait_for_all().await)
    }
}

/// Closes the stage's channels however the stage ends, so that its upstream
/// stops writing and its downstream sees the end of the stream.
struct CloseChannels {
    upstream: Option<Arc<PipelineChannel>>,
    downstream: Option<Arc<PipelineChannel>>,
}

impl Drop for CloseChannels {
    fn drop(&mut self) {
        if let Some(channel) = &self.upstream {
            channel.close_for_producer();
        }
        if let Some(channel) = &self.downstream {
            channel.close_for_consumer();
        }
    }
}

async fn run_stage(
    interpreter: Interpreter,
    statement: Arc<Statement>,
    io: StageIo,
    upstream: Option<Arc<PipelineChannel>>,
    downstream: Option<Arc<PipelineChannel>>,
) -> Result<ExitStatus> {
    let _close = CloseChannels {
        upstream,
        downstream,
    };
    let error = io.error.clone();
    match interpreter.eval(&statement, io).await {
        Ok(status) => Ok(status),
        Err(e) if e.is::<ProducerClosed>() => {
            tracing::trace!(location = %statement.location, "downstream stopped early");
            Ok(ExitStatus::success())
        }
        Err(e) => {
            report_fault(&error, &e).await;
            Err(e)
        }
    }
}
