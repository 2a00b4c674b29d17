#![cfg(unix)]
//! Kept in its own test binary: the interrupt goes to the whole process.

use pipesh::channel::{Collector, EmptyInput};
use pipesh::env::{EXIT_STATUS, Variables};
use pipesh::{CommandRegistry, Environment, ExitStatus, Interpreter, NoLineReader, StageIo};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal::unix::{SignalKind, signal};

#[tokio::test]
async fn interrupt_cancels_the_running_statement() {
    // a registered listener keeps SIGINT from killing the test process
    let _listener = signal(SignalKind::interrupt()).unwrap();

    let env = Arc::new(Environment::with_state(
        CommandRegistry::with_builtins(),
        std::env::temp_dir(),
        Variables::new(),
        Vec::new(),
    ));
    let interpreter = Interpreter::new(env.clone(), Arc::new(NoLineReader));
    let output = Arc::new(Collector::new());
    let io = StageIo::new(Arc::new(EmptyInput), output, Arc::new(Collector::new()));

    tokio::spawn(async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        tokio::process::Command::new("kill")
            .arg("-INT")
            .arg(std::process::id().to_string())
            .status()
            .await
    });

    let started = Instant::now();
    let status = interpreter
        .run_source("seq | sleep 10", io)
        .await
        .unwrap();

    assert_eq!(status, ExitStatus::INTERRUPTED);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(env.get_var(EXIT_STATUS), Some("130".to_string()));
}
