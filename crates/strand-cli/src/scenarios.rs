//! End-to-end scenarios run by `strand demo` and `strand demos`.
//!
//! Each scenario builds a fresh kernel from the effective configuration,
//! runs it to completion and reports what the strands observed.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Context, Result, bail};
use strand_kernel::{
    Kernel, KernelConfig, MemoryStream, Resume, Script, Step, Stream, StrandError, Value,
    Yieldable, api,
};
use tracing::info;

use crate::cli::Scenario;
use crate::helpers::{describe_outcome, to_json};

/// What a scenario printed along the way and how it ended.
#[derive(Debug)]
pub struct Report {
    pub scenario: Scenario,
    pub trace: Vec<String>,
    pub result: String,
}

type Trace = Rc<RefCell<Vec<String>>>;

fn note(trace: &Trace, line: impl Into<String>) {
    trace.borrow_mut().push(line.into());
}

/// A task that records `name` and returns `value`.
fn echo(trace: &Trace, name: &'static str, value: impl Into<Value>) -> Yieldable {
    let trace = Rc::clone(trace);
    let value = value.into();
    Script::new()
        .then(move |_| {
            note(&trace, name);
            Step::done(value)
        })
        .into()
}

/// Run one scenario on a new kernel.
pub fn run(scenario: Scenario, config: &KernelConfig) -> Result<Report> {
    info!(scenario = scenario.name(), "running scenario");
    let trace: Trace = Rc::new(RefCell::new(Vec::new()));
    let mut kernel = Kernel::with_config(config.clone());

    let result = match scenario {
        Scenario::All => all(&mut kernel, &trace)?,
        Scenario::AllFailure => all_failure(&mut kernel, &trace)?,
        Scenario::Timeout => timeout(&mut kernel, &trace)?,
        Scenario::Some => some(&mut kernel, &trace)?,
        Scenario::Link => link(&mut kernel)?,
        Scenario::Read => read(&mut kernel, &trace)?,
    };

    if kernel.live_count() != 0 {
        bail!(
            "scenario `{}` left {} strands running",
            scenario.name(),
            kernel.live_count()
        );
    }

    let trace = trace.borrow().clone();
    Ok(Report {
        scenario,
        trace,
        result,
    })
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

fn all(kernel: &mut Kernel, trace: &Trace) -> Result<String> {
    let tasks = vec![echo(trace, "a", Value::Null), echo(trace, "b", Value::Null)];
    let caller = kernel.spawn(Script::new().then(move |_| Step::yielding(api::all(tasks))));
    let value = kernel.run_until(caller).context("all over two tasks")?;
    Ok(to_json(&value).to_string())
}

fn all_failure(kernel: &mut Kernel, trace: &Trace) -> Result<String> {
    let (first, second) = (Rc::clone(trace), Rc::clone(trace));
    let cooperative: Yieldable = Script::new()
        .then(move |_| {
            note(&first, "a1");
            Step::yielding(api::cooperate())
        })
        .then(move |_| {
            note(&second, "a2");
            Step::done(Value::Null)
        })
        .into();
    let failing: Yieldable = Script::new().then(|_| Step::fail("boom")).into();

    let caller = kernel.spawn(
        Script::new()
            .then(move |_| Step::yielding(api::all(vec![cooperative, failing])))
            .handle(|input| match input {
                Resume::Error(error) => Step::done(format!("caught: {error}")),
                other => Step::fail(format!("expected a failure, got {other:?}")),
            }),
    );
    let value = kernel.run_until(caller).context("all with a failing task")?;
    Ok(to_json(&value).to_string())
}

fn timeout(kernel: &mut Kernel, trace: &Trace) -> Result<String> {
    let after = Rc::clone(trace);
    let slow: Yieldable = Script::new()
        .then(|_| Step::yielding(api::sleep(0.1)))
        .then(move |_| {
            note(&after, "after sleep");
            Step::done(Value::Null)
        })
        .into();

    let caller = kernel.spawn(
        Script::new()
            .then(move |_| Step::yielding(api::timeout(0.05, slow)))
            .handle(|input| match input {
                Resume::Error(error @ StrandError::Timeout { .. }) => {
                    Step::done(format!("caught: {error}"))
                }
                other => Step::fail(format!("expected a timeout, got {other:?}")),
            }),
    );
    let value = kernel.run_until(caller).context("timeout over a slow task")?;
    // Drain the loop so a surviving sleeper would have had its chance to log.
    kernel.run().context("draining after timeout")?;
    Ok(to_json(&value).to_string())
}

fn some(kernel: &mut Kernel, trace: &Trace) -> Result<String> {
    let tasks = vec![
        echo(trace, "a", "val-a"),
        echo(trace, "b", "val-b"),
        echo(trace, "c", "val-c"),
    ];
    let caller = kernel.spawn(Script::new().then(move |_| Step::yielding(api::some(2, tasks))));
    let value = kernel.run_until(caller).context("some(2) over three tasks")?;
    Ok(to_json(&value).to_string())
}

fn link(kernel: &mut Kernel) -> Result<String> {
    let a = kernel.spawn(api::suspend());
    let b = kernel.spawn(
        Script::new()
            .then(move |_| Step::yielding(api::link(a, None)))
            .then(|_| Step::yielding(api::suspend())),
    );
    kernel.run().context("running linked strands")?;
    kernel.terminate(a);
    kernel.run().context("draining after terminate")?;
    Ok(format!(
        "{a} {}, {b} {}",
        describe_outcome(kernel.outcome(a)),
        describe_outcome(kernel.outcome(b))
    ))
}

fn read(kernel: &mut Kernel, trace: &Trace) -> Result<String> {
    let stream: Rc<dyn Stream> = Rc::new(MemoryStream::new());

    let source = Rc::clone(&stream);
    let reader_trace = Rc::clone(trace);
    let reader = kernel.spawn(
        Script::new()
            .then(move |_| Step::yielding(api::read(source, 4, 16)))
            .then(move |bytes| {
                let len = bytes.as_bytes().map_or(0, <[u8]>::len);
                note(&reader_trace, format!("read {len}"));
                Step::done(bytes)
            }),
    );

    let (first, second) = (Rc::clone(&stream), Rc::clone(&stream));
    let (wrote, writing) = (Rc::clone(trace), Rc::clone(trace));
    kernel.spawn(
        Script::new()
            .then(move |_| Step::yielding(api::write(first, b"ab".to_vec(), None)))
            .then(move |_| {
                note(&wrote, "wrote ab");
                Step::yielding(api::cooperate())
            })
            .then(move |_| {
                note(&writing, "writing cd");
                Step::yielding(api::write(second, b"cd".to_vec(), None))
            }),
    );

    let value = kernel.run_until(reader).context("read with a minimum length")?;
    kernel.run().context("draining the writer")?;
    Ok(to_json(&value).to_string())
}
