//! Basic usage example for the taskweave combinators
//!
//! Each "widget" is a task that waits for a scripted click: success after a
//! delay, failure after a delay, or never. The programs below compose widgets
//! with every combinator and print what each run delivers.
//!
//! Run with `RUST_LOG=taskweave=debug` to see the orchestrator's own logs.

use std::cell::RefCell;
use std::time::Duration;

use indexmap::IndexMap;
use taskweave::{
    objectify, Callback, Cancel, EventLoop, Executor, Reason, Scheduler, Task, TaskResult,
    TracingReporter, Value,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy)]
enum Click {
    Success(u64),
    Failure(u64),
    Never,
}

fn widget(event_loop: &EventLoop, name: &'static str, click: Click) -> Task {
    let event_loop = event_loop.clone();
    Task::new(name, move |callback, value| {
        let label = match value {
            Value::Null => name.to_string(),
            Value::String(prefix) => format!("{prefix}.{name}"),
            other => format!("{other}.{name}"),
        };
        let (delay, result): (u64, TaskResult) = match click {
            Click::Success(delay) => (delay, Ok(Value::String(label))),
            Click::Failure(delay) => (delay, Err(Reason::new(name, name))),
            Click::Never => return None,
        };
        let timer = event_loop.defer(
            Duration::from_millis(delay),
            Box::new(move || {
                let status = if result.is_ok() { "success" } else { "failure" };
                println!("  {name}: {status}");
                callback.complete(result);
            }),
        );
        let timer = RefCell::new(Some(timer));
        Some(Cancel::new(move |_reason| {
            if let Some(timer) = timer.borrow_mut().take() {
                timer.clear();
            }
            println!("  {name}: cancelled");
        }))
    })
}

fn show(program: &'static str) -> Callback {
    Callback::new(move |result| match result {
        Ok(value) => println!("{program}: success {value}"),
        Err(reason) => println!("{program}: failure {reason}"),
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let event_loop = EventLoop::new();
    let executor = Executor::new(event_loop.clone()).with_reporter(TracingReporter);
    let w = |name, click| widget(&event_loop, name, click);

    println!("=== race ===");
    let race = executor.race(
        [
            w("A", Click::Success(300)),
            w("B", Click::Success(100)),
            w("C", Click::Failure(50)),
        ],
        None,
        None,
    )?;
    race.start(show("race"), Value::Null);
    event_loop.run();

    println!("\n=== time_limit ===");
    // Five widgets in parallel, three successes needed, ten seconds at most
    let time_limit = executor.time_limit(
        executor.parallel(
            [
                w("A", Click::Success(1_000)),
                w("B", Click::Failure(2_000)),
                w("C", Click::Success(3_000)),
                w("D", Click::Never),
                w("E", Click::Success(4_000)),
            ],
            None,
            Some(3),
        )?,
        Duration::from_secs(10),
    )?;
    time_limit.start(show("time_limit"), Value::Null);
    event_loop.run();

    println!("\n=== complex ===");
    // A sequence holding a parallel of a fallback and a race with another
    // parallel, finished by an ordinary function
    let ordinary = Task::from_fn("ordinary", |value: Value| {
        let count = value.as_array().map(Vec::len).ok_or("expected an array")?;
        Ok::<_, &str>(Value::String(format!("{count}: {value}!")))
    });
    let complex = executor.sequence([
        w("A", Click::Success(10)),
        executor.parallel(
            [
                executor.fallback([
                    w("F1", Click::Failure(20)),
                    w("F2", Click::Success(20)),
                    w("F3", Click::Success(20)),
                ]),
                executor.race(
                    [
                        w("R1", Click::Success(500)),
                        w("R2", Click::Never),
                        w("R3", Click::Failure(30)),
                        executor.parallel(
                            [
                                w("P1", Click::Success(40)),
                                w("P2", Click::Success(60)),
                                w("P3", Click::Success(80)),
                            ],
                            None,
                            None,
                        )?,
                    ],
                    None,
                    None,
                )?,
            ],
            None,
            None,
        )?,
        ordinary,
    ]);
    complex.start(show("complex"), Value::Null);
    event_loop.run();

    println!("\n=== objectified ===");
    let factory = executor.clone();
    let objectified = objectify(move |tasks| factory.parallel(tasks, None, None));
    let mut entries = IndexMap::new();
    for (key, name, delay) in [
        ("alfa", "A", 50),
        ("bravo", "B", 40),
        ("charlie", "C", 30),
        ("delta", "D", 20),
        ("echo", "E", 10),
    ] {
        entries.insert(key.to_string(), w(name, Click::Success(delay)));
    }
    objectified(entries)?.start(show("objectified"), Value::Null);
    event_loop.run();

    Ok(())
}
