//! Integration tests for single-stage runs: inputs, outputs, error capture
//! and the exactly-once completion guarantee.

use anyhow::anyhow;
use serde_json::{json, Value};
use stagewise_core::{stage, Pipeline, StageError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::Instrument;
use tracing_subscriber::util::SubscriberInitExt;

async fn run_target<F>(inputs: Vec<Value>, target: F) -> stagewise_core::Completion
where
    F: Fn(Vec<Value>, stagewise_core::Success, stagewise_core::Toolkit) -> Result<(), StageError>
        + Send
        + Sync
        + 'static,
{
    Pipeline::default().run(stage(target), inputs).await.unwrap()
}

// =============================================================================
// Inputs and outputs
// =============================================================================

#[tokio::test]
async fn test_passes_inputs_to_target() {
    let inputs = vec![json!("in1"), json!("in2"), json!("in3")];
    let completion = run_target(inputs, |inputs, success, _| {
        assert_eq!(inputs, vec![json!("in1"), json!("in2"), json!("in3")]);
        success.call(vec![]);
        Ok(())
    })
    .await;
    assert!(completion.is_ok());
}

#[tokio::test]
async fn test_passes_outputs_to_completion() {
    let completion = run_target(vec![], |_, success, _| {
        success.call(vec![json!("out1"), json!("out2"), json!("out3")]);
        Ok(())
    })
    .await;
    assert_eq!(completion.outputs(), &[json!("out1"), json!("out2"), json!("out3")]);
}

#[tokio::test]
async fn test_completion_fires_once_and_keeps_first_outputs() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let (tx, rx) = oneshot::channel();

    Pipeline::default()
        .exec(
            stage(|_, success, _| {
                success.call(vec![json!("a")]);
                success.call(vec![json!("b")]);
                success.call(vec![json!("c")]);
                Ok(())
            }),
            vec![],
            move |completion| {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(completion);
            },
        )
        .unwrap();

    let completion = rx.await.unwrap();
    assert_eq!(completion.outputs(), &[json!("a")]);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Error capture
// =============================================================================

#[tokio::test]
async fn test_catches_returned_error() {
    let completion = run_target(vec![], |_, _, _| Err(anyhow!("Test error").into())).await;
    assert_eq!(completion.error().unwrap().to_string(), "Test error");
    assert!(completion.outputs().is_empty());
}

#[tokio::test]
async fn test_catches_panic() {
    let completion = run_target(vec![], |_, _, _| panic!("Test panic")).await;
    match completion.error() {
        Some(StageError::Panicked(message)) => assert_eq!(message, "Test panic"),
        other => panic!("unexpected completion: {:?}", other),
    }
}

#[tokio::test]
async fn test_catches_error_from_spawned_work() {
    let completion = run_target(vec![], |_, _, error| {
        error.spawn(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(anyhow!("Test error").into())
        });
        Ok(())
    })
    .await;
    assert_eq!(completion.error().unwrap().to_string(), "Test error");
}

#[tokio::test]
async fn test_catches_panic_from_spawned_work() {
    let completion = run_target(vec![], |_, _, error| {
        error.spawn(async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            panic!("late panic");
        });
        Ok(())
    })
    .await;
    assert!(matches!(completion.error(), Some(StageError::Panicked(_))));
}

#[tokio::test]
async fn test_intercepts_async_error() {
    let completion = run_target(vec![], |_, _, error| {
        let toolkit = error.clone();
        let first = error.intercept(move |args| {
            assert_eq!(args, vec![json!("value")]);
            let second = toolkit.intercept(|_| panic!("should not get here"));
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                second.err(anyhow!("Async error"));
            });
            Ok(())
        });
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            first.ok(vec![json!("value")]);
        });
        Ok(())
    })
    .await;
    assert_eq!(completion.error().unwrap().to_string(), "Async error");
}

#[tokio::test]
async fn test_wrapped_callback_failure_is_routed_from_another_thread() {
    let completion = run_target(vec![], |_, _, error| {
        let callback = error.wrap(|_| Err(anyhow!("thread error").into()));
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            callback.call(vec![]);
        });
        Ok(())
    })
    .await;
    assert_eq!(completion.error().unwrap().to_string(), "thread error");
}

#[tokio::test]
async fn test_raise_fails_step_from_carried_toolkit() {
    let completion = run_target(vec![], |_, _, error| {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            error.raise(error.value(json!("raised")));
        });
        Ok(())
    })
    .await;
    assert!(matches!(completion.error(), Some(StageError::Thrown(v)) if v == &json!("raised")));
}

#[tokio::test]
async fn test_errors_out_with_a_message() {
    let completion = run_target(vec![], |_, _, error| Err(error.message("Hey, an error!"))).await;
    assert_eq!(completion.error().unwrap().to_string(), "Hey, an error!");
}

#[tokio::test]
async fn test_formats_error_message() {
    let completion = run_target(vec![], |_, _, error| {
        Err(error.message(format!(
            "A string {}, number {}, json {} {}",
            "s",
            12,
            json!([false]),
            "hi"
        )))
    })
    .await;
    assert_eq!(
        completion.error().unwrap().to_string(),
        "A string s, number 12, json [false] hi"
    );
}

#[tokio::test]
async fn test_errors_out_with_a_value() {
    let completion =
        run_target(vec![], |_, _, error| Err(error.value(json!({ "reason": "mine" })))).await;
    match completion.error() {
        Some(StageError::Thrown(value)) => assert_eq!(value["reason"], "mine"),
        other => panic!("unexpected completion: {:?}", other),
    }
}

// =============================================================================
// Error-first adapters
// =============================================================================

#[tokio::test]
async fn test_or_out_forwards_fixed_outputs() {
    let completion = run_target(vec![], |_, _, error| {
        let callback = error.or_out(vec![json!("A1"), json!("A2")]);
        tokio::spawn(async move { callback.ok(vec![json!("ignored")]) });
        Ok(())
    })
    .await;
    assert_eq!(completion.outputs(), &[json!("A1"), json!("A2")]);
}

#[tokio::test]
async fn test_or_out_routes_error() {
    let completion = run_target(vec![], |_, _, error| {
        let callback = error.or_out(vec![json!("A1"), json!("A2")]);
        tokio::spawn(async move { callback.err(anyhow!("io failed")) });
        Ok(())
    })
    .await;
    assert_eq!(completion.error().unwrap().to_string(), "io failed");
    assert!(completion.outputs().is_empty());
}

#[tokio::test]
async fn test_or_output_forwards_all_arguments() {
    let completion = run_target(vec![], |_, _, error| {
        let callback = error.or_output(None);
        tokio::spawn(async move { callback.ok(vec![json!(1), json!(2), json!(3)]) });
        Ok(())
    })
    .await;
    assert_eq!(completion.outputs(), &[json!(1), json!(2), json!(3)]);
}

#[tokio::test]
async fn test_or_output_forwards_first_n_arguments() {
    let completion = run_target(vec![], |_, _, error| {
        let callback = error.or_output(Some(1));
        tokio::spawn(async move { callback.ok(vec![json!(1), json!(2), json!(3)]) });
        Ok(())
    })
    .await;
    assert_eq!(completion.outputs(), &[json!(1)]);
}

#[tokio::test]
async fn test_wrap_passes_every_argument_through() {
    let completion = run_target(vec![], |_, success, error| {
        let callback = error.wrap(move |args| {
            success.call(args);
            Ok(())
        });
        tokio::spawn(async move { callback.call(vec![Value::Null, json!("data")]) });
        Ok(())
    })
    .await;
    assert_eq!(completion.outputs(), &[Value::Null, json!("data")]);
}

// =============================================================================
// Ambient context
// =============================================================================

#[tokio::test]
async fn test_stage_runs_in_step_span_and_done_in_callers_span() {
    let _guard = tracing_subscriber::registry().set_default();
    let caller = tracing::info_span!("caller");
    let caller_id = caller.id();
    assert!(caller_id.is_some());

    let (stage_tx, stage_rx) = oneshot::channel();
    let stage_tx = std::sync::Mutex::new(Some(stage_tx));
    let (done_tx, done_rx) = oneshot::channel();

    async {
        Pipeline::default()
            .exec(
                stage(move |_, success, _| {
                    if let Some(tx) = stage_tx.lock().unwrap().take() {
                        let _ = tx.send(tracing::Span::current().id());
                    }
                    success.call(vec![]);
                    Ok(())
                }),
                vec![],
                move |_| {
                    let _ = done_tx.send(tracing::Span::current().id());
                },
            )
            .unwrap();
    }
    .instrument(caller)
    .await;

    let in_stage = stage_rx.await.unwrap();
    let in_done = done_rx.await.unwrap();
    assert!(in_stage.is_some());
    assert_ne!(in_stage, caller_id);
    assert_eq!(in_done, caller_id);
}
