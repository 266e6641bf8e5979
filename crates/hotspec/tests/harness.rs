//! Interpreter flows against the in-memory environment

mod common;

use common::{init_tracing, FakeEnv, APP};
use futures::FutureExt;
use hotspec::commands::{
    after, before, before_load, change, change_files, debug, discard, expect, flush, init, inner_text, page,
    spec, templates, wait, wait_for, FileContent, Files, Template,
};
use hotspec::{callback, script, Harness, HarnessConfig, HotError, Label, Page, SpecSource, Step, Sub};
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const COUNTER: &str = "
    ---- App.svelte ----
    ::0 <p>0</p>
    ::1 <p>1</p>
    ::2 <p>2</p>
    ::3 <p>3</p>
    ****
    ::0 <p>0</p>
    ::1 <p>1</p>
    ::2 <p>2</p>
    ::3 <p>3</p>
";

fn config() -> HarnessConfig {
    HarnessConfig {
        console_window_ms: 20,
        settle_timeout_ms: 1_000,
        ..Default::default()
    }
}

fn harness(env: &Arc<FakeEnv>) -> Harness {
    init_tracing();
    Harness::new(env.clone(), config())
}

fn writes(env: &FakeEnv) -> Vec<String> {
    env.ops_matching("write ")
}

#[tokio::test]
async fn test_spec_example_writes_and_asserts_each_label() {
    let env = FakeEnv::with_renderer(|files| {
        let app = files.get(APP)?;
        Some(if app.contains("on zero") { "<h1>zero</h1>" } else { "<h1>one</h1>" }.to_string())
    });
    let test = script(|co| async move {
        co.send(spec(
            "
            ---- App.svelte ----
            top
            ::0 on zero
            middle
            ::1 on one
            bottom
            ****
            ::0 <h1>zero</h1>
            ::1 <h1>one</h1>
            ",
        ))
        .await?;
        Ok(())
    });

    harness(&env).run(&test).await.unwrap();

    assert_eq!(
        env.ops(),
        vec![
            "reset ",
            "load /",
            "write App.svelte=top|on zero|middle|bottom",
            "html <h1>zero</h1>",
            "write App.svelte=top|middle|on one|bottom",
            "html <h1>one</h1>",
            "close",
        ]
    );
}

#[tokio::test]
async fn test_change_consumes_queue_in_order() {
    let env = FakeEnv::new();
    let snapshot: Arc<Mutex<Option<Value>>> = Arc::default();
    let captured = snapshot.clone();
    let test = script(move |co| {
        let captured = captured.clone();
        async move {
            co.send(spec(COUNTER)).await?;
            co.send(change(2)).await?;
            let snapshot = co.send(debug()).await?;
            *captured.lock() = Some(snapshot);
            Ok(())
        }
    });

    harness(&env).run(&test).await.unwrap();

    let snapshot = snapshot.lock().clone().unwrap();
    assert_eq!(snapshot["remaining_expects"], json!(["3"]));
    assert_eq!(
        writes(&env),
        vec![
            "write App.svelte=<p>0</p>",
            "write App.svelte=<p>1</p>",
            "write App.svelte=<p>2</p>",
            "write App.svelte=<p>3</p>",
        ]
    );
}

#[tokio::test]
async fn test_init_asserts_first_label_without_writing() {
    let env = FakeEnv::new();
    let test = script(|co| async move {
        co.send(spec(COUNTER)).await?;
        co.send(init(0)).await?;
        co.send(change(1)).await?;
        co.send(discard()).await?;
        Ok(())
    });

    harness(&env).run(&test).await.unwrap();

    assert_eq!(
        env.ops(),
        vec![
            "reset App.svelte",
            "load /",
            "html <p>0</p>",
            "write App.svelte=<p>1</p>",
            "html <p>1</p>",
            "close",
        ]
    );
}

#[tokio::test]
async fn test_init_must_match_first_expectation() {
    let env = FakeEnv::new();
    let caught: Arc<Mutex<Option<String>>> = Arc::default();
    let slot = caught.clone();
    let test = script(move |co| {
        let slot = slot.clone();
        async move {
            co.send(spec(COUNTER)).await?;
            co.send(init(1)).await?;
            if let Err(e) = co.send(change(2)).await {
                *slot.lock() = Some(e.to_string());
            }
            Ok(())
        }
    });

    harness(&env).run(&test).await.unwrap();

    let message = caught.lock().clone().unwrap();
    assert!(message.contains("Must init with first step"), "{}", message);
    assert!(writes(&env).is_empty());
}

#[tokio::test]
async fn test_unhandled_command_error_fails_test() {
    let env = FakeEnv::new();
    let test = script(|co| async move {
        co.send(spec(COUNTER)).await?;
        co.send(init(2)).await?;
        co.send(flush()).await?;
        Ok(())
    });

    let err = harness(&env).run(&test).await.unwrap_err();
    assert!(matches!(err, HotError::Usage(ref m) if m.contains("Must init with first step")));
}

#[tokio::test]
async fn test_html_mismatch_is_an_assertion_error() {
    let env = FakeEnv::new();
    let test = script(|co| async move {
        co.send(spec("---- App.svelte ----\n<p>real</p>\n****\n::0 <p>expected</p>\n"))
            .await?;
        Ok(())
    });

    let err = harness(&env).run(&test).await.unwrap_err();
    match err {
        HotError::Assertion { label, expected, actual } => {
            assert_eq!(label, "0");
            assert_eq!(expected, "<p>expected</p>");
            assert_eq!(actual, "<p>real</p>");
        }
        other => panic!("expected assertion error, got {}", other),
    }
    assert_eq!(env.ops().last().map(String::as_str), Some("close"));
}

#[tokio::test]
async fn test_html_prefix_is_stripped() {
    let env = FakeEnv::new();
    let test = script(|co| async move {
        co.send(spec("---- App.svelte ----\n<nav></nav>\n<p>body</p>\n****\n::0 <p>body</p>\n"))
            .await?;
        Ok(())
    });
    let harness = Harness::new(
        env.clone(),
        HarnessConfig {
            html_prefix: Some("<nav></nav>".to_string()),
            ..config()
        },
    );

    harness.run(&test).await.unwrap();
}

#[tokio::test]
async fn test_matcher_tolerates_dynamic_content() {
    let env = FakeEnv::new();
    let test = script(|co| async move {
        let source = SpecSource::new()
            .text("---- App.svelte ----\n<p>count: 42</p>\n****\n::0 <p>count: ")
            .matcher(Regex::new(r"\d+").unwrap())
            .text("</p>\n");
        co.send(spec(source)).await?;
        Ok(())
    });

    harness(&env).run(&test).await.unwrap();
}

#[tokio::test]
async fn test_sub_step_runs_between_html_steps() {
    let env = FakeEnv::new();
    let press = script(|co| async move {
        co.send(page().member("keyboard").member("press").call(vec![json!("Enter")]))
            .await?;
        Ok(())
    });
    let test = script(move |co| {
        let press = press.clone();
        async move {
            let source = SpecSource::new()
                .text("---- App.svelte ----\n::0 <p>0</p>\n::1 <p>1</p>\n****\n::0 <p>0</p>\n::1::\n<p>1</p>\n")
                .sub(press)
                .text("\n<p>1</p>\n::\n");
            co.send(spec(source)).await?;
            Ok(())
        }
    });

    harness(&env).run(&test).await.unwrap();

    let ops = env.ops();
    let call = ops.iter().position(|op| op.starts_with("call keyboard.press")).unwrap();
    assert_eq!(ops[call], r#"call keyboard.press ["Enter"]"#);
    assert_eq!(ops[call - 1], "html <p>1</p>");
    assert_eq!(ops[call + 1], "html <p>1</p>");
}

#[tokio::test]
async fn test_fan_out_drives_every_branch() {
    let env = FakeEnv::new();
    let branch = |key: &'static str| {
        Sub::Script(script(move |co| async move {
            co.send(page().member("keyboard").member("press").call(vec![json!(key)]))
                .await?;
            co.send(wait(Duration::from_millis(5))).await?;
            Ok(())
        }))
    };
    let fan_out = Sub::All(vec![branch("a"), branch("b"), branch("c")]);
    let test = script(move |co| {
        let fan_out = fan_out.clone();
        async move {
            co.send(spec(COUNTER)).await?;
            co.send(expect(1, vec![Step::sub(fan_out)])).await?;
            co.send(change(1)).await?;
            co.send(discard()).await?;
            Ok(())
        }
    });

    harness(&env).run(&test).await.unwrap();

    let mut calls = env.ops_matching("call ");
    calls.sort();
    assert_eq!(
        calls,
        vec![
            r#"call keyboard.press ["a"]"#,
            r#"call keyboard.press ["b"]"#,
            r#"call keyboard.press ["c"]"#,
        ]
    );
}

#[tokio::test]
async fn test_fan_out_first_error_wins() {
    let env = FakeEnv::new();
    let failing = Sub::Callback(callback(|| async { Err(HotError::Environment("branch failed".to_string())) }));
    let idle = Sub::Callback(callback(|| async { Ok(()) }));
    let test = script(move |co| {
        let step = Step::sub(vec![idle.clone(), failing.clone()]);
        async move {
            co.send(spec(COUNTER)).await?;
            co.send(expect(0, vec![step])).await?;
            Ok(())
        }
    });

    let err = harness(&env).run(&test).await.unwrap_err();
    assert!(err.to_string().contains("branch failed"));
}

#[tokio::test]
async fn test_fan_out_waits_run_concurrently() {
    let env = FakeEnv::new();
    let branch = || {
        Sub::Script(script(|co| async move {
            co.send(wait(Duration::from_millis(300))).await?;
            Ok(())
        }))
    };
    let fan_out = Sub::All(vec![branch(), branch(), branch()]);
    let test = script(move |co| {
        let fan_out = fan_out.clone();
        async move {
            co.send(spec(COUNTER)).await?;
            co.send(expect(0, vec![Step::sub(fan_out)])).await?;
            co.send(change(0)).await?;
            co.send(discard()).await?;
            Ok(())
        }
    });

    let start = Instant::now();
    harness(&env).run(&test).await.unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(300), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(700), "{:?}", elapsed);
}

#[tokio::test]
async fn test_fan_out_branch_can_wait_on_sibling() {
    let env = FakeEnv::new();
    let test = script(move |co| async move {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let rx = Arc::new(Mutex::new(Some(rx)));
        let tx = Arc::new(Mutex::new(Some(tx)));

        let waiting = Sub::Script(script(move |co| {
            let rx = rx.lock().take();
            async move {
                let rx = rx.ok_or_else(|| HotError::Environment("receiver taken".to_string()))?;
                co.send(wait_for(async move {
                    rx.await
                        .map(|_| Value::Null)
                        .map_err(|_| HotError::Environment("sibling dropped".to_string()))
                }))
                .await?;
                Ok(())
            }
        }));
        let signalling = Sub::Script(script(move |co| {
            let tx = tx.lock().take();
            async move {
                co.send(wait(Duration::from_millis(10))).await?;
                if let Some(tx) = tx {
                    let _ = tx.send(());
                }
                Ok(())
            }
        }));

        co.send(spec(COUNTER)).await?;
        co.send(expect(0, vec![Step::sub(vec![waiting, signalling])])).await?;
        co.send(change(0)).await?;
        co.send(discard()).await?;
        Ok(())
    });

    tokio::time::timeout(Duration::from_secs(2), harness(&env).run(&test))
        .await
        .expect("fan-out deadlocked")
        .unwrap();
}

#[tokio::test]
async fn test_hooks_bracket_steps() {
    let env = FakeEnv::new();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    let (b, s, a) = (order.clone(), order.clone(), order.clone());
    let test = script(move |co| {
        let hook_before = callback({
            let b = b.clone();
            move || {
                let b = b.clone();
                async move {
                    b.lock().push("before");
                    Ok(())
                }
            }
        });
        let step = Step::function(callback({
            let s = s.clone();
            move || {
                let s = s.clone();
                async move {
                    s.lock().push("step");
                    Ok(())
                }
            }
        }));
        let hook_after = callback({
            let a = a.clone();
            move || {
                let a = a.clone();
                async move {
                    a.lock().push("after");
                    Ok(())
                }
            }
        });
        async move {
            co.send(spec(COUNTER)).await?;
            co.send(after(0, Sub::Callback(hook_after))).await?;
            co.send(expect(0, vec![step])).await?;
            co.send(before(0, Sub::Callback(hook_before))).await?;
            co.send(change(0)).await?;
            co.send(discard()).await?;
            Ok(())
        }
    });

    harness(&env).run(&test).await.unwrap();
    assert_eq!(*order.lock(), vec!["before", "step", "after"]);
}

#[tokio::test]
async fn test_page_commands() {
    let env = FakeEnv::new();
    let values: Arc<Mutex<Vec<Value>>> = Arc::default();
    let out = values.clone();
    let test = script(move |co| {
        let out = out.clone();
        async move {
            co.send(spec(COUNTER)).await?;
            co.send(change(0)).await?;
            let url = co.send(page().member("url")).await?;
            out.lock().push(url);
            let url = co.send(page().member("url").call(vec![])).await?;
            out.lock().push(url);
            let text = co.send(inner_text("p")).await?;
            out.lock().push(text);
            let missing = co.send(inner_text("h2")).await?;
            out.lock().push(missing);

            let err = co
                .send(page().member("url").call(vec![json!(1)]))
                .await
                .unwrap_err();
            out.lock().push(json!(err.to_string()));

            co.send(discard()).await?;
            Ok(())
        }
    });

    harness(&env).run(&test).await.unwrap();

    let values = values.lock().clone();
    assert_eq!(values[0], json!("http://localhost:8080/"));
    assert_eq!(values[1], json!("http://localhost:8080/"));
    assert_eq!(values[2], json!("0"));
    assert_eq!(values[3], Value::Null);
    assert!(values[4].as_str().unwrap().contains("page.url is not a function"));
    assert_eq!(env.ops_matching("get ").len(), 1);
    assert!(env.ops_matching("call ").is_empty());
}

#[tokio::test]
async fn test_spec_after_start_is_rejected() {
    let env = FakeEnv::new();
    let test = script(|co| async move {
        co.send(spec(COUNTER)).await?;
        co.send(change(0)).await?;
        let err = co.send(spec(COUNTER)).await.unwrap_err();
        assert!(matches!(err, HotError::Usage(_)));
        let err = co.send(init(1)).await.unwrap_err();
        assert!(matches!(err, HotError::Usage(_)));
        co.send(discard()).await?;
        Ok(())
    });

    harness(&env).run(&test).await.unwrap();
}

#[tokio::test]
async fn test_unknown_label_is_written_without_assertion() {
    let env = FakeEnv::new();
    let test = script(|co| async move {
        co.send(spec(COUNTER)).await?;
        co.send(flush()).await?;
        co.send(change(1)).await?;
        Ok(())
    });

    harness(&env).run(&test).await.unwrap();

    let ops = env.ops();
    assert_eq!(ops[ops.len() - 2], "write App.svelte=<p>1</p>");
    assert_eq!(env.ops_matching("html ").len(), 4);
}

#[tokio::test]
async fn test_templates_wrap_rendered_files() {
    let env = FakeEnv::new();
    let test = script(|co| async move {
        let wrap: Template = Arc::new(|body: &str| format!("<main>{}</main>", body.trim()));
        let mut map = BTreeMap::new();
        map.insert(APP.to_string(), wrap);
        co.send(templates(map)).await?;
        co.send(spec("---- App.svelte ----\n::0 <p>0</p>\n****\n::0 <main><p>0</p></main>\n"))
            .await?;
        co.send(flush()).await?;

        let mut files = Files::new();
        files.insert(APP.to_string(), FileContent::Body("<p>x</p>".to_string()));
        files.insert("main.js".to_string(), FileContent::Text("// main".to_string()));
        co.send(change_files(files)).await?;
        Ok(())
    });

    harness(&env).run(&test).await.unwrap();

    assert_eq!(env.file(APP).as_deref(), Some("<main><p>x</p></main>"));
    assert_eq!(env.file("main.js").as_deref(), Some("// main"));
}

#[tokio::test]
async fn test_settle_timeout() {
    let env = FakeEnv::new();
    env.set_settle_delay(Duration::from_millis(500));
    let test = script(|co| async move {
        co.send(spec(COUNTER)).await?;
        Ok(())
    });
    let harness = Harness::new(
        env.clone(),
        HarnessConfig {
            settle_timeout_ms: 20,
            ..config()
        },
    );

    let err = harness.run(&test).await.unwrap_err();
    assert!(matches!(err, HotError::Timeout(_)));
}

#[tokio::test]
async fn test_before_load_runs_before_navigation() {
    let env = FakeEnv::new();
    let seen: Arc<Mutex<Vec<String>>> = Arc::default();
    let record = seen.clone();
    let observer = env.clone();
    let test = script(move |co| {
        let record = record.clone();
        let observer = observer.clone();
        async move {
            co.send(before_load(Arc::new(move |_page: Arc<dyn Page>| {
                let record = record.clone();
                let loaded = observer.ops_matching("load ").len();
                async move {
                    record.lock().push(format!("loaded before hook: {}", loaded));
                    Ok(())
                }
                .boxed()
            })))
            .await?;
            co.send(spec(COUNTER)).await?;
            Ok(())
        }
    });

    harness(&env).run(&test).await.unwrap();
    assert_eq!(*seen.lock(), vec!["loaded before hook: 0".to_string()]);
}

#[tokio::test]
async fn test_script_without_expectations_never_starts() {
    let env = FakeEnv::new();
    let test = script(|co| async move {
        let snapshot = co.send(debug()).await?;
        assert_eq!(snapshot["started"], json!(false));
        Ok(())
    });

    harness(&env).run(&test).await.unwrap();
    assert!(env.ops().is_empty());
}

#[tokio::test]
async fn test_wildcard_expectation_for_unlabeled_spec() {
    let env = FakeEnv::new();
    let test = script(|co| async move {
        co.send(spec("---- App.svelte ----\n<b>static</b>\n****\n<b>static</b>\n"))
            .await?;
        let snapshot = co.send(debug()).await?;
        assert_eq!(snapshot["expects"][0]["label"], json!(Label::wildcard().as_str()));
        Ok(())
    });

    harness(&env).run(&test).await.unwrap();
    assert_eq!(writes(&env), vec!["write App.svelte=<b>static</b>"]);
}
