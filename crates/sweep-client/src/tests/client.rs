use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::candidate::{Candidate, Field};
use crate::client::{QuickSelect, Sweep, SweepEvent, SweepOptions, SweepWindowKind, WindowId};
use crate::error::SweepError;
use crate::view::{Text, View};

use super::support::{tick, write_fake_sweep, FakeSweeper};

fn pk(key: &str) -> Candidate {
    Candidate::new().target_push(key).extra_update("pk", json!(key))
}

fn attach(options: SweepOptions) -> (Sweep<Candidate>, FakeSweeper) {
    let (peer, sweeper) = FakeSweeper::new();
    (Sweep::attach(peer, options), sweeper)
}

#[tokio::test]
async fn select_restores_submitted_items_by_identity() {
    let (client, mut sweeper) = attach(SweepOptions::new());
    let mut events = client.events();

    let items = vec![pk("A"), pk("B"), pk("C")];
    let extend = client.items_extend(items.clone(), None);
    let serve = async {
        let request = sweeper.recv().await;
        assert_eq!(request.get("method").and_then(Value::as_str), Some("items_extend"));
        let sent = request["params"]["items"].as_array().unwrap().clone();
        assert_eq!(sent.len(), 3);
        for (index, item) in sent.iter().enumerate() {
            assert_eq!(item["_sweep_item_index"], json!(index));
        }
        sweeper.reply(&request, json!(true)).await;
        sent
    };
    let (extended, sent) = tokio::join!(extend, serve);
    extended.unwrap();

    // The sweeper reports the middle item back, index stamp included.
    sweeper
        .notify("select", json!({"uid": "default", "items": [sent[1]]}))
        .await;
    match events.next().await.unwrap() {
        SweepEvent::Select { uid, items: selected } => {
            assert_eq!(uid, WindowId::from("default"));
            assert_eq!(selected, vec![items[1].clone()]);
        }
        other => panic!("expected select, got {other:?}"),
    }
}

#[tokio::test]
async fn items_current_and_marked_resolve_through_the_store() {
    let (client, mut sweeper) = attach(SweepOptions::new());

    let extend = client.items_extend(vec![pk("A"), pk("B")], None);
    let serve = async {
        let request = sweeper.expect_call("items_extend", json!(true)).await;
        request["params"]["items"].as_array().unwrap().clone()
    };
    let (extended, sent) = tokio::join!(extend, serve);
    extended.unwrap();

    let current = client.items_current(None);
    let serve = async {
        let request = sweeper.recv().await;
        sweeper.reply(&request, sent[0].clone()).await;
    };
    let (current, _) = tokio::join!(current, serve);
    assert_eq!(current.unwrap(), Some(pk("A")));

    let marked = client.items_marked(None);
    let serve = async {
        let request = sweeper.recv().await;
        sweeper
            .reply(&request, json!([sent[1].clone(), sent[0].clone()]))
            .await;
    };
    let (marked, _) = tokio::join!(marked, serve);
    assert_eq!(marked.unwrap(), vec![pk("B"), pk("A")]);
}

#[tokio::test]
async fn item_update_rejects_bad_index_without_wire_activity() {
    let (client, _sweeper) = attach(SweepOptions::new());
    let err = client.item_update(0, pk("X"), None).await.unwrap_err();
    assert!(matches!(
        err,
        SweepError::IndexOutOfRange { index: 0, len: 0 }
    ));
}

#[tokio::test]
async fn items_clear_keeps_the_client_store() {
    let (client, mut sweeper) = attach(SweepOptions::new());
    let mut events = client.events();

    let extend = client.items_extend(vec![pk("A")], None);
    let serve = async {
        let request = sweeper.expect_call("items_extend", json!(true)).await;
        request["params"]["items"][0].clone()
    };
    let (extended, sent) = tokio::join!(extend, serve);
    extended.unwrap();

    let clear = client.items_clear(None);
    let serve = sweeper.expect_call("items_clear", json!(true));
    let (cleared, _) = tokio::join!(clear, serve);
    cleared.unwrap();

    // A selection made before the sweeper observed the clear still
    // resolves to the original item.
    sweeper
        .notify("select", json!({"uid": "default", "items": [sent]}))
        .await;
    match events.next().await.unwrap() {
        SweepEvent::Select { items, .. } => assert_eq!(items, vec![pk("A")]),
        other => panic!("expected select, got {other:?}"),
    }
}

#[tokio::test]
async fn window_switch_tracks_current_and_close_drops_the_store() {
    let (client, mut sweeper) = attach(SweepOptions::new());
    let mut events = client.events();

    sweeper
        .notify("window_switched", json!({"from": "default", "to": "songs"}))
        .await;
    match events.next().await.unwrap() {
        SweepEvent::Window(window) => {
            assert_eq!(window.kind, SweepWindowKind::Switched);
            assert_eq!(window.uid_to, WindowId::from("songs"));
        }
        other => panic!("expected window event, got {other:?}"),
    }
    assert_eq!(client.current_window(), WindowId::from("songs"));

    // Items extended with no explicit uid now land in the songs window.
    let extend = client.items_extend(vec![pk("A")], None);
    let serve = async {
        let request = sweeper.expect_call("items_extend", json!(true)).await;
        assert_eq!(request["params"]["uid"], json!("songs"));
        request["params"]["items"][0].clone()
    };
    let (extended, sent) = tokio::join!(extend, serve);
    extended.unwrap();

    // Closing the window drops its store: the same wire item no longer
    // resolves to the submitted object.
    sweeper
        .notify("window_closed", json!({"from": "songs", "to": "default"}))
        .await;
    match events.next().await.unwrap() {
        SweepEvent::Window(window) => assert_eq!(window.kind, SweepWindowKind::Closed),
        other => panic!("expected window event, got {other:?}"),
    }
    sweeper
        .notify("select", json!({"uid": "songs", "items": [sent]}))
        .await;
    match events.next().await.unwrap() {
        SweepEvent::Select { items, .. } => assert!(items.is_empty()),
        other => panic!("expected select, got {other:?}"),
    }
}

#[tokio::test]
async fn bind_handler_result_becomes_a_selection() {
    let (client, mut sweeper) = attach(SweepOptions::new());
    let mut events = client.events();

    let bind = client.bind(
        "ctrl+q",
        "my.action",
        "My action",
        Some(Arc::new(|_sweep, _tag| {
            Box::pin(async move { Some(pk("handled")) })
        })),
        None,
    );
    let serve = async {
        let request = sweeper.expect_call("bind", json!(null)).await;
        assert_eq!(request["params"]["key"], json!("ctrl+q"));
        assert_eq!(request["params"]["tag"], json!("my.action"));
        assert_eq!(request["params"]["desc"], json!("My action"));
    };
    let (bound, _) = tokio::join!(bind, serve);
    bound.unwrap();

    sweeper
        .notify("bind", json!({"uid": "default", "tag": "my.action"}))
        .await;
    match events.next().await.unwrap() {
        SweepEvent::Select { items, .. } => assert_eq!(items, vec![pk("handled")]),
        other => panic!("expected select, got {other:?}"),
    }

    // Chords without a handler surface as bind events.
    sweeper
        .notify("bind", json!({"uid": "default", "tag": "other", "key": "ctrl+o"}))
        .await;
    match events.next().await.unwrap() {
        SweepEvent::Bind { tag, key, .. } => {
            assert_eq!(tag, "other");
            assert_eq!(key.as_deref(), Some("ctrl+o"));
        }
        other => panic!("expected bind, got {other:?}"),
    }
}

#[tokio::test]
async fn field_resolver_runs_at_most_once_per_ref() {
    let calls = Arc::new(AtomicI64::new(0));
    let resolver_calls = calls.clone();
    let options = SweepOptions::new().field_resolver(Arc::new(move |reference| {
        let calls = resolver_calls.clone();
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            (reference == 7).then(|| Field::new("X"))
        })
    }));
    let (_client, mut sweeper) = attach(options);

    sweeper.notify("field_missing", json!({"ref": 7})).await;
    let request = sweeper.expect_call("field_register", json!(7)).await;
    assert_eq!(request["params"]["ref"], json!(7));
    assert_eq!(request["params"]["field"]["text"], json!("X"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // A second identical miss does not invoke the resolver again.
    sweeper.notify("field_missing", json!({"ref": 7})).await;
    tick().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // A ref the resolver answered with None is not retried either.
    sweeper.notify("field_missing", json!({"ref": 8})).await;
    tick().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    sweeper.notify("field_missing", json!({"ref": 8})).await;
    tick().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn registered_refs_do_not_consult_the_resolver() {
    let calls = Arc::new(AtomicI64::new(0));
    let resolver_calls = calls.clone();
    let options = SweepOptions::new().field_resolver(Arc::new(move |_reference| {
        let calls = resolver_calls.clone();
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            None
        })
    }));
    let (client, mut sweeper) = attach(options);

    let known_field = Field::new("known");
    let register = client.field_register(&known_field, Some(3));
    let serve = sweeper.expect_call("field_register", json!(3));
    let (registered, _) = tokio::join!(register, serve);
    assert_eq!(registered.unwrap(), 3);

    sweeper.notify("field_missing", json!({"ref": 3})).await;
    tick().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn render_suppress_brackets_updates_exactly_once() {
    let (client, mut sweeper) = attach(SweepOptions::new());

    let scope = async {
        let guard = client.render_suppress(None).await.unwrap();
        client.query_set("one", None).await.unwrap();
        client.query_set("two", None).await.unwrap();
        drop(guard);
        // One more call proves nothing else was interleaved.
        client.query_get(None).await.unwrap()
    };
    let serve = async {
        let request = sweeper.expect_call("render_suppress", json!(null)).await;
        assert_eq!(request["params"]["suppress"], json!(true));
        sweeper.expect_call("query_set", json!(null)).await;
        sweeper.expect_call("query_set", json!(null)).await;
        let request = sweeper.recv().await;
        assert_eq!(
            request.get("method").and_then(Value::as_str),
            Some("render_suppress")
        );
        assert_eq!(request["params"]["suppress"], json!(false));
        sweeper.expect_call("query_get", json!("two")).await;
    };
    let (query, _) = tokio::join!(scope, serve);
    assert_eq!(query, "two");
}

#[tokio::test]
async fn render_suppress_releases_on_the_error_path() {
    let (client, mut sweeper) = attach(SweepOptions::new());

    let scope = async {
        let guard = client.render_suppress(None).await.unwrap();
        let result: Result<(), SweepError> = Err(SweepError::Terminated);
        drop(guard);
        result
    };
    let serve = async {
        let request = sweeper.expect_call("render_suppress", json!(null)).await;
        assert_eq!(request["params"]["suppress"], json!(true));
        let request = sweeper.recv().await;
        assert_eq!(request["params"]["suppress"], json!(false));
    };
    let (result, _) = tokio::join!(scope, serve);
    assert!(result.is_err());
}

#[tokio::test]
async fn quick_select_maps_selection_back_to_caller_items() {
    let (client, mut sweeper) = attach(SweepOptions::new());

    let select = client.quick_select(
        vec![pk("A"), pk("B")],
        QuickSelect::new().prompt("GOTO"),
    );
    let serve = async {
        let request = sweeper.recv().await;
        assert_eq!(request.get("method").and_then(Value::as_str), Some("quick_select"));
        let params = &request["params"];
        assert_eq!(params["prompt"], json!("GOTO"));
        // A fresh window uid is allocated when none is supplied.
        assert_eq!(params["uid"], json!("quick-select-0"));
        let items = params["items"].as_array().unwrap();
        assert_eq!(items[0]["__sweep_item_index"], json!(0));
        assert_eq!(items[1]["__sweep_item_index"], json!(1));
        sweeper.reply(&request, json!([items[1].clone()])).await;
    };
    let (selected, _) = tokio::join!(select, serve);
    assert_eq!(selected.unwrap(), vec![pk("B")]);

    // A caller-provided uid passes through untouched.
    let select = client.quick_select(
        vec![pk("A")],
        QuickSelect::new().window_uid("goto"),
    );
    let serve = async {
        let request = sweeper.recv().await;
        assert_eq!(request["params"]["uid"], json!("goto"));
        sweeper.reply(&request, json!([])).await;
    };
    let (selected, _) = tokio::join!(select, serve);
    assert!(selected.unwrap().is_empty());
}

#[tokio::test]
async fn window_switch_and_pop_speak_the_wire_protocol() {
    let (client, mut sweeper) = attach(SweepOptions::new());

    let switch = client.window_switch(WindowId::from("goto"), true);
    let serve = async {
        let request = sweeper.recv().await;
        assert_eq!(request.get("method").and_then(Value::as_str), Some("window_switch"));
        assert_eq!(request["params"]["uid"], json!("goto"));
        assert_eq!(request["params"]["close"], json!(true));
        sweeper.reply(&request, json!(true)).await;
    };
    let (created, _) = tokio::join!(switch, serve);
    assert!(created.unwrap());
    // The tracker only moves on the sweeper's window_switched notification.
    assert_eq!(client.current_window(), WindowId::default());

    let pop = client.window_pop();
    let serve = sweeper.expect_call("window_pop", json!(null));
    let (popped, _) = tokio::join!(pop, serve);
    popped.unwrap();
}

#[tokio::test]
async fn size_waits_for_the_first_resize() {
    let (client, mut sweeper) = attach(SweepOptions::new());

    let size = client.size();
    let serve = async {
        tick().await;
        sweeper
            .notify(
                "resize",
                json!({
                    "cells": {"height": 20, "width": 80},
                    "pixels": [400, 1600],
                    "pixels_per_cell": {"height": 20, "width": 20},
                }),
            )
            .await;
    };
    let (size, _) = tokio::join!(size, serve);
    let size = size.unwrap();
    assert_eq!(size.cells.height, 20);
    assert_eq!(size.pixels.width, 1600);

    // Afterwards the cached size answers immediately.
    let cached = tokio::time::timeout(Duration::from_millis(100), client.size())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cached, size);
    assert_eq!(
        size.cells_in_pixels(crate::client::Size { height: 2, width: 3 }),
        crate::client::Size { height: 40, width: 60 }
    );
}

#[tokio::test]
async fn prompt_set_with_nothing_to_send_is_a_local_noop() {
    let (client, mut sweeper) = attach(SweepOptions::new());
    client.prompt_set(None, None, None).await.unwrap();

    // The next frame on the wire is the footer update, not a prompt_set.
    let footer = View::from(Text::new("status"));
    let set = client.footer_set(Some(&footer), None);
    let serve = async {
        let request = sweeper.expect_call("footer_set", json!(null)).await;
        assert_eq!(request["params"]["footer"]["type"], json!("text"));
    };
    let (set, _) = tokio::join!(set, serve);
    set.unwrap();
}

#[tokio::test]
async fn spawn_connects_over_an_inherited_socket_pair() {
    // The fake sweeper owns the remote socket end as fd 0: it reads the
    // first request from it and writes the response back.
    let dir = tempfile::tempdir().unwrap();
    let script = write_fake_sweep(
        dir.path(),
        "#!/bin/sh\nread -r line\nprintf '{\"id\":0,\"result\":\"hello\"}\\n' >&0\n",
    );
    let options = SweepOptions::new().sweep(vec![script.to_string_lossy().into_owned()]);
    let client: Sweep<String> = Sweep::spawn(options).await.unwrap();
    assert_eq!(client.query_get(None).await.unwrap(), "hello");
    client.terminate().await;
}

#[tokio::test]
async fn terminate_ends_the_event_stream() {
    let (client, _sweeper) = attach(SweepOptions::new());
    let mut events = client.events();
    client.terminate().await;
    assert!(events.next().await.is_none());
    assert!(matches!(
        client.query_get(None).await,
        Err(SweepError::Terminated)
    ));
}
