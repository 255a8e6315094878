use std::sync::{Arc, Mutex};

use manos_richdoc::{
    CommandDispatcher, CommandError, CommandPriority, Editor, InsertEquationPayload, NodeKind,
    decode_payload,
};
use serde_json::json;

type Log = Arc<Mutex<Vec<&'static str>>>;

fn logging(
    editor: &mut Editor,
    log: &Log,
    name: &'static str,
    priority: CommandPriority,
    handled: bool,
) {
    let log = log.clone();
    editor.register_command("custom", priority, move |_, _| {
        log.lock().unwrap().push(name);
        Ok(handled)
    });
}

#[test]
fn handlers_run_from_highest_priority_down() {
    let mut editor = Editor::with_core_plugins();
    let log = Log::default();
    logging(&mut editor, &log, "low", CommandPriority::Low, false);
    logging(&mut editor, &log, "critical", CommandPriority::Critical, false);
    logging(&mut editor, &log, "editor", CommandPriority::Editor, false);
    logging(&mut editor, &log, "normal", CommandPriority::Normal, false);
    logging(&mut editor, &log, "high", CommandPriority::High, false);

    assert!(!editor.dispatch("custom", None).unwrap());
    assert_eq!(
        *log.lock().unwrap(),
        vec!["critical", "high", "normal", "low", "editor"]
    );
}

#[test]
fn equal_priorities_keep_registration_order() {
    let mut editor = Editor::with_core_plugins();
    let log = Log::default();
    logging(&mut editor, &log, "first", CommandPriority::Normal, false);
    logging(&mut editor, &log, "second", CommandPriority::Normal, false);

    editor.dispatch("custom", None).unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
}

#[test]
fn a_handled_command_stops_propagation() {
    let mut editor = Editor::with_core_plugins();
    let log = Log::default();
    logging(&mut editor, &log, "low", CommandPriority::Low, true);
    logging(&mut editor, &log, "high", CommandPriority::High, true);

    assert!(editor.dispatch("custom", None).unwrap());
    assert_eq!(*log.lock().unwrap(), vec!["high"]);
}

#[test]
fn failing_handlers_are_rolled_back_and_skipped() {
    let mut editor = Editor::with_core_plugins();
    editor.register_command("custom", CommandPriority::High, |cx, _| {
        let root = cx.root();
        let paragraph = cx.create_node(NodeKind::paragraph())?;
        cx.append_child(root, paragraph)?;
        cx.set_selection(None);
        Err(CommandError::new("boom"))
    });
    editor.register_command("custom", CommandPriority::Low, |cx, _| {
        Ok(cx.state().top_level().len() == 1)
    });

    assert!(editor.dispatch("custom", None).unwrap());
    assert_eq!(editor.state().top_level().len(), 1);
}

#[test]
fn payload_reaches_every_handler() {
    let mut editor = Editor::with_core_plugins();
    let seen: Arc<Mutex<Vec<String>>> = Arc::default();
    for priority in [CommandPriority::High, CommandPriority::Low] {
        let seen = seen.clone();
        editor.register_command("custom", priority, move |_, payload| {
            let word = payload
                .and_then(|v| v.as_str())
                .ok_or_else(|| CommandError::new("expected a string"))?;
            seen.lock().unwrap().push(word.to_string());
            Ok(false)
        });
    }

    editor.dispatch("custom", Some(json!("hi"))).unwrap();
    assert!(!editor.dispatch("custom", Some(json!(1))).unwrap());
    assert_eq!(*seen.lock().unwrap(), vec!["hi", "hi"]);
}

#[test]
fn unregistered_handlers_no_longer_run() {
    let mut editor = Editor::with_core_plugins();
    let handle = editor.register_command("custom", CommandPriority::Normal, |_, _| Ok(true));
    assert_eq!(handle.command(), "custom");
    assert!(editor.dispatch("custom", None).unwrap());

    assert!(editor.unregister_command(handle.clone()));
    assert!(!editor.unregister_command(handle));
    assert!(!editor.dispatch("custom", None).unwrap());
}

#[test]
fn editors_do_not_share_registrations() {
    let mut a = Editor::with_core_plugins();
    let mut b = Editor::with_core_plugins();
    a.register_command("custom", CommandPriority::Normal, |_, _| Ok(true));

    assert!(a.dispatch("custom", None).unwrap());
    assert!(!b.dispatch("custom", None).unwrap());
}

#[test]
fn unknown_commands_are_not_handled_and_leave_no_history() {
    let mut editor = Editor::with_core_plugins();
    assert!(!editor.dispatch("no-such-command", None).unwrap());
    assert!(!editor.can_undo());
}

#[test]
fn handlers_can_dispatch_within_the_same_transaction() {
    let mut editor = Editor::with_core_plugins();
    editor.register_command("outer", CommandPriority::Normal, |cx, _| {
        let paragraph = cx.state().top_level()[0];
        cx.select_point(manos_richdoc::Point::element(paragraph, 0));
        Ok(cx.dispatch("insert-text", Some(&json!("nested"))))
    });
    editor.clear_history();

    assert!(editor.dispatch("outer", None).unwrap());
    assert_eq!(editor.text_content(), "nested");
    assert!(editor.undo());
    assert!(!editor.can_undo());
}

#[test]
fn dispatcher_tracks_handler_counts() {
    let mut dispatcher = CommandDispatcher::default();
    assert!(!dispatcher.has_handlers("custom"));
    let first = dispatcher.register("custom", CommandPriority::Low, |_, _| Ok(false));
    dispatcher.register("custom", CommandPriority::High, |_, _| Ok(true));
    assert_eq!(dispatcher.handler_count("custom"), 2);

    assert!(dispatcher.unregister(first));
    assert_eq!(dispatcher.handler_count("custom"), 1);
    assert!(dispatcher.has_handlers("custom"));
}

#[test]
fn payload_decoding_defaults_and_reports_errors() {
    let empty: InsertEquationPayload = decode_payload(None).unwrap();
    assert_eq!(empty, InsertEquationPayload::default());
    let null: InsertEquationPayload = decode_payload(Some(&json!(null))).unwrap();
    assert_eq!(null, InsertEquationPayload::default());

    let full: InsertEquationPayload = decode_payload(Some(&json!({
        "equation": "x",
        "inline": false,
        "showModal": true
    })))
    .unwrap();
    assert_eq!(full.equation.as_deref(), Some("x"));
    assert_eq!(full.inline, Some(false));
    assert!(full.show_modal);

    let err = decode_payload::<InsertEquationPayload>(Some(&json!({ "inline": "yes" })))
        .unwrap_err();
    assert!(err.message().starts_with("Invalid command payload"));
}
