use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use manos_richdoc::{
    Editor, EditorConfig, NodeKey, NodeKind, NodeType, Point, Selection, TextFormat, TreeError,
    UpdateContext, UpdateError, core_plugins,
};

fn clear_root(cx: &mut UpdateContext<'_>) -> Result<NodeKey, UpdateError> {
    let root = cx.root();
    for child in cx.tree().children(root).to_vec() {
        cx.remove_node(child)?;
    }
    Ok(root)
}

/// Replaces the document with one paragraph per entry, each holding the
/// given text runs. Returns the text keys per paragraph.
fn set_paragraphs(editor: &mut Editor, paragraphs: &[&[&str]]) -> Vec<Vec<NodeKey>> {
    editor
        .update(|cx| {
            let root = clear_root(cx)?;
            let mut out = Vec::new();
            for runs in paragraphs {
                let paragraph = cx.create_node(NodeKind::paragraph())?;
                let mut keys = Vec::new();
                for run in *runs {
                    let text = cx.create_node(NodeKind::text(*run))?;
                    cx.append_child(paragraph, text)?;
                    keys.push(text);
                }
                cx.append_child(root, paragraph)?;
                out.push(keys);
            }
            Ok(out)
        })
        .unwrap()
}

#[test]
fn new_editor_holds_one_empty_paragraph() {
    let editor = Editor::with_richtext_plugins();
    let state = editor.state();
    assert_eq!(state.top_level().len(), 1);
    assert_eq!(
        state.tree().node_type(state.top_level()[0]),
        Some(NodeType::Paragraph)
    );
    assert!(editor.selection().is_none());
    assert!(!editor.can_undo());
}

#[test]
fn emptied_root_gets_a_paragraph_back() {
    let mut editor = Editor::with_core_plugins();
    editor
        .update(|cx| {
            clear_root(cx)?;
            Ok(())
        })
        .unwrap();
    assert_eq!(editor.state().top_level().len(), 1);
}

#[test]
fn adjacent_text_runs_merge_and_carry_the_caret() {
    let mut editor = Editor::with_core_plugins();
    editor
        .update(|cx| {
            let root = clear_root(cx)?;
            let paragraph = cx.create_node(NodeKind::paragraph())?;
            let a = cx.create_node(NodeKind::text("ab"))?;
            let b = cx.create_node(NodeKind::text("cd"))?;
            let bold = cx.create_node(NodeKind::formatted_text("ef", TextFormat::BOLD))?;
            cx.append_children(paragraph, &[a, b, bold])?;
            cx.append_child(root, paragraph)?;
            cx.select_point(Point::text(b, 1));
            Ok(())
        })
        .unwrap();

    let state = editor.state();
    let paragraph = state.top_level()[0];
    let runs = state.tree().children(paragraph);
    assert_eq!(runs.len(), 2);
    assert_eq!(state.tree().text_content(runs[0]), "abcd");
    assert_eq!(state.tree().text_content(runs[1]), "ef");
    assert_eq!(
        editor.selection(),
        Some(&Selection::collapsed(Point::text(runs[0], 3)))
    );
}

#[test]
fn empty_text_runs_are_dropped() {
    let mut editor = Editor::with_core_plugins();
    let keys = set_paragraphs(&mut editor, &[&["x", ""]]);
    assert!(!editor.state().tree().contains(keys[0][1]));
    assert_eq!(editor.text_content(), "x");
}

#[test]
fn unattached_nodes_are_collected_on_commit() {
    let mut editor = Editor::with_core_plugins();
    let stray = editor
        .update(|cx| cx.create_node(NodeKind::text("nowhere")))
        .unwrap();
    assert!(!editor.state().tree().contains(stray));
}

#[test]
fn diverging_transforms_abort_the_transaction() {
    let mut editor = Editor::with_core_plugins();
    editor.register_transform(NodeType::Text, |cx, key| {
        cx.mark_dirty(key);
        Ok(())
    });
    let before = editor.state().to_serialized();

    let err = editor
        .update(|cx| {
            let paragraph = cx.state().top_level()[0];
            let text = cx.create_node(NodeKind::text("loop"))?;
            cx.append_child(paragraph, text)
        })
        .unwrap_err();

    match err {
        UpdateError::TransformDiverged { iterations, pending } => {
            assert_eq!(iterations, 100);
            assert!(pending.iter().all(|(_, t)| *t == NodeType::Text));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(editor.state().to_serialized(), before);
    assert!(!editor.can_undo());
}

#[test]
fn iteration_cap_comes_from_config() {
    let config = EditorConfig {
        max_transform_iterations: 3,
        ..EditorConfig::default()
    };
    let mut editor = Editor::new(config, core_plugins()).unwrap();
    editor.register_transform(NodeType::Paragraph, |cx, key| {
        cx.mark_dirty(key);
        Ok(())
    });

    let err = editor
        .update(|cx| {
            let root = cx.root();
            let paragraph = cx.create_node(NodeKind::paragraph())?;
            cx.append_child(root, paragraph)
        })
        .unwrap_err();
    assert!(matches!(
        err,
        UpdateError::TransformDiverged { iterations: 3, .. }
    ));
}

#[test]
fn settling_transforms_run_until_clean() {
    let mut editor = Editor::with_core_plugins();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    editor.register_transform(NodeType::Text, move |cx, key| {
        counter.fetch_add(1, Ordering::SeqCst);
        let text = cx.node(key)?.as_text().map(|t| t.text.clone());
        if let Some(text) = text.filter(|t| t.chars().any(char::is_lowercase)) {
            cx.writable_text(key)?.text = text.to_uppercase();
        }
        Ok(())
    });

    set_paragraphs(&mut editor, &[&["shout"]]);
    assert_eq!(editor.text_content(), "SHOUT");
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn failing_transform_leaves_the_state_untouched() {
    let mut editor = Editor::with_core_plugins();
    editor.register_transform(NodeType::Text, |cx, key| {
        let text = cx.node(key)?.as_text().map(|t| t.text.clone());
        if text.is_some_and(|t| t.contains("forbidden")) {
            return Err(UpdateError::Failed("forbidden text".into()));
        }
        Ok(())
    });
    set_paragraphs(&mut editor, &[&["fine"]]);

    let err = editor
        .update(|cx| {
            let paragraph = cx.state().top_level()[0];
            let text = cx.create_node(NodeKind::text("forbidden"))?;
            cx.append_child(paragraph, text)
        })
        .unwrap_err();
    assert!(matches!(err, UpdateError::Failed(_)));
    assert_eq!(editor.text_content(), "fine");
}

#[test]
fn tree_errors_surface_from_updates() {
    let mut editor = Editor::with_core_plugins();
    let err = editor
        .update(|cx| {
            let root = cx.root();
            cx.remove_node(root)
        })
        .unwrap_err();
    assert!(matches!(err, UpdateError::Tree(TreeError::Root)));

    let err = editor
        .update(|cx| {
            let paragraph = cx.state().top_level()[0];
            let outer = cx.create_node(NodeKind::paragraph())?;
            cx.append_child(paragraph, outer)?;
            cx.append_child(outer, paragraph)
        })
        .unwrap_err();
    assert!(matches!(err, UpdateError::Tree(TreeError::Cycle { .. })));

    let err = editor
        .update(|cx| cx.create_node(NodeKind::equation("x", true)))
        .unwrap_err();
    assert!(matches!(
        err,
        UpdateError::UnregisteredNodeType(NodeType::Equation)
    ));
}

#[test]
fn nested_updates_share_one_transaction() {
    let mut editor = Editor::with_core_plugins();
    editor.clear_history();
    editor
        .update(|cx| {
            let paragraph = cx.state().top_level()[0];
            cx.update(|cx| {
                let text = cx.create_node(NodeKind::text("one"))?;
                cx.append_child(paragraph, text)
            })?;
            cx.update(|cx| {
                let text = cx.create_node(NodeKind::text(" two"))?;
                cx.append_child(paragraph, text)
            })
        })
        .unwrap();

    assert_eq!(editor.text_content(), "one two");
    assert!(editor.undo());
    assert!(!editor.can_undo());
    assert_eq!(editor.text_content(), "");
}

#[test]
fn undo_and_redo_walk_committed_states() {
    let mut editor = Editor::with_core_plugins();
    let keys = set_paragraphs(&mut editor, &[&["a"]]);
    let text = keys[0][0];
    editor.clear_history();

    for suffix in ["b", "c"] {
        editor
            .update(|cx| {
                cx.writable_text(text)?.text.push_str(suffix);
                Ok(())
            })
            .unwrap();
    }
    assert_eq!(editor.text_content(), "abc");

    assert!(editor.undo());
    assert_eq!(editor.text_content(), "ab");
    assert!(editor.undo());
    assert_eq!(editor.text_content(), "a");
    assert!(!editor.undo());

    assert!(editor.redo());
    assert_eq!(editor.text_content(), "ab");

    // A fresh edit drops the redo branch.
    editor
        .update(|cx| {
            cx.writable_text(text)?.text.push('z');
            Ok(())
        })
        .unwrap();
    assert!(!editor.can_redo());
    assert_eq!(editor.text_content(), "abz");
}

#[test]
fn history_is_capped_and_skips_selection_only_updates() {
    let config = EditorConfig {
        max_undo: 2,
        ..EditorConfig::default()
    };
    let mut editor = Editor::new(config, core_plugins()).unwrap();
    let keys = set_paragraphs(&mut editor, &[&["0"]]);
    let text = keys[0][0];

    for digit in ["1", "2", "3"] {
        editor
            .update(|cx| {
                cx.writable_text(text)?.text = digit.to_string();
                Ok(())
            })
            .unwrap();
    }
    editor
        .set_selection(Some(Selection::collapsed(Point::text(text, 1))))
        .unwrap();

    assert!(editor.undo());
    assert!(editor.undo());
    assert!(!editor.undo());
    assert_eq!(editor.text_content(), "1");
}

#[test]
fn history_can_be_switched_off() {
    let config: EditorConfig = serde_json::from_value(serde_json::json!({
        "namespace": "scratch",
        "history": false
    }))
    .unwrap();
    let mut editor = Editor::new(config, core_plugins()).unwrap();
    assert_eq!(editor.config().namespace, "scratch");
    assert_eq!(editor.config().max_undo, 200);

    set_paragraphs(&mut editor, &[&["no history"]]);
    assert!(!editor.can_undo());
}

#[test]
fn listeners_see_every_commit_and_history_step() {
    let mut editor = Editor::with_core_plugins();
    let seen: Arc<Mutex<Vec<String>>> = Arc::default();
    let sink = seen.clone();
    editor.register_update_listener(move |state| {
        sink.lock().unwrap().push(state.text_content());
    });

    set_paragraphs(&mut editor, &[&["one"]]);
    let failed = editor.update(|cx| -> Result<(), UpdateError> {
        let root = cx.root();
        cx.remove_node(root)
    });
    assert!(failed.is_err());
    editor.undo();
    editor.redo();

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["one".to_string(), String::new(), "one".to_string()]
    );
}

#[test]
fn selection_on_removed_nodes_is_repaired() {
    let mut editor = Editor::with_core_plugins();
    let keys = set_paragraphs(&mut editor, &[&["keep"], &["gone"]]);
    let doomed = keys[1][0];
    editor
        .set_selection(Some(Selection::range(
            Point::text(keys[0][0], 2),
            Point::text(doomed, 2),
        )))
        .unwrap();

    editor
        .update(|cx| {
            let paragraph = cx.tree().parent(doomed).unwrap();
            cx.remove_node(paragraph)
        })
        .unwrap();

    assert_eq!(
        editor.selection(),
        Some(&Selection::collapsed(Point::text(keys[0][0], 2)))
    );
}

#[test]
fn plugins_and_node_types_register_once() {
    let mut editor = Editor::with_core_plugins();
    let err = editor
        .register_plugin(Box::new(manos_richdoc::RichTextPlugin))
        .unwrap_err();
    assert!(matches!(
        err,
        manos_richdoc::PluginError::DuplicatePlugin("rich-text")
    ));
    assert!(editor.is_registered(NodeType::Paragraph));
    assert!(!editor.is_registered(NodeType::Image));
}
