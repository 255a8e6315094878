use manos_richdoc::{
    ARROW_LEFT_COMMAND, ARROW_RIGHT_COMMAND, BACKSPACE_COMMAND, DELETE_COMMAND, Editor,
    INSERT_LINE_BREAK_COMMAND, INSERT_PARAGRAPH_COMMAND, INSERT_TEXT_COMMAND, NodeKey, NodeKind,
    NodeType, Point, Selection, UpdateContext, UpdateError,
};
use serde_json::json;

fn clear_root(cx: &mut UpdateContext<'_>) -> Result<NodeKey, UpdateError> {
    let root = cx.root();
    for child in cx.tree().children(root).to_vec() {
        cx.remove_node(child)?;
    }
    Ok(root)
}

/// One paragraph per string, each with a single text run. Returns the text
/// keys.
fn editor_with(paragraphs: &[&str]) -> (Editor, Vec<NodeKey>) {
    let mut editor = Editor::with_richtext_plugins();
    let keys = editor
        .update(|cx| {
            let root = clear_root(cx)?;
            let mut keys = Vec::new();
            for text in paragraphs {
                let paragraph = cx.create_node(NodeKind::paragraph())?;
                let key = cx.create_node(NodeKind::text(*text))?;
                cx.append_child(paragraph, key)?;
                cx.append_child(root, paragraph)?;
                keys.push(key);
            }
            Ok(keys)
        })
        .unwrap();
    editor.clear_history();
    (editor, keys)
}

fn caret(editor: &mut Editor, point: Point) {
    editor
        .set_selection(Some(Selection::collapsed(point)))
        .unwrap();
}

fn caret_point(editor: &Editor) -> Point {
    editor
        .selection()
        .and_then(Selection::caret)
        .expect("collapsed selection")
}

#[test]
fn typing_inserts_at_the_caret() {
    let (mut editor, keys) = editor_with(&["hello"]);
    caret(&mut editor, Point::text(keys[0], 5));

    assert!(editor.dispatch(INSERT_TEXT_COMMAND, Some(json!(" world"))).unwrap());
    assert_eq!(editor.text_content(), "hello world");
    assert_eq!(caret_point(&editor), Point::text(keys[0], 11));

    // The object form of the payload is accepted too.
    assert!(
        editor
            .dispatch(INSERT_TEXT_COMMAND, Some(json!({ "text": "!" })))
            .unwrap()
    );
    assert_eq!(editor.text_content(), "hello world!");
}

#[test]
fn typing_over_a_range_replaces_it() {
    let (mut editor, keys) = editor_with(&["hello world"]);
    editor
        .set_selection(Some(Selection::range(
            Point::text(keys[0], 5),
            Point::text(keys[0], 0),
        )))
        .unwrap();

    assert!(editor.dispatch(INSERT_TEXT_COMMAND, Some(json!("bye"))).unwrap());
    assert_eq!(editor.text_content(), "bye world");
    let point = caret_point(&editor);
    assert_eq!(point.offset, 3);
    assert_eq!(editor.state().tree().text_content(point.key), "bye world");
}

#[test]
fn typing_without_a_selection_is_not_handled() {
    let (mut editor, _) = editor_with(&["x"]);
    assert!(!editor.dispatch(INSERT_TEXT_COMMAND, Some(json!("y"))).unwrap());
    assert!(!editor.dispatch(INSERT_TEXT_COMMAND, None).unwrap());
    assert_eq!(editor.text_content(), "x");
}

#[test]
fn deleting_across_paragraphs_merges_them() {
    let (mut editor, keys) = editor_with(&["one", "two", "three"]);
    editor
        .set_selection(Some(Selection::range(
            Point::text(keys[0], 1),
            Point::text(keys[2], 2),
        )))
        .unwrap();

    assert!(editor.dispatch(BACKSPACE_COMMAND, None).unwrap());
    assert_eq!(editor.text_content(), "oree");
    assert_eq!(editor.state().top_level().len(), 1);
    assert_eq!(caret_point(&editor), Point::text(keys[0], 1));
}

#[test]
fn enter_splits_the_paragraph() {
    let (mut editor, keys) = editor_with(&["hello"]);
    caret(&mut editor, Point::text(keys[0], 2));

    assert!(editor.dispatch(INSERT_PARAGRAPH_COMMAND, None).unwrap());
    assert_eq!(editor.text_content(), "he\n\nllo");

    let state = editor.state();
    let second = state.top_level()[1];
    let tail = state.tree().children(second)[0];
    assert_eq!(caret_point(&editor), Point::text(tail, 0));
}

#[test]
fn enter_at_the_end_opens_an_empty_paragraph() {
    let (mut editor, keys) = editor_with(&["hello"]);
    caret(&mut editor, Point::text(keys[0], 5));

    assert!(editor.dispatch(INSERT_PARAGRAPH_COMMAND, None).unwrap());
    let state = editor.state();
    assert_eq!(state.top_level().len(), 2);
    let second = state.top_level()[1];
    assert!(state.tree().children(second).is_empty());
    assert_eq!(caret_point(&editor), Point::element(second, 0));
}

#[test]
fn line_break_stays_inside_the_paragraph() {
    let (mut editor, keys) = editor_with(&["ab"]);
    caret(&mut editor, Point::text(keys[0], 1));

    assert!(editor.dispatch(INSERT_LINE_BREAK_COMMAND, None).unwrap());
    let state = editor.state();
    let paragraph = state.top_level()[0];
    let kinds: Vec<_> = state
        .tree()
        .children(paragraph)
        .iter()
        .map(|k| state.tree().node_type(*k).unwrap())
        .collect();
    assert_eq!(kinds, vec![NodeType::Text, NodeType::LineBreak, NodeType::Text]);
    assert_eq!(editor.text_content(), "a\nb");

    let tail = state.tree().children(paragraph)[2];
    assert_eq!(caret_point(&editor), Point::text(tail, 0));
}

#[test]
fn backspace_removes_whole_characters() {
    let (mut editor, keys) = editor_with(&["héllo"]);
    caret(&mut editor, Point::text(keys[0], 3));

    assert!(editor.dispatch(BACKSPACE_COMMAND, None).unwrap());
    assert_eq!(editor.text_content(), "hllo");
    assert_eq!(caret_point(&editor), Point::text(keys[0], 1));
}

#[test]
fn backspace_at_paragraph_start_merges_with_the_previous_one() {
    let (mut editor, keys) = editor_with(&["he", "llo"]);
    caret(&mut editor, Point::text(keys[1], 0));

    assert!(editor.dispatch(BACKSPACE_COMMAND, None).unwrap());
    assert_eq!(editor.text_content(), "hello");
    assert_eq!(editor.state().top_level().len(), 1);
    assert_eq!(caret_point(&editor), Point::text(keys[0], 2));
}

#[test]
fn delete_at_paragraph_end_pulls_the_next_one_in() {
    let (mut editor, keys) = editor_with(&["ab", "cd"]);
    caret(&mut editor, Point::text(keys[0], 2));

    assert!(editor.dispatch(DELETE_COMMAND, None).unwrap());
    assert_eq!(editor.text_content(), "abcd");
    assert_eq!(caret_point(&editor), Point::text(keys[0], 2));

    assert!(editor.dispatch(DELETE_COMMAND, None).unwrap());
    assert_eq!(editor.text_content(), "abd");
}

#[test]
fn backspace_at_document_start_is_not_handled() {
    let (mut editor, keys) = editor_with(&["x"]);
    caret(&mut editor, Point::text(keys[0], 0));
    editor.clear_history();

    assert!(!editor.dispatch(BACKSPACE_COMMAND, None).unwrap());
    assert_eq!(editor.text_content(), "x");
    assert!(!editor.can_undo());
}

#[test]
fn backspace_selects_a_decorator_before_removing_it() {
    let mut editor = Editor::with_richtext_plugins();
    let (equation, text) = editor
        .update(|cx| {
            let root = clear_root(cx)?;
            let paragraph = cx.create_node(NodeKind::paragraph())?;
            let equation = cx.create_node(NodeKind::equation("x^2", true))?;
            let text = cx.create_node(NodeKind::text("tail"))?;
            cx.append_children(paragraph, &[equation, text])?;
            cx.append_child(root, paragraph)?;
            cx.select_point(Point::text(text, 0));
            Ok((equation, text))
        })
        .unwrap();

    assert!(editor.dispatch(BACKSPACE_COMMAND, None).unwrap());
    assert_eq!(editor.selection(), Some(&Selection::node(equation)));
    assert!(editor.state().tree().contains(equation));

    assert!(editor.dispatch(BACKSPACE_COMMAND, None).unwrap());
    assert!(!editor.state().tree().contains(equation));
    assert_eq!(editor.text_content(), "tail");
    assert!(editor.state().tree().contains(text));
}

#[test]
fn arrows_move_through_text_and_across_paragraphs() {
    let (mut editor, keys) = editor_with(&["ab", "cd"]);
    caret(&mut editor, Point::text(keys[0], 1));

    assert!(editor.dispatch(ARROW_RIGHT_COMMAND, None).unwrap());
    assert_eq!(caret_point(&editor), Point::text(keys[0], 2));
    assert!(editor.dispatch(ARROW_RIGHT_COMMAND, None).unwrap());
    assert_eq!(caret_point(&editor), Point::text(keys[1], 0));
    assert!(editor.dispatch(ARROW_LEFT_COMMAND, None).unwrap());
    assert_eq!(caret_point(&editor), Point::text(keys[0], 2));
}

#[test]
fn arrows_stop_at_the_document_edges() {
    let (mut editor, keys) = editor_with(&["ab"]);
    caret(&mut editor, Point::text(keys[0], 0));
    assert!(!editor.dispatch(ARROW_LEFT_COMMAND, None).unwrap());
    caret(&mut editor, Point::text(keys[0], 2));
    assert!(!editor.dispatch(ARROW_RIGHT_COMMAND, None).unwrap());
}

#[test]
fn arrow_on_a_range_collapses_it_to_the_matching_edge() {
    let (mut editor, keys) = editor_with(&["abcdef"]);
    let range = Selection::range(Point::text(keys[0], 4), Point::text(keys[0], 1));

    editor.set_selection(Some(range.clone())).unwrap();
    assert!(editor.dispatch(ARROW_LEFT_COMMAND, None).unwrap());
    assert_eq!(caret_point(&editor), Point::text(keys[0], 1));

    editor.set_selection(Some(range)).unwrap();
    assert!(editor.dispatch(ARROW_RIGHT_COMMAND, None).unwrap());
    assert_eq!(caret_point(&editor), Point::text(keys[0], 4));
}

#[test]
fn edits_undo_one_command_at_a_time() {
    let (mut editor, keys) = editor_with(&["a"]);
    caret(&mut editor, Point::text(keys[0], 1));

    for text in ["b", "c"] {
        editor.dispatch(INSERT_TEXT_COMMAND, Some(json!(text))).unwrap();
    }
    editor.dispatch(INSERT_PARAGRAPH_COMMAND, None).unwrap();
    assert_eq!(editor.text_content(), "abc\n\n");

    assert!(editor.undo());
    assert_eq!(editor.text_content(), "abc");
    assert!(editor.undo());
    assert_eq!(editor.text_content(), "ab");
    assert!(editor.redo());
    assert_eq!(editor.text_content(), "abc");
}
