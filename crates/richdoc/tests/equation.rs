use manos_richdoc::{
    DomElement, DomNode, EQUATION_ATTR, Editor, INLINE_ATTR, INSERT_EQUATION_COMMAND, NodeKey,
    NodeKind, NodeType, Point, UpdateContext, UpdateError, escape_equation, export_dom,
    unescape_equation,
};
use serde_json::json;

fn clear_root(cx: &mut UpdateContext<'_>) -> Result<NodeKey, UpdateError> {
    let root = cx.root();
    for child in cx.tree().children(root).to_vec() {
        cx.remove_node(child)?;
    }
    Ok(root)
}

fn equations(editor: &Editor) -> Vec<(String, bool)> {
    let tree = editor.state().tree();
    tree.descendants(tree.root())
        .into_iter()
        .filter_map(|k| tree.get(k)?.as_equation().cloned())
        .map(|eq| (eq.equation().to_string(), eq.inline()))
        .collect()
}

fn round_trip(equation: &str, inline: bool) -> (String, bool) {
    let mut source = Editor::with_richtext_plugins();
    source
        .update(|cx| {
            let root = clear_root(cx)?;
            let paragraph = cx.create_node(NodeKind::paragraph())?;
            let node = cx.create_node(NodeKind::equation(equation, inline))?;
            if inline {
                cx.append_child(paragraph, node)?;
                cx.append_child(root, paragraph)
            } else {
                cx.append_children(root, &[node, paragraph])
            }
        })
        .unwrap();
    let dom: Vec<DomNode> = export_dom(source.state());

    let mut target = Editor::with_richtext_plugins();
    target
        .update(|cx| {
            let root = clear_root(cx)?;
            let keys = cx.import_dom(&dom)?;
            cx.append_children(root, &keys)
        })
        .unwrap();

    let found = equations(&target);
    assert_eq!(found.len(), 1, "exactly one equation survives the trip");
    found.into_iter().next().unwrap()
}

#[test]
fn dom_round_trip_preserves_source_and_inline_flag() {
    let cases = [
        (r"\frac{a}{b}", true),
        (r#"\text{say "hi"}"#, true),
        (r#"x = "quoted" + 'single'"#, false),
        (r"a < b \land c > d", false),
    ];
    for (equation, inline) in cases {
        assert_eq!(
            round_trip(equation, inline),
            (equation.to_string(), inline),
            "equation {equation:?}"
        );
    }
}

#[test]
fn export_writes_escaped_attribute_and_tag_by_mode() {
    let mut editor = Editor::with_richtext_plugins();
    editor
        .update(|cx| {
            let root = clear_root(cx)?;
            let paragraph = cx.create_node(NodeKind::paragraph())?;
            let inline = cx.create_node(NodeKind::equation(r#"a"b"#, true))?;
            cx.append_child(paragraph, inline)?;
            let block = cx.create_node(NodeKind::equation("c", false))?;
            cx.append_children(root, &[paragraph, block])
        })
        .unwrap();

    let dom = export_dom(editor.state());
    let paragraph = dom[0].as_element().unwrap();
    let span = paragraph.children[0].as_element().unwrap();
    assert_eq!(span.tag, "span");
    assert_eq!(span.get_attr(EQUATION_ATTR), Some("a&quot;b"));
    assert_eq!(span.get_attr(INLINE_ATTR), Some("true"));

    let div = dom[1].as_element().unwrap();
    assert_eq!(div.tag, "div");
    assert_eq!(div.get_attr(INLINE_ATTR), Some("false"));
}

#[test]
fn escape_only_touches_double_quotes() {
    assert_eq!(escape_equation(r#"<a href="x">&"#), r#"<a href=&quot;x&quot;>&"#);
    assert_eq!(unescape_equation("&quot;&amp;&quot;"), r#""&amp;""#);
}

#[test]
fn span_without_equation_attribute_imports_as_plain_text() {
    let mut editor = Editor::with_richtext_plugins();
    let html = DomNode::from(
        DomElement::new("p").child(
            DomElement::new("span")
                .attr(INLINE_ATTR, "true")
                .child(DomNode::text("x^2")),
        ),
    );
    editor
        .update(|cx| {
            let root = clear_root(cx)?;
            let keys = cx.import_dom(&[html])?;
            cx.append_children(root, &keys)
        })
        .unwrap();

    assert!(equations(&editor).is_empty());
    assert_eq!(editor.text_content(), "x^2");
}

#[test]
fn text_content_is_the_latex_source() {
    let mut editor = Editor::with_richtext_plugins();
    editor
        .update(|cx| {
            let root = clear_root(cx)?;
            let paragraph = cx.create_node(NodeKind::paragraph())?;
            let before = cx.create_node(NodeKind::text("area "))?;
            let eq = cx.create_node(NodeKind::equation(r"\pi r^2", true))?;
            cx.append_children(paragraph, &[before, eq])?;
            cx.append_child(root, paragraph)
        })
        .unwrap();

    assert_eq!(editor.text_content(), r"area \pi r^2");
}

#[test]
fn insert_equation_defaults_to_inline_at_the_caret() {
    let mut editor = Editor::with_richtext_plugins();
    editor
        .update(|cx| {
            let root = clear_root(cx)?;
            let paragraph = cx.create_node(NodeKind::paragraph())?;
            let text = cx.create_node(NodeKind::text("ab"))?;
            cx.append_child(paragraph, text)?;
            cx.append_child(root, paragraph)?;
            cx.select_point(Point::text(text, 1));
            Ok(())
        })
        .unwrap();

    assert!(
        editor
            .dispatch(INSERT_EQUATION_COMMAND, Some(json!({ "equation": "e=mc^2" })))
            .unwrap()
    );

    assert_eq!(equations(&editor), vec![("e=mc^2".to_string(), true)]);
    let tree = editor.state().tree();
    let paragraph = editor.state().top_level()[0];
    let kinds: Vec<_> = tree
        .children(paragraph)
        .iter()
        .map(|k| tree.node_type(*k).unwrap())
        .collect();
    assert_eq!(kinds, vec![NodeType::Text, NodeType::Equation, NodeType::Text]);
    assert_eq!(editor.text_content(), "ae=mc^2b");
}

#[test]
fn insert_block_equation_splits_the_paragraph() {
    let mut editor = Editor::with_richtext_plugins();
    editor
        .update(|cx| {
            let root = clear_root(cx)?;
            let paragraph = cx.create_node(NodeKind::paragraph())?;
            let text = cx.create_node(NodeKind::text("ab"))?;
            cx.append_child(paragraph, text)?;
            cx.append_child(root, paragraph)?;
            cx.select_point(Point::text(text, 1));
            Ok(())
        })
        .unwrap();

    let payload = json!({ "equation": "x", "inline": false, "showModal": false });
    assert!(editor.dispatch(INSERT_EQUATION_COMMAND, Some(payload)).unwrap());

    let tree = editor.state().tree();
    let kinds: Vec<_> = editor
        .state()
        .top_level()
        .iter()
        .map(|k| tree.node_type(*k).unwrap())
        .collect();
    assert_eq!(
        kinds,
        vec![NodeType::Paragraph, NodeType::Equation, NodeType::Paragraph]
    );
}

#[test]
fn insert_equation_updates_an_existing_node() {
    let mut editor = Editor::with_richtext_plugins();
    let key = editor
        .update(|cx| {
            let root = clear_root(cx)?;
            let paragraph = cx.create_node(NodeKind::paragraph())?;
            let eq = cx.create_node(NodeKind::equation("old", true))?;
            cx.append_child(paragraph, eq)?;
            cx.append_child(root, paragraph)?;
            Ok(eq)
        })
        .unwrap();

    let payload = json!({ "equation": "new", "nodeKeyToUpdate": key });
    assert!(editor.dispatch(INSERT_EQUATION_COMMAND, Some(payload)).unwrap());
    assert_eq!(equations(&editor), vec![("new".to_string(), true)]);
}

#[test]
fn insert_equation_without_source_is_left_to_the_ui() {
    let mut editor = Editor::with_richtext_plugins();
    let payload = json!({ "showModal": true });
    assert!(!editor.dispatch(INSERT_EQUATION_COMMAND, Some(payload)).unwrap());
    assert!(equations(&editor).is_empty());
}
