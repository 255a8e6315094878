use std::cmp::Ordering;

use tracing::{debug, warn};

use crate::command::{
    ARROW_DOWN_COMMAND, ARROW_LEFT_COMMAND, ARROW_RIGHT_COMMAND, ARROW_UP_COMMAND, CommandPriority,
    DELETE_CHARACTER_BACKWARD_COMMAND, DELETE_CHARACTER_FORWARD_COMMAND,
    INSERT_COLLAPSIBLE_COMMAND, INSERT_PARAGRAPH_COMMAND, TOGGLE_COLLAPSIBLE_COMMAND,
    ToggleCollapsiblePayload, decode_payload,
};
use crate::core::UpdateContext;
use crate::dom::{DomConversion, DomConversionOutput, DomElement, DomNode};
use crate::error::{TreeError, UpdateError};
use crate::key::NodeKey;
use crate::node::{NodeKind, NodeType};
use crate::plugin::{CommandSpec, EditorPlugin, transform};
use crate::rich_text::{
    ensure_paragraph_child, insert_block_at_selection, merge_blocks, wrap_inline_runs,
};
use crate::selection::{
    Point, Selection, compare_points, end_point_of, is_point_at_end_of, is_point_at_start_of,
    ordered_points, start_point_of,
};
use crate::transform::TransformFn;
use crate::tree::Tree;

pub const TITLE_CLASS: &str = "Collapsible__title";
pub const CONTENT_CLASS: &str = "Collapsible__content";

pub struct CollapsiblePlugin;

impl EditorPlugin for CollapsiblePlugin {
    fn id(&self) -> &'static str {
        "collapsible"
    }

    fn node_types(&self) -> Vec<NodeType> {
        vec![
            NodeType::CollapsibleContainer,
            NodeType::CollapsibleTitle,
            NodeType::CollapsibleContent,
        ]
    }

    fn transforms(&self) -> Vec<(NodeType, TransformFn)> {
        vec![
            transform(NodeType::CollapsibleContainer, unwrap_malformed_container),
            transform(NodeType::CollapsibleTitle, replace_orphan_title),
            transform(NodeType::CollapsibleTitle, wrap_inline_runs),
            transform(NodeType::CollapsibleTitle, ensure_paragraph_child),
            transform(NodeType::CollapsibleContent, dissolve_orphan_content),
            transform(NodeType::CollapsibleContent, wrap_inline_runs),
            transform(NodeType::CollapsibleContent, ensure_paragraph_child),
        ]
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new(ARROW_DOWN_COMMAND, CommandPriority::Low, |cx, _| {
                Ok(escape_forward(cx)?)
            }),
            CommandSpec::new(ARROW_RIGHT_COMMAND, CommandPriority::Low, |cx, _| {
                Ok(escape_forward(cx)?)
            }),
            CommandSpec::new(ARROW_UP_COMMAND, CommandPriority::Low, |cx, _| {
                Ok(escape_backward(cx)?)
            }),
            CommandSpec::new(ARROW_LEFT_COMMAND, CommandPriority::Low, |cx, _| {
                Ok(escape_backward(cx)?)
            }),
            CommandSpec::new(
                DELETE_CHARACTER_BACKWARD_COMMAND,
                CommandPriority::Low,
                |cx, _| {
                    if dissolve_spanned_containers(cx)? {
                        return Ok(true);
                    }
                    Ok(collapse_at_title_start(cx)?)
                },
            ),
            CommandSpec::new(DELETE_CHARACTER_FORWARD_COMMAND, CommandPriority::Low, |cx, _| {
                Ok(dissolve_spanned_containers(cx)?)
            }),
            CommandSpec::new(INSERT_PARAGRAPH_COMMAND, CommandPriority::Low, |cx, _| {
                Ok(enter_in_title(cx)?)
            }),
            CommandSpec::new(INSERT_COLLAPSIBLE_COMMAND, CommandPriority::Low, |cx, _| {
                insert_collapsible(cx)?;
                Ok(true)
            })
            .description("Insert an open collapsible section with an empty title."),
            CommandSpec::new(TOGGLE_COLLAPSIBLE_COMMAND, CommandPriority::Low, |cx, payload| {
                let payload: ToggleCollapsiblePayload = decode_payload(payload)?;
                Ok(toggle_collapsible(cx, payload.key)?)
            }),
        ]
    }

    fn dom_conversions(&self) -> Vec<DomConversion> {
        vec![
            DomConversion::new("details", 1, convert_details),
            DomConversion::new("summary", 1, |_| {
                Some(DomConversionOutput::node(NodeKind::collapsible_title()))
            }),
            DomConversion::new("div", 1, |el| {
                if el.has_class(TITLE_CLASS) {
                    Some(DomConversionOutput::node(NodeKind::collapsible_title()))
                } else if el.has_class(CONTENT_CLASS) {
                    Some(DomConversionOutput::node(NodeKind::collapsible_content()))
                } else {
                    None
                }
            }),
        ]
    }
}

pub fn container_parts(tree: &Tree, container: NodeKey) -> Option<(NodeKey, NodeKey)> {
    match tree.children(container) {
        [title, content]
            if tree.node_type(*title) == Some(NodeType::CollapsibleTitle)
                && tree.node_type(*content) == Some(NodeType::CollapsibleContent) =>
        {
            Some((*title, *content))
        }
        _ => None,
    }
}

fn is_container(tree: &Tree, key: NodeKey) -> bool {
    tree.node_type(key) == Some(NodeType::CollapsibleContainer)
}

fn unwrap_malformed_container(cx: &mut UpdateContext<'_>, key: NodeKey) -> Result<(), UpdateError> {
    if container_parts(cx.tree(), key).is_none() {
        debug!(%key, children = cx.tree().children(key).len(), "unwrapping malformed collapsible");
        cx.unwrap_node(key)?;
    }
    Ok(())
}

fn replace_orphan_title(cx: &mut UpdateContext<'_>, key: NodeKey) -> Result<(), UpdateError> {
    let tree = cx.tree();
    let in_place = tree
        .parent(key)
        .is_some_and(|parent| is_container(tree, parent) && tree.index_in_parent(key) == Some(0));
    if in_place {
        return Ok(());
    }
    let paragraph = cx.create_node(NodeKind::paragraph())?;
    cx.replace_node(key, paragraph, true)
}

fn dissolve_orphan_content(cx: &mut UpdateContext<'_>, key: NodeKey) -> Result<(), UpdateError> {
    let tree = cx.tree();
    let in_place = tree
        .parent(key)
        .is_some_and(|parent| is_container(tree, parent) && tree.index_in_parent(key) == Some(1));
    if !in_place {
        cx.unwrap_node(key)?;
    }
    Ok(())
}

fn caret(cx: &UpdateContext<'_>) -> Option<Point> {
    cx.selection().and_then(Selection::caret)
}

fn insert_paragraph_next_to(
    cx: &mut UpdateContext<'_>,
    container: NodeKey,
    after: bool,
) -> Result<(), UpdateError> {
    let paragraph = cx.create_node(NodeKind::paragraph())?;
    if after {
        cx.insert_after(container, paragraph)?;
    } else {
        cx.insert_before(container, paragraph)?;
    }
    cx.select_point(Point::element(paragraph, 0));
    Ok(())
}

/// Arrow down/right out of a container that ends its parent: a fresh
/// paragraph is created after it.
fn escape_forward(cx: &mut UpdateContext<'_>) -> Result<bool, UpdateError> {
    let Some(point) = caret(cx) else {
        return Ok(false);
    };
    let tree = cx.tree();

    // Caret right after a trailing container.
    if tree.kind(point.key).is_some_and(NodeKind::is_element) {
        let children = tree.children(point.key);
        if point.offset == children.len() {
            if let Some(last) = children.last().copied().filter(|k| is_container(tree, *k)) {
                insert_paragraph_next_to(cx, last, true)?;
                return Ok(true);
            }
        }
    }

    let Some(container) = tree.nearest_of_type(point.key, NodeType::CollapsibleContainer) else {
        return Ok(false);
    };
    if tree.next_sibling(container).is_some() || tree.parent(container).is_none() {
        return Ok(false);
    }
    let Some((title, content)) = container_parts(tree, container) else {
        return Ok(false);
    };
    let open = tree.get(container).and_then(|n| n.is_open()).unwrap_or(true);
    let last_part = if open { content } else { title };
    if !is_point_at_end_of(tree, &point, last_part) {
        return Ok(false);
    }
    insert_paragraph_next_to(cx, container, true)?;
    Ok(true)
}

fn escape_backward(cx: &mut UpdateContext<'_>) -> Result<bool, UpdateError> {
    let Some(point) = caret(cx) else {
        return Ok(false);
    };
    let tree = cx.tree();

    if point.offset == 0 && tree.kind(point.key).is_some_and(NodeKind::is_element) {
        if let Some(first) = tree
            .first_child(point.key)
            .filter(|k| is_container(tree, *k))
        {
            insert_paragraph_next_to(cx, first, false)?;
            return Ok(true);
        }
    }

    let Some(container) = tree.nearest_of_type(point.key, NodeType::CollapsibleContainer) else {
        return Ok(false);
    };
    if tree.previous_sibling(container).is_some() || tree.parent(container).is_none() {
        return Ok(false);
    }
    let Some((title, _)) = container_parts(tree, container) else {
        return Ok(false);
    };
    if !is_point_at_start_of(tree, &point, title) {
        return Ok(false);
    }
    insert_paragraph_next_to(cx, container, false)?;
    Ok(true)
}

fn dissolve(cx: &mut UpdateContext<'_>, container: NodeKey) -> Result<Vec<NodeKey>, UpdateError> {
    let parts: Vec<NodeKey> = cx.tree().children(container).to_vec();
    let mut extracted = Vec::new();
    for part in parts {
        let children = cx.tree().children(part).to_vec();
        for child in children {
            cx.insert_before(container, child)?;
            extracted.push(child);
        }
    }
    cx.remove_node(container)?;
    Ok(extracted)
}

/// Backspace at the very start of a title turns the container back into
/// plain blocks. The first title block merges into a preceding paragraph
/// when there is one. If extraction or the merge fails, that step is rolled
/// back and the caret lands at the start of the first title block.
fn collapse_at_title_start(cx: &mut UpdateContext<'_>) -> Result<bool, UpdateError> {
    collapse_title_with(cx, dissolve, merge_blocks)
}

fn collapse_title_with(
    cx: &mut UpdateContext<'_>,
    dissolve: impl FnOnce(&mut UpdateContext<'_>, NodeKey) -> Result<Vec<NodeKey>, UpdateError>,
    merge: impl FnOnce(&mut UpdateContext<'_>, NodeKey, NodeKey) -> Result<Point, UpdateError>,
) -> Result<bool, UpdateError> {
    let Some(point) = caret(cx) else {
        return Ok(false);
    };
    let tree = cx.tree();
    let Some(title) = tree.nearest_of_type(point.key, NodeType::CollapsibleTitle) else {
        return Ok(false);
    };
    let Some(container) = tree.parent(title).filter(|p| is_container(tree, *p)) else {
        return Ok(false);
    };
    if !is_point_at_start_of(tree, &point, title) {
        return Ok(false);
    }
    let previous = tree
        .previous_sibling(container)
        .filter(|k| tree.kind(*k).is_some_and(NodeKind::can_hold_inline));
    let parent = tree.parent(container).ok_or(TreeError::Detached(container))?;
    let index = tree.index_in_parent(container).unwrap_or(0);
    let first_block = tree.first_child(title);
    let fallback = Point::element(parent, index);

    let checkpoint = cx.checkpoint();
    let extracted = match dissolve(cx, container) {
        Ok(extracted) => extracted,
        Err(err) => {
            warn!(error = %err, "dissolving collapsible failed; caret moved to the title");
            cx.restore(checkpoint);
            let caret = start_or(cx.tree(), first_block, fallback);
            cx.select_point(caret);
            return Ok(true);
        }
    };

    let mergeable = extracted
        .first()
        .copied()
        .filter(|k| cx.tree().kind(*k).is_some_and(NodeKind::can_hold_inline));
    let (Some(previous), Some(first)) = (previous, mergeable) else {
        let caret = start_or(cx.tree(), first_block, fallback);
        cx.select_point(caret);
        return Ok(true);
    };

    let checkpoint = cx.checkpoint();
    if let Err(err) = merge(cx, previous, first) {
        warn!(error = %err, "merging collapsed title failed; caret moved to the extracted content");
        cx.restore(checkpoint);
        let caret = start_or(cx.tree(), first_block, fallback);
        cx.select_point(caret);
    }
    Ok(true)
}

fn start_or(tree: &Tree, key: Option<NodeKey>, fallback: Point) -> Point {
    key.and_then(|key| start_point_of(tree, key))
        .unwrap_or(fallback)
}

/// A non-collapsed selection touching a container in more than one part
/// dissolves that container instead of deleting its content.
fn dissolve_spanned_containers(cx: &mut UpdateContext<'_>) -> Result<bool, UpdateError> {
    let Some(Selection::Range { anchor, focus }) = cx.selection().cloned() else {
        return Ok(false);
    };
    if anchor == focus {
        return Ok(false);
    }
    let tree = cx.tree();
    let (start, end) = ordered_points(tree, anchor, focus);
    let inside = |ancestor: NodeKey, key: NodeKey| ancestor == key || tree.is_ancestor(ancestor, key);

    let spanned: Vec<NodeKey> = tree
        .descendants(tree.root())
        .into_iter()
        .filter(|k| is_container(tree, *k))
        .filter(|container| {
            let (Some(first), Some(last)) = (
                start_point_of(tree, *container),
                end_point_of(tree, *container),
            ) else {
                return false;
            };
            let overlaps = compare_points(tree, &start, &last) != Some(Ordering::Greater)
                && compare_points(tree, &first, &end) != Some(Ordering::Greater);
            if !overlaps {
                return false;
            }
            let within_one_part = tree
                .children(*container)
                .iter()
                .any(|part| inside(*part, start.key) && inside(*part, end.key));
            !within_one_part
        })
        .collect();

    if spanned.is_empty() {
        return Ok(false);
    }
    for container in spanned {
        if cx.tree().is_attached(container) {
            dissolve(cx, container)?;
        }
    }
    Ok(true)
}

/// Enter in a title never adds a title line; it opens the container and
/// moves into the body.
fn enter_in_title(cx: &mut UpdateContext<'_>) -> Result<bool, UpdateError> {
    let Some(focus) = cx.selection().and_then(Selection::focus) else {
        return Ok(false);
    };
    let tree = cx.tree();
    let Some(title) = tree.nearest_of_type(focus.key, NodeType::CollapsibleTitle) else {
        return Ok(false);
    };
    let Some(container) = tree.parent(title).filter(|p| is_container(tree, *p)) else {
        return Ok(false);
    };
    let Some((_, content)) = container_parts(tree, container) else {
        return Ok(false);
    };
    cx.set_collapsible_open(container, true)?;
    let caret = end_point_of(cx.tree(), content).unwrap_or(Point::element(content, 0));
    cx.select_point(caret);
    Ok(true)
}

fn insert_collapsible(cx: &mut UpdateContext<'_>) -> Result<NodeKey, UpdateError> {
    let container = cx.create_node(NodeKind::collapsible_container(true))?;
    let title = cx.create_node(NodeKind::collapsible_title())?;
    let title_paragraph = cx.create_node(NodeKind::paragraph())?;
    let content = cx.create_node(NodeKind::collapsible_content())?;
    let content_paragraph = cx.create_node(NodeKind::paragraph())?;
    cx.append_child(title, title_paragraph)?;
    cx.append_child(content, content_paragraph)?;
    cx.append_children(container, &[title, content])?;
    insert_block_at_selection(cx, container)?;
    cx.select_point(Point::element(title_paragraph, 0));
    Ok(container)
}

fn toggle_collapsible(
    cx: &mut UpdateContext<'_>,
    key: Option<NodeKey>,
) -> Result<bool, UpdateError> {
    let tree = cx.tree();
    let container = match key {
        Some(key) => Some(key).filter(|k| is_container(tree, *k)),
        None => cx
            .selection()
            .and_then(Selection::focus)
            .and_then(|focus| tree.nearest_of_type(focus.key, NodeType::CollapsibleContainer)),
    };
    let Some(container) = container else {
        return Ok(false);
    };
    let open = !tree.get(container).and_then(|n| n.is_open()).unwrap_or(true);
    let parts = container_parts(tree, container);
    let focus_in_content = match (parts, cx.selection().and_then(Selection::focus)) {
        (Some((_, content)), Some(focus)) => {
            focus.key == content || tree.is_ancestor(content, focus.key)
        }
        _ => false,
    };

    cx.set_collapsible_open(container, open)?;
    if !open && focus_in_content {
        if let Some((title, _)) = parts {
            let caret = end_point_of(cx.tree(), title).unwrap_or(Point::element(title, 0));
            cx.select_point(caret);
        }
    }
    Ok(true)
}

fn convert_details(el: &DomElement) -> Option<DomConversionOutput> {
    let mut title: Option<DomNode> = None;
    let mut rest: Vec<DomNode> = Vec::new();
    for child in &el.children {
        match child {
            DomNode::Text(text) if text.trim().is_empty() => {}
            DomNode::Element(child_el)
                if title.is_none()
                    && (child_el.tag == "summary" || child_el.has_class(TITLE_CLASS)) =>
            {
                title = Some(child.clone());
            }
            other => rest.push(other.clone()),
        }
    }
    let title = title.unwrap_or_else(|| DomElement::new("summary").into());
    let single_content = matches!(
        rest.as_slice(),
        [DomNode::Element(only)] if only.has_class(CONTENT_CLASS)
    );
    let content = if single_content {
        rest.remove(0)
    } else {
        DomElement::new("div")
            .attr("class", CONTENT_CLASS)
            .children(rest)
            .into()
    };
    Some(DomConversionOutput::Node {
        kind: NodeKind::collapsible_container(el.has_attr("open")),
        children: Some(vec![title, content]),
    })
}
