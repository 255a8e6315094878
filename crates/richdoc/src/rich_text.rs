use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde_json::Value;

use crate::command::{
    ARROW_LEFT_COMMAND, ARROW_RIGHT_COMMAND, CommandError, CommandPriority,
    DELETE_CHARACTER_BACKWARD_COMMAND, DELETE_CHARACTER_FORWARD_COMMAND,
    INSERT_LINE_BREAK_COMMAND, INSERT_PARAGRAPH_COMMAND, INSERT_TEXT_COMMAND,
};
use crate::core::UpdateContext;
use crate::dom::{DomConversion, base_conversions};
use crate::error::{TreeError, UpdateError};
use crate::key::NodeKey;
use crate::node::{NodeKind, NodeType, clamp_to_char_boundary};
use crate::plugin::{CommandSpec, EditorPlugin, transform};
use crate::selection::{
    Point, PointType, Selection, end_point_of, first_point, is_point_at_end_of,
    is_point_at_start_of, ordered_points, point_after, point_before, start_point_of,
};
use crate::transform::TransformFn;
use crate::tree::Tree;

pub struct RichTextPlugin;

impl EditorPlugin for RichTextPlugin {
    fn id(&self) -> &'static str {
        "rich-text"
    }

    fn node_types(&self) -> Vec<NodeType> {
        vec![
            NodeType::Root,
            NodeType::Paragraph,
            NodeType::Text,
            NodeType::LineBreak,
        ]
    }

    fn transforms(&self) -> Vec<(NodeType, TransformFn)> {
        vec![
            transform(NodeType::Root, wrap_inline_runs),
            transform(NodeType::Root, ensure_root_not_empty),
            transform(NodeType::Paragraph, unwrap_nested_paragraph),
            transform(NodeType::Paragraph, lift_block_children),
            transform(NodeType::Text, normalize_text),
        ]
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new(INSERT_TEXT_COMMAND, CommandPriority::Editor, |cx, payload| {
                let text = payload
                    .and_then(Value::as_str)
                    .or_else(|| payload.and_then(|v| v.get("text")).and_then(Value::as_str))
                    .ok_or_else(|| CommandError::new("Missing text payload"))?;
                Ok(insert_text(cx, text)?)
            })
            .description("Insert text at the selection, replacing a range."),
            CommandSpec::new(INSERT_PARAGRAPH_COMMAND, CommandPriority::Editor, |cx, _| {
                Ok(insert_paragraph(cx)?)
            })
            .description("Split the current paragraph at the caret."),
            CommandSpec::new(INSERT_LINE_BREAK_COMMAND, CommandPriority::Editor, |cx, _| {
                Ok(insert_line_break(cx)?)
            }),
            CommandSpec::new(
                DELETE_CHARACTER_BACKWARD_COMMAND,
                CommandPriority::Editor,
                |cx, _| Ok(delete_character(cx, true)?),
            ),
            CommandSpec::new(
                DELETE_CHARACTER_FORWARD_COMMAND,
                CommandPriority::Editor,
                |cx, _| Ok(delete_character(cx, false)?),
            ),
            CommandSpec::new(ARROW_LEFT_COMMAND, CommandPriority::Editor, |cx, _| {
                Ok(move_caret(cx, true)?)
            }),
            CommandSpec::new(ARROW_RIGHT_COMMAND, CommandPriority::Editor, |cx, _| {
                Ok(move_caret(cx, false)?)
            }),
        ]
    }

    fn dom_conversions(&self) -> Vec<DomConversion> {
        base_conversions()
    }
}

fn is_inline(tree: &Tree, key: NodeKey) -> bool {
    tree.kind(key).is_some_and(NodeKind::is_inline)
}

fn can_hold_inline(tree: &Tree, key: NodeKey) -> bool {
    tree.kind(key).is_some_and(NodeKind::can_hold_inline)
}

fn is_decorator(tree: &Tree, key: NodeKey) -> bool {
    tree.kind(key).is_some_and(NodeKind::is_decorator)
}

/// Root and collapsible content: the places a block can be inserted into.
pub(crate) fn is_shadow_root(tree: &Tree, key: NodeKey) -> bool {
    matches!(
        tree.node_type(key),
        Some(NodeType::Root | NodeType::CollapsibleContent)
    )
}

pub(crate) fn inline_block_of(tree: &Tree, key: NodeKey) -> Option<NodeKey> {
    tree.find_ancestor_or_self(key, |node| node.kind().can_hold_inline())
}

pub(crate) fn current_block(tree: &Tree, key: NodeKey) -> Option<NodeKey> {
    let mut current = key;
    loop {
        let parent = tree.parent(current)?;
        if is_shadow_root(tree, parent) {
            return Some(current);
        }
        current = parent;
    }
}

fn inline_blocks(tree: &Tree) -> Vec<NodeKey> {
    tree.descendants(tree.root())
        .into_iter()
        .filter(|k| can_hold_inline(tree, *k))
        .collect()
}

fn prev_char_boundary(s: &str, ix: usize) -> usize {
    s[..ix].char_indices().next_back().map(|(i, _)| i).unwrap_or(0)
}

fn next_char_boundary(s: &str, ix: usize) -> usize {
    s[ix..]
        .chars()
        .next()
        .map(|c| ix + c.len_utf8())
        .unwrap_or(s.len())
}

/// Caret position right after the child at `index - 1` of `parent`.
pub(crate) fn point_at(tree: &Tree, parent: NodeKey, index: usize) -> Point {
    if let Some(prev) = index.checked_sub(1).and_then(|i| tree.children(parent).get(i)) {
        if let Some(text) = tree.get(*prev).and_then(|n| n.as_text()) {
            return Point::text(*prev, text.text.len());
        }
    }
    Point::element(parent, index)
}

pub(crate) fn move_points(cx: &mut UpdateContext<'_>, from: NodeKey, to: Point) {
    if let Some(Selection::Range { mut anchor, mut focus }) = cx.selection().cloned() {
        let mut changed = false;
        for point in [&mut anchor, &mut focus] {
            if point.key == from {
                *point = to;
                changed = true;
            }
        }
        if changed {
            cx.set_selection(Some(Selection::Range { anchor, focus }));
        }
    }
}

/// Splits the text under `point` so something can be inserted there.
/// Returns the parent and child index of the insertion position.
pub(crate) fn split_inline_at(
    cx: &mut UpdateContext<'_>,
    point: Point,
) -> Result<(NodeKey, usize), UpdateError> {
    if point.kind == PointType::Element {
        let len = cx.tree().children(point.key).len();
        return Ok((point.key, point.offset.min(len)));
    }
    let tree = cx.tree();
    let parent = tree
        .parent(point.key)
        .ok_or(TreeError::Detached(point.key))?;
    let ix = tree
        .index_in_parent(point.key)
        .ok_or(TreeError::Detached(point.key))?;
    let len = cx.node(point.key)?.text_len();
    if point.offset == 0 {
        return Ok((parent, ix));
    }
    if point.offset >= len {
        return Ok((parent, ix + 1));
    }
    let tail = cx.writable_text(point.key)?.split_off(point.offset);
    let tail_key = cx.create_node(NodeKind::Text(tail))?;
    cx.insert_after(point.key, tail_key)?;
    Ok((parent, ix + 1))
}

fn collapse_selection(cx: &mut UpdateContext<'_>) -> Result<Option<Point>, UpdateError> {
    match cx.selection().cloned() {
        None => Ok(None),
        Some(Selection::Node(keys)) => remove_selected_nodes(cx, &keys).map(Some),
        Some(Selection::Range { anchor, focus }) if anchor == focus => Ok(Some(anchor)),
        Some(Selection::Range { anchor, focus }) => delete_range(cx, anchor, focus).map(Some),
    }
}

fn remove_selected_nodes(
    cx: &mut UpdateContext<'_>,
    keys: &BTreeSet<NodeKey>,
) -> Result<Point, UpdateError> {
    let mut live: Vec<NodeKey> = keys
        .iter()
        .copied()
        .filter(|k| cx.tree().is_attached(*k) && *k != cx.root())
        .collect();
    live.sort_by_key(|k| cx.tree().path_to(*k));
    let Some(first) = live.first().copied() else {
        let point = first_point(cx.tree());
        cx.select_point(point);
        return Ok(point);
    };
    let parent = cx
        .tree()
        .parent(first)
        .ok_or(TreeError::Detached(first))?;
    let ix = cx.tree().index_in_parent(first).unwrap_or(0);
    for key in &live {
        cx.remove_node(*key)?;
    }
    let point = point_at(cx.tree(), parent, ix);
    cx.select_point(point);
    Ok(point)
}

/// Deletes everything between two points and merges the block holding the
/// end into the block holding the start. Returns the resulting caret.
pub(crate) fn delete_range(
    cx: &mut UpdateContext<'_>,
    anchor: Point,
    focus: Point,
) -> Result<Point, UpdateError> {
    let (start, end) = ordered_points(cx.tree(), anchor, focus);

    // The end goes first so the start offset stays valid when both points
    // sit in the same text node.
    let (end_parent, end_index) = split_inline_at(cx, end)?;
    let end_marker = cx.tree().children(end_parent).get(end_index).copied();
    let (start_parent, start_index) = split_inline_at(cx, start)?;
    let end_index = end_marker
        .and_then(|m| cx.tree().index_in_parent(m))
        .unwrap_or_else(|| cx.tree().children(end_parent).len());

    let tree = cx.tree();
    let mut start_path = tree
        .path_to(start_parent)
        .ok_or(TreeError::Detached(start_parent))?;
    start_path.push(start_index);
    let mut end_path = tree
        .path_to(end_parent)
        .ok_or(TreeError::Detached(end_parent))?;
    end_path.push(end_index);

    let mut doomed = Vec::new();
    let mut stack = vec![tree.root()];
    while let Some(key) = stack.pop() {
        for (ix, child) in tree.children(key).iter().enumerate() {
            let Some(mut before) = tree.path_to(key) else {
                continue;
            };
            before.push(ix);
            let mut after = before.clone();
            if let Some(last) = after.last_mut() {
                *last += 1;
            }
            if before.cmp(&start_path) != Ordering::Less && after.cmp(&end_path) != Ordering::Greater
            {
                doomed.push(*child);
            } else if before < end_path && after > start_path {
                stack.push(*child);
            }
        }
    }
    for key in doomed {
        if cx.tree().contains(key) {
            cx.remove_node(key)?;
        }
    }

    let caret = point_at(cx.tree(), start_parent, start_index);
    let tree = cx.tree();
    let merge = start_parent != end_parent
        && !tree.is_ancestor(start_parent, end_parent)
        && !tree.is_ancestor(end_parent, start_parent)
        && can_hold_inline(tree, start_parent)
        && can_hold_inline(tree, end_parent);
    if merge {
        let rest = tree.children(end_parent).to_vec();
        cx.append_children(start_parent, &rest)?;
        remove_with_empty_ancestors(cx, end_parent, start_parent)?;
    }
    cx.select_point(caret);
    Ok(caret)
}

/// Removes `key`, then every ancestor left without children, stopping at
/// shadow roots and at ancestors of `keep`.
fn remove_with_empty_ancestors(
    cx: &mut UpdateContext<'_>,
    key: NodeKey,
    keep: NodeKey,
) -> Result<(), UpdateError> {
    let mut parent = cx.tree().parent(key);
    cx.remove_node(key)?;
    while let Some(p) = parent {
        let tree = cx.tree();
        if is_shadow_root(tree, p) || tree.is_ancestor(p, keep) || !tree.children(p).is_empty() {
            break;
        }
        parent = tree.parent(p);
        cx.remove_node(p)?;
    }
    Ok(())
}

pub(crate) fn insert_text(cx: &mut UpdateContext<'_>, text: &str) -> Result<bool, UpdateError> {
    let Some(point) = collapse_selection(cx)? else {
        return Ok(false);
    };
    if text.is_empty() {
        return Ok(true);
    }
    match point.kind {
        PointType::Text => {
            let data = cx.writable_text(point.key)?;
            let offset = clamp_to_char_boundary(&data.text, point.offset);
            data.text.insert_str(offset, text);
            cx.select_point(Point::text(point.key, offset + text.len()));
        }
        PointType::Element => {
            let node = cx.create_node(NodeKind::text(text))?;
            if can_hold_inline(cx.tree(), point.key) {
                let (parent, ix) = split_inline_at(cx, point)?;
                cx.insert_child(parent, node, ix)?;
            } else {
                let paragraph = cx.create_node(NodeKind::paragraph())?;
                cx.append_child(paragraph, node)?;
                let len = cx.tree().children(point.key).len();
                cx.insert_child(point.key, paragraph, point.offset.min(len))?;
            }
            cx.select_point(Point::text(node, text.len()));
        }
    }
    Ok(true)
}

pub(crate) fn insert_paragraph(cx: &mut UpdateContext<'_>) -> Result<bool, UpdateError> {
    let Some(point) = collapse_selection(cx)? else {
        return Ok(false);
    };
    let Some(block) = inline_block_of(cx.tree(), point.key) else {
        let paragraph = cx.create_node(NodeKind::paragraph())?;
        let len = cx.tree().children(point.key).len();
        cx.insert_child(point.key, paragraph, point.offset.min(len))?;
        cx.select_point(Point::element(paragraph, 0));
        return Ok(true);
    };
    let (parent, ix) = split_inline_at(cx, point)?;
    let moved = cx.tree().children(parent)[ix..].to_vec();
    let paragraph = cx.create_node(NodeKind::paragraph())?;
    cx.append_children(paragraph, &moved)?;
    cx.insert_after(block, paragraph)?;
    let caret = match moved.first() {
        Some(first) => start_point_of(cx.tree(), *first).unwrap_or(Point::element(paragraph, 0)),
        None => Point::element(paragraph, 0),
    };
    cx.select_point(caret);
    Ok(true)
}

fn insert_line_break(cx: &mut UpdateContext<'_>) -> Result<bool, UpdateError> {
    let Some(point) = collapse_selection(cx)? else {
        return Ok(false);
    };
    let (parent, ix) = split_inline_at(cx, point)?;
    if !can_hold_inline(cx.tree(), parent) {
        return Ok(false);
    }
    let line_break = cx.create_node(NodeKind::line_break())?;
    cx.insert_child(parent, line_break, ix)?;
    let caret = point_after(cx.tree(), line_break).unwrap_or(Point::element(parent, ix + 1));
    cx.select_point(caret);
    Ok(true)
}

pub(crate) fn insert_inline_node(
    cx: &mut UpdateContext<'_>,
    kind: NodeKind,
) -> Result<Option<NodeKey>, UpdateError> {
    let Some(point) = collapse_selection(cx)? else {
        return Ok(None);
    };
    let (mut parent, mut ix) = split_inline_at(cx, point)?;
    if !can_hold_inline(cx.tree(), parent) {
        let paragraph = cx.create_node(NodeKind::paragraph())?;
        let len = cx.tree().children(parent).len();
        cx.insert_child(parent, paragraph, ix.min(len))?;
        parent = paragraph;
        ix = 0;
    }
    let key = cx.create_node(kind)?;
    cx.insert_child(parent, key, ix)?;
    let caret = point_after(cx.tree(), key).unwrap_or(Point::element(parent, ix + 1));
    cx.select_point(caret);
    Ok(Some(key))
}

/// Inserts a block at the selection. A paragraph holding the caret is split
/// around the new block; inside a collapsible title the block goes after the
/// container. The caret lands at the start of the following block, which is
/// created when missing.
pub(crate) fn insert_block_at_selection(
    cx: &mut UpdateContext<'_>,
    key: NodeKey,
) -> Result<(), UpdateError> {
    let point = match cx.selection().cloned() {
        Some(Selection::Node(keys)) => keys
            .iter()
            .copied()
            .find(|k| cx.tree().is_attached(*k))
            .and_then(|k| point_after(cx.tree(), k)),
        Some(Selection::Range { anchor, focus }) if anchor != focus => {
            Some(delete_range(cx, anchor, focus)?)
        }
        Some(Selection::Range { focus, .. }) => Some(focus),
        None => None,
    };

    let Some(point) = point else {
        let root = cx.root();
        cx.append_child(root, key)?;
        return select_after_block(cx, key);
    };

    if is_shadow_root(cx.tree(), point.key) {
        let len = cx.tree().children(point.key).len();
        cx.insert_child(point.key, key, point.offset.min(len))?;
        return select_after_block(cx, key);
    }

    let Some(block) = current_block(cx.tree(), point.key) else {
        let root = cx.root();
        cx.append_child(root, key)?;
        return select_after_block(cx, key);
    };

    if !can_hold_inline(cx.tree(), block) {
        cx.insert_after(block, key)?;
        return select_after_block(cx, key);
    }

    let tree = cx.tree();
    let at_start = !tree.children(block).is_empty()
        && is_point_at_start_of(tree, &point, block);
    let at_end = is_point_at_end_of(tree, &point, block);
    if at_start {
        cx.insert_before(block, key)?;
    } else if at_end {
        cx.insert_after(block, key)?;
    } else {
        let (parent, ix) = split_inline_at(cx, point)?;
        let moved = cx.tree().children(parent)[ix..].to_vec();
        let tail = cx.create_node(NodeKind::paragraph())?;
        cx.append_children(tail, &moved)?;
        cx.insert_after(block, tail)?;
        cx.insert_after(block, key)?;
    }
    select_after_block(cx, key)
}

fn select_after_block(cx: &mut UpdateContext<'_>, key: NodeKey) -> Result<(), UpdateError> {
    let next = match cx.tree().next_sibling(key) {
        Some(next) => next,
        None => {
            let paragraph = cx.create_node(NodeKind::paragraph())?;
            cx.insert_after(key, paragraph)?;
            paragraph
        }
    };
    let caret = start_point_of(cx.tree(), next).unwrap_or(Point::element(next, 0));
    cx.select_point(caret);
    Ok(())
}

fn delete_character(cx: &mut UpdateContext<'_>, backward: bool) -> Result<bool, UpdateError> {
    let point = match cx.selection().cloned() {
        None => return Ok(false),
        Some(Selection::Node(keys)) => {
            remove_selected_nodes(cx, &keys)?;
            return Ok(true);
        }
        Some(Selection::Range { anchor, focus }) if anchor != focus => {
            delete_range(cx, anchor, focus)?;
            return Ok(true);
        }
        Some(Selection::Range { anchor, .. }) => anchor,
    };

    if let Some(text) = cx.tree().get(point.key).and_then(|n| n.as_text()) {
        let s = &text.text;
        let offset = clamp_to_char_boundary(s, point.offset);
        if backward && offset > 0 {
            let from = prev_char_boundary(s, offset);
            cx.writable_text(point.key)?.text.replace_range(from..offset, "");
            cx.select_point(Point::text(point.key, from));
            return Ok(true);
        }
        if !backward && offset < s.len() {
            let to = next_char_boundary(s, offset);
            cx.writable_text(point.key)?.text.replace_range(offset..to, "");
            return Ok(true);
        }
    }

    let tree = cx.tree();
    let (parent, ix) = match point.kind {
        PointType::Text => {
            let parent = tree
                .parent(point.key)
                .ok_or(TreeError::Detached(point.key))?;
            let ix = tree.index_in_parent(point.key).unwrap_or(0);
            (parent, if backward { ix } else { ix + 1 })
        }
        PointType::Element => (point.key, point.offset),
    };
    let sibling = if backward {
        ix.checked_sub(1).and_then(|i| tree.children(parent).get(i))
    } else {
        tree.children(parent).get(ix)
    }
    .copied();

    if let Some(sibling) = sibling {
        if can_hold_inline(tree, parent) {
            return delete_inline_neighbor(cx, point, sibling, backward);
        }
        return step_into_block(cx, sibling, backward);
    }

    let Some(block) = inline_block_of(tree, point.key) else {
        return Ok(false);
    };
    let neighbor = if backward {
        tree.previous_sibling(block)
    } else {
        tree.next_sibling(block)
    };
    let Some(neighbor) = neighbor else {
        return Ok(false);
    };

    if is_decorator(tree, neighbor) {
        if tree.children(block).is_empty() {
            cx.remove_node(block)?;
        }
        cx.set_selection(Some(Selection::node(neighbor)));
        return Ok(true);
    }

    let target = if can_hold_inline(tree, neighbor) {
        Some(neighbor)
    } else {
        let mut blocks: Vec<NodeKey> = tree
            .descendants(neighbor)
            .into_iter()
            .filter(|k| can_hold_inline(tree, *k))
            .collect();
        if backward { blocks.pop() } else { blocks.into_iter().next() }
    };
    let Some(target) = target else {
        return Ok(false);
    };

    if backward {
        merge_blocks(cx, target, block)?;
    } else {
        merge_blocks(cx, block, target)?;
        cx.select_point(point);
    }
    Ok(true)
}

pub(crate) fn merge_blocks(
    cx: &mut UpdateContext<'_>,
    into: NodeKey,
    from: NodeKey,
) -> Result<Point, UpdateError> {
    let tree = cx.tree();
    let caret = point_at(tree, into, tree.children(into).len());
    let moved = tree.children(from).to_vec();
    cx.append_children(into, &moved)?;
    remove_with_empty_ancestors(cx, from, into)?;
    cx.select_point(caret);
    Ok(caret)
}

fn delete_inline_neighbor(
    cx: &mut UpdateContext<'_>,
    point: Point,
    sibling: NodeKey,
    backward: bool,
) -> Result<bool, UpdateError> {
    let node = cx.node(sibling)?;
    match node.kind() {
        NodeKind::Text(text) => {
            let s = text.text.clone();
            if s.is_empty() {
                cx.remove_node(sibling)?;
                return Ok(true);
            }
            if backward {
                let from = prev_char_boundary(&s, s.len());
                cx.writable_text(sibling)?.text.truncate(from);
                cx.select_point(Point::text(sibling, from));
            } else {
                let to = next_char_boundary(&s, 0);
                cx.writable_text(sibling)?.text.replace_range(..to, "");
                cx.select_point(point);
            }
            Ok(true)
        }
        kind if kind.is_decorator() => {
            cx.set_selection(Some(Selection::node(sibling)));
            Ok(true)
        }
        _ => {
            let parent = node.parent();
            let ix = cx.tree().index_in_parent(sibling);
            cx.remove_node(sibling)?;
            let caret = match (point.kind, parent, ix) {
                (PointType::Element, Some(parent), Some(ix)) if backward => {
                    point_at(cx.tree(), parent, ix)
                }
                _ => point,
            };
            cx.select_point(caret);
            Ok(true)
        }
    }
}

fn step_into_block(
    cx: &mut UpdateContext<'_>,
    sibling: NodeKey,
    backward: bool,
) -> Result<bool, UpdateError> {
    let tree = cx.tree();
    if is_decorator(tree, sibling) {
        cx.set_selection(Some(Selection::node(sibling)));
        return Ok(true);
    }
    let caret = if backward {
        end_point_of(tree, sibling)
    } else {
        start_point_of(tree, sibling)
    };
    match caret {
        Some(caret) => {
            cx.select_point(caret);
            Ok(true)
        }
        None => Ok(false),
    }
}

fn move_caret(cx: &mut UpdateContext<'_>, backward: bool) -> Result<bool, UpdateError> {
    let point = match cx.selection().cloned() {
        None => return Ok(false),
        Some(Selection::Node(keys)) => {
            let tree = cx.tree();
            let target = if backward {
                keys.iter().min_by_key(|k| tree.path_to(**k))
            } else {
                keys.iter().max_by_key(|k| tree.path_to(**k))
            };
            let caret = target.and_then(|k| {
                if backward {
                    point_before(tree, *k)
                } else {
                    point_after(tree, *k)
                }
            });
            let Some(caret) = caret else {
                return Ok(false);
            };
            cx.select_point(caret);
            return Ok(true);
        }
        Some(Selection::Range { anchor, focus }) if anchor != focus => {
            let (start, end) = ordered_points(cx.tree(), anchor, focus);
            cx.select_point(if backward { start } else { end });
            return Ok(true);
        }
        Some(Selection::Range { anchor, .. }) => anchor,
    };

    let tree = cx.tree();
    if let Some(text) = tree.get(point.key).and_then(|n| n.as_text()) {
        let s = &text.text;
        let offset = clamp_to_char_boundary(s, point.offset);
        let target = if backward && offset > 0 {
            Some(prev_char_boundary(s, offset))
        } else if !backward && offset < s.len() {
            Some(next_char_boundary(s, offset))
        } else {
            None
        };
        if let Some(target) = target {
            cx.select_point(Point::text(point.key, target));
            return Ok(true);
        }
    }

    let (parent, ix) = match point.kind {
        PointType::Text => {
            let Some(parent) = tree.parent(point.key) else {
                return Ok(false);
            };
            let ix = tree.index_in_parent(point.key).unwrap_or(0);
            (parent, if backward { ix } else { ix + 1 })
        }
        PointType::Element => (point.key, point.offset),
    };
    let sibling = if backward {
        ix.checked_sub(1).and_then(|i| tree.children(parent).get(i))
    } else {
        tree.children(parent).get(ix)
    }
    .copied();

    if let Some(sibling) = sibling {
        if !can_hold_inline(tree, parent) || is_decorator(tree, sibling) {
            return step_into_block(cx, sibling, backward);
        }
        let caret = match tree.get(sibling).map(|n| n.kind()) {
            Some(NodeKind::Text(text)) if backward => {
                Point::text(sibling, prev_char_boundary(&text.text, text.text.len()))
            }
            Some(NodeKind::Text(text)) => Point::text(sibling, next_char_boundary(&text.text, 0)),
            _ if backward => point_before(tree, sibling).unwrap_or(Point::element(parent, ix - 1)),
            _ => point_after(tree, sibling).unwrap_or(Point::element(parent, ix + 1)),
        };
        cx.select_point(caret);
        return Ok(true);
    }

    // Leave the block for the neighboring one in document order.
    let Some(block) = inline_block_of(tree, point.key) else {
        return Ok(false);
    };
    let blocks = inline_blocks(tree);
    let Some(pos) = blocks.iter().position(|k| *k == block) else {
        return Ok(false);
    };
    let neighbor = if backward {
        pos.checked_sub(1).map(|p| blocks[p])
    } else {
        blocks.get(pos + 1).copied()
    };
    let Some(neighbor) = neighbor else {
        return Ok(false);
    };
    let caret = if backward {
        end_point_of(tree, neighbor)
    } else {
        start_point_of(tree, neighbor)
    };
    match caret {
        Some(caret) => {
            cx.select_point(caret);
            Ok(true)
        }
        None => Ok(false),
    }
}

pub(crate) fn wrap_inline_runs(cx: &mut UpdateContext<'_>, key: NodeKey) -> Result<(), UpdateError> {
    let tree = cx.tree();
    if !tree.kind(key).is_some_and(NodeKind::holds_blocks) {
        return Ok(());
    }
    let mut runs: Vec<Vec<NodeKey>> = Vec::new();
    let mut current = Vec::new();
    for child in tree.children(key) {
        if is_inline(tree, *child) {
            current.push(*child);
        } else if !current.is_empty() {
            runs.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    for run in runs {
        let paragraph = cx.create_node(NodeKind::paragraph())?;
        cx.insert_before(run[0], paragraph)?;
        cx.append_children(paragraph, &run)?;
    }
    Ok(())
}

pub(crate) fn ensure_paragraph_child(
    cx: &mut UpdateContext<'_>,
    key: NodeKey,
) -> Result<(), UpdateError> {
    if !cx.tree().children(key).is_empty() {
        return Ok(());
    }
    let paragraph = cx.create_node(NodeKind::paragraph())?;
    cx.append_child(key, paragraph)
}

fn ensure_root_not_empty(cx: &mut UpdateContext<'_>, key: NodeKey) -> Result<(), UpdateError> {
    ensure_paragraph_child(cx, key)
}

fn unwrap_nested_paragraph(cx: &mut UpdateContext<'_>, key: NodeKey) -> Result<(), UpdateError> {
    let nested = cx
        .tree()
        .parent(key)
        .is_some_and(|parent| can_hold_inline(cx.tree(), parent));
    if nested {
        cx.unwrap_node(key)?;
    }
    Ok(())
}

/// A block child (an image, a block equation) splits its paragraph in two
/// and moves up between the halves. An emptied paragraph is removed.
fn lift_block_children(cx: &mut UpdateContext<'_>, key: NodeKey) -> Result<(), UpdateError> {
    let tree = cx.tree();
    let children = tree.children(key);
    let Some(ix) = children
        .iter()
        .position(|child| {
            tree.kind(*child)
                .is_some_and(|kind| !kind.is_inline() && !matches!(kind, NodeKind::Paragraph(_)))
        })
    else {
        return Ok(());
    };
    let (Some(parent), Some(index)) = (tree.parent(key), tree.index_in_parent(key)) else {
        return Ok(());
    };
    let block = children[ix];
    let tail = children[ix + 1..].to_vec();

    cx.insert_after(key, block)?;
    if !tail.is_empty() {
        let paragraph = cx.create_node(NodeKind::paragraph())?;
        cx.append_children(paragraph, &tail)?;
        cx.insert_after(block, paragraph)?;
    }
    if cx.tree().children(key).is_empty() {
        move_points(cx, key, Point::element(parent, index));
        cx.remove_node(key)?;
    }
    Ok(())
}

/// Drops empty text runs and merges a run into an identically formatted
/// neighbor, carrying selection points along.
fn normalize_text(cx: &mut UpdateContext<'_>, key: NodeKey) -> Result<(), UpdateError> {
    let tree = cx.tree();
    let Some(text) = tree.get(key).and_then(|n| n.as_text()) else {
        return Ok(());
    };

    if text.text.is_empty() {
        let Some(target) = point_before(tree, key) else {
            return Ok(());
        };
        move_points(cx, key, target);
        return cx.remove_node(key);
    }

    if let Some(prev) = tree.previous_sibling(key) {
        if let Some(prev_text) = tree.get(prev).and_then(|n| n.as_text()) {
            if prev_text.can_merge_with(text) {
                let shift = prev_text.text.len();
                let tail = text.text.clone();
                cx.writable_text(prev)?.text.push_str(&tail);
                cx.remap_text_points(key, prev, shift);
                return cx.remove_node(key);
            }
        }
    }

    while let Some(next) = cx.tree().next_sibling(key) {
        let tree = cx.tree();
        let (Some(this), Some(next_text)) = (
            tree.get(key).and_then(|n| n.as_text()),
            tree.get(next).and_then(|n| n.as_text()),
        ) else {
            break;
        };
        if !this.can_merge_with(next_text) {
            break;
        }
        let shift = this.text.len();
        let tail = next_text.text.clone();
        cx.writable_text(key)?.text.push_str(&tail);
        cx.remap_text_points(next, key, shift);
        cx.remove_node(next)?;
    }
    Ok(())
}
