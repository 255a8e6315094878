use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::key::NodeKey;
use crate::node::{NodeKind, clamp_to_char_boundary};
use crate::tree::Tree;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointType {
    Text,
    Element,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub key: NodeKey,
    pub offset: usize,
    #[serde(rename = "type")]
    pub kind: PointType,
}

impl Point {
    pub fn text(key: NodeKey, offset: usize) -> Self {
        Self {
            key,
            offset,
            kind: PointType::Text,
        }
    }

    pub fn element(key: NodeKey, offset: usize) -> Self {
        Self {
            key,
            offset,
            kind: PointType::Element,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Range { anchor: Point, focus: Point },
    Node(BTreeSet<NodeKey>),
}

impl Selection {
    pub fn collapsed(point: Point) -> Self {
        Selection::Range {
            anchor: point,
            focus: point,
        }
    }

    pub fn range(anchor: Point, focus: Point) -> Self {
        Selection::Range { anchor, focus }
    }

    pub fn node(key: NodeKey) -> Self {
        Selection::Node(BTreeSet::from([key]))
    }

    pub fn is_collapsed(&self) -> bool {
        match self {
            Selection::Range { anchor, focus } => anchor == focus,
            Selection::Node(_) => false,
        }
    }

    pub fn anchor(&self) -> Option<Point> {
        match self {
            Selection::Range { anchor, .. } => Some(*anchor),
            Selection::Node(_) => None,
        }
    }

    pub fn focus(&self) -> Option<Point> {
        match self {
            Selection::Range { focus, .. } => Some(*focus),
            Selection::Node(_) => None,
        }
    }

    pub fn caret(&self) -> Option<Point> {
        match self {
            Selection::Range { anchor, focus } if anchor == focus => Some(*anchor),
            _ => None,
        }
    }
}

fn point_order_key(tree: &Tree, point: &Point) -> Option<Vec<usize>> {
    let mut path = tree.path_to(point.key)?;
    path.push(point.offset);
    Some(path)
}

/// Document order of two points; `None` when either one is stale.
pub fn compare_points(tree: &Tree, a: &Point, b: &Point) -> Option<Ordering> {
    Some(point_order_key(tree, a)?.cmp(&point_order_key(tree, b)?))
}

pub fn ordered_points(tree: &Tree, anchor: Point, focus: Point) -> (Point, Point) {
    match compare_points(tree, &anchor, &focus) {
        Some(Ordering::Greater) => (focus, anchor),
        _ => (anchor, focus),
    }
}

pub fn point_before(tree: &Tree, key: NodeKey) -> Option<Point> {
    let parent = tree.parent(key)?;
    let ix = tree.index_in_parent(key)?;
    if let Some(prev) = ix.checked_sub(1).map(|i| tree.children(parent)[i]) {
        if let Some(NodeKind::Text(t)) = tree.kind(prev) {
            return Some(Point::text(prev, t.text.len()));
        }
    }
    Some(Point::element(parent, ix))
}

pub fn point_after(tree: &Tree, key: NodeKey) -> Option<Point> {
    let parent = tree.parent(key)?;
    let ix = tree.index_in_parent(key)?;
    if let Some(next) = tree.children(parent).get(ix + 1).copied() {
        if let Some(NodeKind::Text(_)) = tree.kind(next) {
            return Some(Point::text(next, 0));
        }
    }
    Some(Point::element(parent, ix + 1))
}

pub fn start_point_of(tree: &Tree, key: NodeKey) -> Option<Point> {
    let node = tree.get(key)?;
    match node.kind() {
        NodeKind::Text(_) => Some(Point::text(key, 0)),
        NodeKind::LineBreak | NodeKind::Equation(_) | NodeKind::Image(_) => point_before(tree, key),
        _ => match tree.first_child(key) {
            Some(child) => start_point_of(tree, child),
            None => Some(Point::element(key, 0)),
        },
    }
}

pub fn end_point_of(tree: &Tree, key: NodeKey) -> Option<Point> {
    let node = tree.get(key)?;
    match node.kind() {
        NodeKind::Text(t) => Some(Point::text(key, t.text.len())),
        NodeKind::LineBreak | NodeKind::Equation(_) | NodeKind::Image(_) => point_after(tree, key),
        _ => match tree.last_child(key) {
            Some(child) => end_point_of(tree, child),
            None => Some(Point::element(key, 0)),
        },
    }
}

pub fn is_point_at_start_of(tree: &Tree, point: &Point, key: NodeKey) -> bool {
    let Some(start) = start_point_of(tree, key) else {
        return false;
    };
    let inside = point.key == key || tree.is_ancestor(key, point.key);
    inside && compare_points(tree, point, &start) != Some(Ordering::Greater)
}

pub fn is_point_at_end_of(tree: &Tree, point: &Point, key: NodeKey) -> bool {
    let Some(end) = end_point_of(tree, key) else {
        return false;
    };
    let inside = point.key == key || tree.is_ancestor(key, point.key);
    inside && compare_points(tree, point, &end) != Some(Ordering::Less)
}

pub fn first_point(tree: &Tree) -> Point {
    start_point_of(tree, tree.root()).unwrap_or(Point::element(tree.root(), 0))
}

pub fn normalize_point(tree: &Tree, point: &Point) -> Option<Point> {
    if !tree.contains(point.key) || !tree.is_attached(point.key) {
        return None;
    }
    let node = tree.get(point.key)?;
    match (node.kind(), point.kind) {
        (NodeKind::Text(t), _) => Some(Point::text(
            point.key,
            clamp_to_char_boundary(&t.text, point.offset),
        )),
        (kind, _) if kind.is_element() => Some(Point::element(
            point.key,
            point.offset.min(node.children().len()),
        )),
        _ => point_before(tree, point.key),
    }
}

pub fn normalize_selection(tree: &Tree, selection: Option<Selection>) -> Option<Selection> {
    match selection? {
        Selection::Range { anchor, focus } => {
            let fallback = first_point(tree);
            let anchor_n = normalize_point(tree, &anchor);
            let focus_n = normalize_point(tree, &focus);
            let anchor = anchor_n.or(focus_n).unwrap_or(fallback);
            let focus = focus_n.unwrap_or(anchor);
            Some(Selection::Range { anchor, focus })
        }
        Selection::Node(keys) => {
            let live: BTreeSet<NodeKey> = keys
                .into_iter()
                .filter(|k| tree.contains(*k) && tree.is_attached(*k))
                .collect();
            if live.is_empty() {
                None
            } else {
                Some(Selection::Node(live))
            }
        }
    }
}
