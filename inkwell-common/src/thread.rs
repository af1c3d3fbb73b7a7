//! Threaded comment layout.
//!
//! Comments arrive as a flat list in which each entry may name a parent. [`CommentTree`]
//! groups them by parent and [`Walk`] traverses the groups depth first, yielding each
//! comment with its nesting depth in the order a threaded view renders them. Siblings keep
//! the order in which they appeared in the input.

use crate::model::{
    Id,
    comment::{Comment, CommentMarker},
};
use std::{
    collections::HashMap,
    fmt::{Display, Formatter},
};
use thiserror::Error;
use tracing::debug;

/// Nodes at this depth or deeper are not emitted.
pub const MAX_THREAD_DEPTH: usize = 1000;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum Malformation {
    /// The comment's ancestry loops back on itself and never reaches a root.
    Cycle,
    /// The comment is nested [`MAX_THREAD_DEPTH`] levels deep.
    TooDeep,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum TreeError {
    #[error("Comment {comment} heads a malformed subtree: {reason}")]
    MalformedHierarchy {
        comment: Id<CommentMarker>,
        reason: Malformation,
    },
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct ThreadNode<'a> {
    pub comment: &'a Comment,
    pub depth: usize,
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct CommentTree<'a> {
    comments: &'a [Comment],
    roots: Vec<usize>,
    children: Vec<Vec<usize>>,
}

/// Lazy pre-order traversal of a [`CommentTree`].
///
/// Yields every comment exactly once, or a [`TreeError`] in place of a subtree that can't
/// be laid out. Subtrees below a cycle are reported once all well-formed nodes are done.
#[derive(Clone, Debug)]
pub struct Walk<'t, 'a> {
    tree: &'t CommentTree<'a>,
    stack: Vec<(usize, usize)>,
    visited: Vec<bool>,
    next_unvisited: usize,
}

impl Display for Malformation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Malformation::Cycle => f.write_str("parent references form a cycle"),
            Malformation::TooDeep => write!(f, "nested {MAX_THREAD_DEPTH} or more levels deep"),
        }
    }
}

impl<'a> CommentTree<'a> {
    /// Groups `comments` by parent.
    ///
    /// A comment whose parent is missing from `comments`, or belongs to a different post,
    /// is placed at the root level.
    #[must_use]
    pub fn build(comments: &'a [Comment]) -> Self {
        let mut index_by_id = HashMap::with_capacity(comments.len());
        for (index, comment) in comments.iter().enumerate() {
            index_by_id.entry(comment.id).or_insert(index);
        }

        let mut roots = Vec::new();
        let mut children = vec![Vec::new(); comments.len()];

        for (index, comment) in comments.iter().enumerate() {
            let parent = comment
                .parent
                .and_then(|parent_id| index_by_id.get(&parent_id).copied())
                .filter(|&parent| comments[parent].post_id == comment.post_id);

            match parent {
                Some(parent) => children[parent].push(index),
                None => {
                    if let Some(missing) = comment.parent {
                        debug!(comment = %comment.id, %missing, "Parent not loaded, placing comment at root");
                    }
                    roots.push(index);
                }
            }
        }

        Self {
            comments,
            roots,
            children,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.comments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }

    #[must_use]
    pub fn walk(&self) -> Walk<'_, 'a> {
        Walk {
            tree: self,
            stack: self.roots.iter().rev().map(|&root| (root, 0)).collect(),
            visited: vec![false; self.comments.len()],
            next_unvisited: 0,
        }
    }

    /// The full layout, failing on the first malformed subtree.
    pub fn nodes(&self) -> Result<Vec<ThreadNode<'a>>, TreeError> {
        self.walk().collect()
    }
}

impl Walk<'_, '_> {
    fn skip_subtree(&mut self, index: usize) {
        let mut pending = vec![index];
        while let Some(index) = pending.pop() {
            if !std::mem::replace(&mut self.visited[index], true) {
                pending.extend(&self.tree.children[index]);
            }
        }
    }

    fn malformed(&self, index: usize, reason: Malformation) -> TreeError {
        TreeError::MalformedHierarchy {
            comment: self.tree.comments[index].id,
            reason,
        }
    }
}

impl<'a> Iterator for Walk<'_, 'a> {
    type Item = Result<ThreadNode<'a>, TreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some((index, depth)) = self.stack.pop() {
            if depth >= MAX_THREAD_DEPTH {
                self.skip_subtree(index);
                return Some(Err(self.malformed(index, Malformation::TooDeep)));
            }

            self.visited[index] = true;
            let comments = self.tree.comments;
            let children = &self.tree.children[index];
            self.stack
                .extend(children.iter().rev().map(|&child| (child, depth + 1)));

            return Some(Ok(ThreadNode {
                comment: &comments[index],
                depth,
            }));
        }

        // Everything reachable from a root is visited by now. What is left hangs off a cycle.
        while self.next_unvisited < self.visited.len() {
            let index = self.next_unvisited;
            self.next_unvisited += 1;

            if !self.visited[index] {
                self.skip_subtree(index);
                return Some(Err(self.malformed(index, Malformation::Cycle)));
            }
        }

        None
    }
}
