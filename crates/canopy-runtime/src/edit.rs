//! Applying input edits to a previous tree.
//!
//! Before an incremental reparse, the caller describes each edit and
//! [`edit`] adjusts the old tree to the new coordinate space: extents
//! on the edited path are resized, and every node whose extent (or
//! recorded lookahead) touches the edit is marked `has_changes` so the
//! reuse cursor will not offer it to the new parse. Nodes entirely
//! before or after the edit keep their relative extents and stay
//! reusable.

use canopy_core::length::Length;

use crate::pool::{TreeId, TreePool};

/// One edit to the input: `removed` bytes at `start` replaced by
/// `added` bytes.
#[derive(Clone, Copy, Debug)]
pub struct InputEdit {
    pub start: Length,
    pub removed: Length,
    pub added: Length,
}

#[derive(Clone, Copy)]
struct EditRange {
    start: Length,
    old_end: Length,
    new_end: Length,
}

/// Apply an edit to a finished tree, in place.
pub fn edit(pool: &mut TreePool, root: TreeId, input_edit: &InputEdit) {
    edit_subtree(
        pool,
        root,
        EditRange {
            start: input_edit.start,
            old_end: input_edit.start + input_edit.removed,
            new_end: input_edit.start + input_edit.added,
        },
    );
}

fn clamp_bytes(value: Length, lo: Length, hi: Length) -> Length {
    if value.bytes < lo.bytes {
        lo
    } else if value.bytes > hi.bytes {
        hi
    } else {
        value
    }
}

/// Resize one node for an edit given in coordinates local to the
/// node's padding start, then recurse into the children it touches.
fn edit_subtree(pool: &mut TreePool, id: TreeId, e: EditRange) {
    let tree = pool.get(id);
    let mut padding = tree.padding;
    let mut size = tree.size;
    let total = tree.total_size();

    if e.start.bytes < padding.bytes {
        if e.old_end.bytes <= padding.bytes {
            // Edit entirely within the padding.
            padding = e.new_end + (padding - e.old_end);
        } else if e.old_end.bytes < total.bytes {
            // Edit spans the padding boundary.
            padding = e.new_end;
            size = total - e.old_end;
        } else {
            // Edit swallows the node.
            padding = e.new_end;
            size = Length::ZERO;
        }
    } else if e.start.bytes <= total.bytes {
        if e.old_end.bytes <= total.bytes {
            size = (e.new_end - padding) + (total - e.old_end);
        } else {
            size = e.new_end - padding;
        }
    }
    // Otherwise the edit only falls within this node's lookahead; the
    // extents stay, but the node can no longer be reused.

    let children = tree.children.clone();
    let tree = pool.get_mut(id);
    tree.padding = padding;
    tree.size = size;
    tree.has_changes = true;
    tree.bytes_scanned = tree.bytes_scanned.max(padding.bytes + size.bytes);

    // Walk the children in their old coordinates; the first child the
    // edit starts in absorbs the inserted text, later touched children
    // see pure deletions.
    let mut child_left = Length::ZERO;
    let mut assigned = false;
    for child_id in children {
        let child = pool.get(child_id);
        let child_right = child_left + child.total_size();
        let child_scanned = child.bytes_scanned;

        if assigned && child_left.bytes >= e.old_end.bytes {
            break;
        }

        // A replacement starting exactly on a child boundary belongs
        // to the child on the right; only a pure insertion sticks to
        // the one ending there.
        let absorbs = !assigned
            && (e.start.bytes < child_right.bytes
                || (e.start.bytes == child_right.bytes && e.old_end.bytes == e.start.bytes));
        let touches = absorbs
            || e.start.bytes < child_right.bytes
            || e.start.bytes < child_left.bytes + child_scanned;
        if touches {
            let local_start = clamp_bytes(e.start, child_left, e.start) - child_left;
            let start_abs = child_left + local_start;
            let local_old_end = clamp_bytes(e.old_end, start_abs, child_right) - child_left;
            let local_new_end = if absorbs {
                assigned = true;
                local_start + (e.new_end - e.start)
            } else {
                local_start
            };
            edit_subtree(
                pool,
                child_id,
                EditRange {
                    start: local_start,
                    old_end: local_old_end,
                    new_end: local_new_end,
                },
            );
        }

        child_left = child_right;
    }
}
