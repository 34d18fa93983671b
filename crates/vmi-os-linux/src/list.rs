//! Cyclic kernel linked-list traversal.
//!
//! Linux's `list_head` is an intrusive doubly-linked circular list: each
//! node is a `{next, prev}` pair embedded inside the structure it links,
//! and the containing structure's address is recovered by subtracting the
//! embedding offset from the node's address (the kernel's own
//! `container_of`). This traversal only ever reads, so it cannot corrupt
//! guest memory, but corrupted guest memory can still make it loop
//! forever — hence the hard iteration bound.

use vmi_core::{DebugPlane, Reader, Va, WalkResult};

/// Upper bound on the number of nodes a single traversal will visit
/// before giving up, defending against a corrupted or cyclically-broken
/// list that never comes back to `head`.
pub const MAX_ITERATIONS: usize = 1 << 20;

/// Walks the circular list anchored at `head`, delivering each node's
/// containing-structure address (node address minus `offset`) to `visit`,
/// starting with `head`'s own containing structure (the anchor the caller
/// passed in, e.g. the current task for [`crate::LinuxGuest::proc_list`]).
///
/// This is a do-while, not a while: the anchor is delivered before any
/// read happens, matching the kernel's own `list_for_each`-style walk
/// where `head` is itself a live list member, not a separate sentinel.
/// Stops when the forward pointer returns to `head`, when `visit` returns
/// [`WalkResult::Stop`], when a read fails, or after [`MAX_ITERATIONS`]
/// nodes, whichever comes first.
pub fn walk(
    plane: &dyn DebugPlane,
    reader: &Reader,
    head: Va,
    offset: u64,
    mut visit: impl FnMut(Va) -> WalkResult,
) {
    let mut link = head;

    for _ in 0..MAX_ITERATIONS {
        if visit(link - offset).is_stop() {
            return;
        }

        let Some(next) = reader.read_va(plane, link) else {
            return;
        };

        if next == head {
            return;
        }

        link = next;
    }
}
