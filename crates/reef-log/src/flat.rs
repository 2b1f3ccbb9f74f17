//! Flat in-order tree indexing.
//!
//! Leaves sit at even indexes (`2 * block`), parents at odd indexes. A node's
//! depth is the number of trailing one bits of its index:
//!
//! ```text
//!        3
//!    1       5
//!  0   2   4   6
//! ```

/// Longest log the flat-tree arithmetic supports. Leaf indexes are
/// `2 * block`, and root walks step past the last leaf, so lengths stay well
/// clear of `u64::MAX`.
pub const MAX_LENGTH: u64 = 1 << 62;

/// Index of the node at `depth` and `offset` (offset counted within that depth).
pub fn index(depth: u64, offset: u64) -> u64 {
    (offset << (depth + 1)) | ((1u64 << depth) - 1)
}

/// Depth of a node; leaves have depth 0.
pub fn depth(index: u64) -> u64 {
    index.trailing_ones() as u64
}

/// Position of a node among the nodes of the same depth.
pub fn offset(index: u64) -> u64 {
    index >> (depth(index) + 1)
}

pub fn parent(index: u64) -> u64 {
    let depth = depth(index);
    self::index(depth + 1, offset(index) >> 1)
}

pub fn sibling(index: u64) -> u64 {
    let depth = depth(index);
    self::index(depth, offset(index) ^ 1)
}

/// Left and right child, or `None` for a leaf.
pub fn children(index: u64) -> Option<(u64, u64)> {
    let depth = depth(index);
    if depth == 0 {
        return None;
    }
    let offset = offset(index) * 2;
    Some((
        self::index(depth - 1, offset),
        self::index(depth - 1, offset + 1),
    ))
}

/// Leftmost leaf (flat index) under a node.
pub fn left_span(index: u64) -> u64 {
    let depth = depth(index);
    if depth == 0 {
        index
    } else {
        offset(index) * (2u64 << depth)
    }
}

/// Rightmost leaf (flat index) under a node.
pub fn right_span(index: u64) -> u64 {
    let depth = depth(index);
    if depth == 0 {
        index
    } else {
        (offset(index) + 1) * (2u64 << depth) - 2
    }
}

/// Block range `[start, end)` covered by a node.
pub fn blocks(index: u64) -> (u64, u64) {
    (left_span(index) / 2, right_span(index) / 2 + 1)
}

/// Roots of the complete subtrees covering the first `length` blocks,
/// left to right. `length` must not exceed [`MAX_LENGTH`].
pub fn full_roots(length: u64) -> Vec<u64> {
    let mut roots = Vec::new();
    let mut remaining = length;
    let mut offset = 0;

    while remaining > 0 {
        let factor = 1u64 << (63 - remaining.leading_zeros());
        roots.push(offset + factor - 1);
        offset += 2 * factor;
        remaining -= factor;
    }

    roots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_and_offset() {
        assert_eq!(depth(0), 0);
        assert_eq!(depth(1), 1);
        assert_eq!(depth(3), 2);
        assert_eq!(depth(7), 3);
        assert_eq!(offset(4), 2);
        assert_eq!(offset(5), 1);
        assert_eq!(index(1, 1), 5);
    }

    #[test]
    fn test_parent_sibling_children() {
        assert_eq!(parent(0), 1);
        assert_eq!(parent(2), 1);
        assert_eq!(parent(1), 3);
        assert_eq!(parent(5), 3);
        assert_eq!(sibling(0), 2);
        assert_eq!(sibling(5), 1);
        assert_eq!(children(3), Some((1, 5)));
        assert_eq!(children(4), None);
    }

    #[test]
    fn test_spans() {
        assert_eq!(left_span(3), 0);
        assert_eq!(right_span(3), 6);
        assert_eq!(left_span(11), 8);
        assert_eq!(right_span(11), 14);
        assert_eq!(blocks(11), (4, 8));
        assert_eq!(blocks(6), (3, 4));
    }

    #[test]
    fn test_full_roots() {
        assert!(full_roots(0).is_empty());
        assert_eq!(full_roots(1), vec![0]);
        assert_eq!(full_roots(2), vec![1]);
        assert_eq!(full_roots(3), vec![1, 4]);
        assert_eq!(full_roots(5), vec![3, 8]);
        assert_eq!(full_roots(7), vec![3, 9, 12]);
        assert_eq!(full_roots(8), vec![7]);
    }

    #[test]
    fn test_full_roots_at_max_length() {
        assert_eq!(full_roots(MAX_LENGTH), vec![MAX_LENGTH - 1]);
        let roots = full_roots(MAX_LENGTH + 3);
        assert_eq!(roots.len(), 3);
        assert_eq!(roots[0], MAX_LENGTH - 1);
    }
}
