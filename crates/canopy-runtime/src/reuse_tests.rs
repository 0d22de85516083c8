//! Tests for the reuse cursor and token cache.

use canopy_core::length::{Length, Point};

use super::pool::{TreeId, TreePool};
use super::reuse::{ReusableNode, TokenCache};
use super::test_language::list;
use super::tree;

fn len(bytes: u32) -> Length {
    Length::new(bytes, bytes, Point::new(0, bytes))
}

/// Builds the tree for `[1,2]` with parents assigned, returning
/// (root, leaves in source order).
fn sample_tree(pool: &mut TreePool) -> (TreeId, Vec<TreeId>) {
    let language = list::language();
    let lbracket = tree::make_leaf(pool, &language, list::LBRACKET, Length::ZERO, len(1));
    let one = tree::make_leaf(pool, &language, list::NUMBER, Length::ZERO, len(1));
    let comma = tree::make_leaf(pool, &language, list::COMMA, Length::ZERO, len(1));
    let two = tree::make_leaf(pool, &language, list::NUMBER, Length::ZERO, len(1));
    let rbracket = tree::make_leaf(pool, &language, list::RBRACKET, Length::ZERO, len(1));

    let first = tree::make_node(pool, &language, list::ELEMENTS, vec![one], 0);
    let elements = tree::make_node(pool, &language, list::ELEMENTS, vec![first, comma, two], 0);
    let array = tree::make_node(
        pool,
        &language,
        list::ARRAY,
        vec![lbracket, elements, rbracket],
        0,
    );
    tree::assign_parents(pool, &language, array);
    (array, vec![lbracket, one, comma, two, rbracket])
}

#[test]
fn cursor_walks_in_source_order() {
    let mut pool = TreePool::new();
    let (root, leaves) = sample_tree(&mut pool);

    let mut cursor = ReusableNode::new(Some(root));
    assert_eq!(cursor.tree(), Some(root));
    assert_eq!(cursor.byte_index(), 0);

    // Descend to the first leaf, then step through the rest.
    assert!(cursor.breakdown(&pool));
    assert_eq!(cursor.tree(), Some(leaves[0]));
    assert!(!cursor.breakdown(&pool));

    cursor.pop(&pool);
    assert_eq!(cursor.byte_index(), 1);
    // Next in source order is the `elements` node, not a leaf.
    let elements = pool[root].children[1];
    assert_eq!(cursor.tree(), Some(elements));

    cursor.pop_leaf(&pool);
    assert_eq!(cursor.byte_index(), 2);
    assert_eq!(cursor.tree(), Some(leaves[2]));

    cursor.pop(&pool);
    cursor.pop(&pool);
    assert_eq!(cursor.tree(), Some(leaves[4]));
    cursor.pop(&pool);
    assert_eq!(cursor.tree(), None);
    assert_eq!(cursor.byte_index(), 5);

    tree::release(&mut pool, root);
    assert!(pool.is_empty());
}

#[test]
fn token_cache_hits_on_matching_position() {
    let language = list::language();
    let mut pool = TreePool::new();
    let token = tree::make_leaf(&mut pool, &language, list::NUMBER, Length::ZERO, len(2));

    let mut cache = TokenCache::new();
    assert_eq!(cache.get(&pool, 0, None), None);

    cache.set(&mut pool, 4, None, Some(token));
    assert_eq!(cache.get(&pool, 4, None), Some(token));
    assert_eq!(cache.get(&pool, 5, None), None);

    // Replacing the slot drops the old reference.
    cache.set(&mut pool, 9, None, Some(token));
    assert_eq!(pool[token].ref_count, 2);

    cache.clear(&mut pool);
    assert_eq!(pool[token].ref_count, 1);
    tree::release(&mut pool, token);
    assert!(pool.is_empty());
}

#[test]
fn token_cache_distinguishes_external_states() {
    let language = list::language();
    let mut pool = TreePool::new();
    let token = tree::make_leaf(&mut pool, &language, list::NUMBER, Length::ZERO, len(2));
    let context_a = tree::make_leaf(&mut pool, &language, list::NUMBER, Length::ZERO, len(1));
    let context_b = tree::make_leaf(&mut pool, &language, list::NUMBER, Length::ZERO, len(1));
    pool.get_mut(context_b).external_scanner_state = vec![7];

    let mut cache = TokenCache::new();
    cache.set(&mut pool, 0, Some(context_a), Some(token));
    // An empty blob is equivalent to no context at all.
    assert_eq!(cache.get(&pool, 0, None), Some(token));
    assert_eq!(cache.get(&pool, 0, Some(context_b)), None);

    cache.clear(&mut pool);
    for id in [token, context_a, context_b] {
        tree::release(&mut pool, id);
    }
    assert!(pool.is_empty());
}
