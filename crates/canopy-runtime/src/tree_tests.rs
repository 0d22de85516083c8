//! Tests for tree nodes and their derived attributes.

use canopy_core::language::Symbol;
use canopy_core::length::{Length, Point};

use super::pool::TreePool;
use super::test_language::list;
use super::tree;

fn len(bytes: u32) -> Length {
    Length::new(bytes, bytes, Point::new(0, bytes))
}

#[test]
fn leaf_flags_come_from_metadata() {
    let language = list::language();
    let mut pool = TreePool::new();

    let number = tree::make_leaf(&mut pool, &language, list::NUMBER, len(1), len(2));
    assert!(pool[number].visible);
    assert!(pool[number].named);
    assert!(!pool[number].extra);
    assert_eq!(pool[number].padding, len(1));
    assert_eq!(pool[number].size, len(2));
    assert_eq!(pool[number].first_leaf.symbol, list::NUMBER);

    let comment = tree::make_leaf(&mut pool, &language, list::COMMENT, Length::ZERO, len(3));
    assert!(pool[comment].extra);

    tree::release(&mut pool, number);
    tree::release(&mut pool, comment);
    assert!(pool.is_empty());
}

#[test]
fn node_aggregates_children() {
    let language = list::language();
    let mut pool = TreePool::new();

    let lbracket = tree::make_leaf(&mut pool, &language, list::LBRACKET, Length::ZERO, len(1));
    let number = tree::make_leaf(&mut pool, &language, list::NUMBER, len(1), len(2));
    let rbracket = tree::make_leaf(&mut pool, &language, list::RBRACKET, Length::ZERO, len(1));

    // value is hidden; its visible children count through it.
    let value = tree::make_node(&mut pool, &language, list::VALUE, vec![number], 0);
    assert!(!pool[value].visible);
    assert_eq!(pool[value].visible_child_count, 1);
    assert_eq!(pool[value].named_child_count, 1);

    let array = tree::make_node(
        &mut pool,
        &language,
        list::ARRAY,
        vec![lbracket, value, rbracket],
        0,
    );
    let node = &pool[array];
    assert_eq!(node.padding, Length::ZERO);
    assert_eq!(node.size.bytes, 5);
    // The bracket leaves are visible but anonymous; the spliced number
    // is both visible and named.
    assert_eq!(node.visible_child_count, 3);
    assert_eq!(node.named_child_count, 1);
    assert_eq!(node.first_leaf.symbol, list::LBRACKET);
    assert_eq!(node.error_cost, 0);

    tree::release(&mut pool, array);
    assert!(pool.is_empty());
}

#[test]
fn error_node_carries_cost() {
    let language = list::language();
    let mut pool = TreePool::new();

    let comma = tree::make_leaf(&mut pool, &language, list::COMMA, Length::ZERO, len(1));
    let error = tree::make_error_node(&mut pool, &language, vec![comma]);
    assert!(pool[error].fragile_left);
    assert!(pool[error].fragile_right);
    // Flat penalty, plus one skipped tree of one character.
    assert_eq!(pool[error].error_cost, 201);

    let lexical = tree::make_error(&mut pool, &language, len(3), len(1), Some('%'));
    assert_eq!(pool[lexical].symbol, Symbol::ERROR);
    assert_eq!(pool[lexical].lookahead_char, Some('%'));
    assert_eq!(pool[lexical].error_cost, 3);

    tree::release(&mut pool, error);
    tree::release(&mut pool, lexical);
    assert!(pool.is_empty());
}

#[test]
fn copy_shares_and_retains_children() {
    let language = list::language();
    let mut pool = TreePool::new();

    let number = tree::make_leaf(&mut pool, &language, list::NUMBER, Length::ZERO, len(1));
    let value = tree::make_node(&mut pool, &language, list::VALUE, vec![number], 0);
    let copy = tree::make_copy(&mut pool, value);

    assert_eq!(pool[copy].children, pool[value].children);
    assert_eq!(pool[number].ref_count, 2);

    tree::release(&mut pool, value);
    assert_eq!(pool[number].ref_count, 1);
    tree::release(&mut pool, copy);
    assert!(pool.is_empty());
}

#[test]
fn compare_orders_by_symbol_then_structure() {
    let language = list::language();
    let mut pool = TreePool::new();

    let a = tree::make_leaf(&mut pool, &language, list::NUMBER, Length::ZERO, len(1));
    let b = tree::make_leaf(&mut pool, &language, list::COMMA, Length::ZERO, len(1));
    assert_eq!(tree::compare(&pool, a, b), std::cmp::Ordering::Less);
    assert_eq!(tree::compare(&pool, b, a), std::cmp::Ordering::Greater);
    assert_eq!(tree::compare(&pool, a, a), std::cmp::Ordering::Equal);

    tree::release(&mut pool, a);
    tree::release(&mut pool, b);
}

#[test]
fn eq_ignores_parse_state() {
    let language = list::language();
    let mut pool = TreePool::new();

    let a = tree::make_leaf(&mut pool, &language, list::NUMBER, Length::ZERO, len(2));
    let b = tree::make_leaf(&mut pool, &language, list::NUMBER, Length::ZERO, len(2));
    pool.get_mut(a).parse_state = 7;
    pool.get_mut(b).parse_state = 12;
    assert!(tree::eq(&pool, a, b));

    pool.get_mut(b).size = len(3);
    assert!(!tree::eq(&pool, a, b));

    tree::release(&mut pool, a);
    tree::release(&mut pool, b);
}

#[test]
fn assign_parents_fills_context() {
    let language = list::language();
    let mut pool = TreePool::new();

    let lbracket = tree::make_leaf(&mut pool, &language, list::LBRACKET, Length::ZERO, len(1));
    let number = tree::make_leaf(&mut pool, &language, list::NUMBER, Length::ZERO, len(1));
    let rbracket = tree::make_leaf(&mut pool, &language, list::RBRACKET, Length::ZERO, len(1));
    let array = tree::make_node(
        &mut pool,
        &language,
        list::ARRAY,
        vec![lbracket, number, rbracket],
        0,
    );

    tree::assign_parents(&mut pool, &language, array);

    assert_eq!(pool[lbracket].context.parent, Some(array));
    assert_eq!(pool[lbracket].context.index, 0);
    assert_eq!(pool[number].context.index, 1);
    assert_eq!(pool[number].context.offset.bytes, 1);
    assert_eq!(pool[rbracket].context.index, 2);
    assert_eq!(pool[rbracket].context.offset.bytes, 2);

    tree::release(&mut pool, array);
}

#[test]
fn sexp_shows_named_visible_nodes() {
    let language = list::language();
    let mut pool = TreePool::new();

    let lbracket = tree::make_leaf(&mut pool, &language, list::LBRACKET, Length::ZERO, len(1));
    let number = tree::make_leaf(&mut pool, &language, list::NUMBER, Length::ZERO, len(1));
    let rbracket = tree::make_leaf(&mut pool, &language, list::RBRACKET, Length::ZERO, len(1));
    let value = tree::make_node(&mut pool, &language, list::VALUE, vec![number], 0);
    let array = tree::make_node(
        &mut pool,
        &language,
        list::ARRAY,
        vec![lbracket, value, rbracket],
        0,
    );
    let document = tree::make_node(&mut pool, &language, list::DOCUMENT, vec![array], 0);

    assert_eq!(
        tree::write_sexp(&pool, &language, document),
        "(document (array (number)))"
    );

    tree::release(&mut pool, document);
}

#[test]
fn external_token_state_comparison() {
    let language = list::language();
    let mut pool = TreePool::new();

    let a = tree::make_leaf(&mut pool, &language, list::NUMBER, Length::ZERO, len(1));
    let b = tree::make_leaf(&mut pool, &language, list::NUMBER, Length::ZERO, len(1));
    assert!(tree::external_token_state_eq(&pool, None, None));
    assert!(tree::external_token_state_eq(&pool, Some(a), Some(b)));

    pool.get_mut(a).external_scanner_state = vec![1, 2];
    pool.get_mut(a).has_external_tokens = true;
    assert!(!tree::external_token_state_eq(&pool, Some(a), Some(b)));
    assert!(!tree::external_token_state_eq(&pool, Some(a), None));

    assert_eq!(tree::last_external_token(&pool, a), Some(a));
    assert_eq!(tree::last_external_token(&pool, b), None);

    let parent = tree::make_node(&mut pool, &language, list::VALUE, vec![a, b], 0);
    assert_eq!(tree::last_external_token(&pool, parent), Some(a));

    tree::release(&mut pool, parent);
}
