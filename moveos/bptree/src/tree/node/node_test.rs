// Copyright (c) Kanari Network
// SPDX-License-Identifier: Apache-2.0

use super::*;
use proptest::collection::vec;
use proptest::prelude::*;

fn leaf(entries: &[(&str, &str)], next: Option<NodeId>) -> LeafNode {
    LeafNode {
        keys: entries.iter().map(|(k, _)| Bytes::from(k.to_string())).collect(),
        values: entries.iter().map(|(_, v)| Bytes::from(v.to_string())).collect(),
        next,
    }
}

#[test]
fn test_encode_decode() {
    let nodes = vec![
        Node::from(leaf(&[("a", "1"), ("b", "2")], Some(NodeId::leaf(7)))),
        Node::from(leaf(&[], None)),
        Node::from(InternalNode {
            keys: vec![Bytes::from("m")],
            children: vec![NodeId::root_leaf(), NodeId::leaf(3)],
        }),
    ];
    for n in &nodes {
        let v = n.encode().unwrap();
        assert_eq!(*n, Node::decode(&v).unwrap());
    }
    // Error cases
    if let Err(e) = Node::decode(&[]) {
        assert_eq!(
            e.downcast::<NodeDecodeError>().unwrap(),
            NodeDecodeError::EmptyInput
        );
    }
    if let Err(e) = Node::decode(&[100]) {
        assert_eq!(
            e.downcast::<NodeDecodeError>().unwrap(),
            NodeDecodeError::UnknownTag { unknown_tag: 100 }
        );
    }
}

#[test]
fn decode_rejects_mismatched_counts() {
    let mut lopsided_leaf = leaf(&[("a", "1")], None);
    lopsided_leaf.values.push(Bytes::from("stray"));
    let encoded = Node::from(lopsided_leaf).encode().unwrap();
    assert_eq!(
        Node::decode(&encoded)
            .unwrap_err()
            .downcast::<NodeDecodeError>()
            .unwrap(),
        NodeDecodeError::ValueCountMismatch { keys: 1, values: 2 }
    );

    let dangling_internal = InternalNode {
        keys: vec![Bytes::from("m")],
        children: vec![NodeId::leaf(1)],
    };
    let encoded = Node::from(dangling_internal).encode().unwrap();
    assert_eq!(
        Node::decode(&encoded)
            .unwrap_err()
            .downcast::<NodeDecodeError>()
            .unwrap(),
        NodeDecodeError::ChildCountMismatch {
            keys: 1,
            children: 1
        }
    );
}

#[test]
fn role_conversions_reject_the_wrong_variant() {
    let id = NodeId::leaf(1);
    let node = Node::new_leaf();
    assert!(node.clone().into_leaf(&id).is_ok());
    assert!(node.into_internal(&id).is_err());

    let internal = Node::from(InternalNode {
        keys: vec![Bytes::from("k")],
        children: vec![NodeId::leaf(1), NodeId::leaf(2)],
    });
    assert!(internal.clone().into_internal(&id).is_ok());
    assert!(internal.into_leaf(&id).is_err());
}

#[test]
fn identifier_prefixes() {
    assert_eq!(NodeId::root_leaf().as_bytes(), b"l:root");
    assert_eq!(NodeId::leaf(12).as_bytes(), b"l:12");
    assert_eq!(NodeId::internal(12).as_bytes(), b"i:12");
    assert_eq!(NodeId::internal(3).to_string(), "i:3");
}

#[test]
fn leaf_searches() {
    let node = leaf(&[("b", "2"), ("d", "4"), ("f", "6")], None);
    assert_eq!(node.insertion_slot(b"a"), 0);
    assert_eq!(node.insertion_slot(b"b"), 0);
    assert_eq!(node.insertion_slot(b"c"), 1);
    assert_eq!(node.insertion_slot(b"g"), 3);
    assert_eq!(node.entry_index(b"d"), Some(1));
    assert_eq!(node.entry_index(b"e"), None);
}

#[test]
fn equal_separator_descends_right() {
    let node = InternalNode {
        keys: vec![Bytes::from("c"), Bytes::from("f")],
        children: vec![NodeId::leaf(1), NodeId::leaf(2), NodeId::leaf(3)],
    };
    assert_eq!(node.child_slot(b"a"), 0);
    // A key equal to a separator lives in the right-hand subtree, because
    // the separator is a copy of that subtree's smallest key.
    assert_eq!(node.child_slot(b"c"), 1);
    assert_eq!(node.child_slot(b"d"), 1);
    assert_eq!(node.child_slot(b"f"), 2);
    assert_eq!(node.child_slot(b"z"), 2);
}

fn arb_bytes() -> impl Strategy<Value = Bytes> {
    vec(any::<u8>(), 0..24).prop_map(Bytes::from)
}

proptest! {
    #[test]
    fn test_leaf_node_roundtrip(
        keys in vec(arb_bytes(), 0..16),
        values in vec(arb_bytes(), 0..16),
        next_seq in proptest::option::of(any::<u64>()),
    ) {
        let n = keys.len().min(values.len());
        let node = Node::from(LeafNode {
            keys: keys[..n].to_vec(),
            values: values[..n].to_vec(),
            next: next_seq.map(NodeId::leaf),
        });
        let encoded = node.encode().unwrap();
        prop_assert_eq!(Node::decode(&encoded).unwrap(), node);
    }

    #[test]
    fn test_internal_node_roundtrip(
        keys in vec(arb_bytes(), 1..16),
        seqs in vec(any::<u64>(), 2..17),
    ) {
        let n = keys.len().min(seqs.len().saturating_sub(1));
        let node = Node::from(InternalNode {
            keys: keys[..n].to_vec(),
            children: seqs[..n + 1].iter().copied().map(NodeId::leaf).collect(),
        });
        let encoded = node.encode().unwrap();
        prop_assert_eq!(Node::decode(&encoded).unwrap(), node);
    }
}
