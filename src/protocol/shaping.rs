//! Result shaping applied to rows before they are encoded.
//!
//! Executors hand back plain values. Some of those values are graph nodes
//! flattened into maps; drivers only recognise a node when it arrives as a
//! Node structure, so each row goes through [`shape_value`] on its way out.

use crate::packstream::{Map, Structure, Value};

use super::Signature;

/// Map key holding a node's identity.
pub const NODE_ID_KEY: &str = "_nodeId";
/// Map key holding a node's labels.
pub const NODE_LABELS_KEY: &str = "labels";

/// Rewrites node-shaped maps, at any depth, into Node structures
/// (`id`, `labels`, `properties`). Other values pass through unchanged.
pub fn shape_value(value: Value) -> Value {
    match value {
        Value::Map(map) if is_node(&map) => Value::Structure(node(map)),
        Value::Map(map) => Value::Map(map.into_iter().map(|(k, v)| (k, shape_value(v))).collect()),
        Value::List(items) => Value::List(items.into_iter().map(shape_value).collect()),
        other => other,
    }
}

fn is_node(map: &Map) -> bool {
    map.contains_key(NODE_ID_KEY) && map.contains_key(NODE_LABELS_KEY)
}

fn node(mut map: Map) -> Structure {
    let id = match map.remove(NODE_ID_KEY) {
        Some(Value::Integer(id)) => id,
        Some(Value::String(id)) => node_id(&id),
        _ => 0,
    };
    let labels = match map.remove(NODE_LABELS_KEY) {
        Some(Value::List(labels)) => labels
            .into_iter()
            .filter(|l| matches!(l, Value::String(_)))
            .collect(),
        _ => Vec::new(),
    };
    let properties = map.into_iter().map(|(k, v)| (k, shape_value(v))).collect();

    Structure::new(
        Signature::NODE.into(),
        vec![
            Value::Integer(id),
            Value::List(labels),
            Value::Map(properties),
        ],
    )
}

/// Drivers expect integer node ids; string ids are folded into a stable one.
fn node_id(id: &str) -> i64 {
    id.chars()
        .fold(0i64, |acc, c| acc.wrapping_mul(31).wrapping_add(c as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{map, packstream::encode};

    #[test]
    fn node_map_becomes_structure() {
        let row = Value::Map(map! {
            "_nodeId" => 7,
            "labels" => vec!["Person".to_string()],
            "name" => "Ada",
        });

        assert_eq!(
            shape_value(row),
            Value::Structure(Structure::new(
                0x4E,
                vec![
                    Value::Integer(7),
                    Value::List(vec!["Person".into()]),
                    Value::Map(map! { "name" => "Ada" }),
                ]
            ))
        );
    }

    #[test]
    fn string_ids_hash_stably() {
        assert_eq!(node_id("a"), 97);
        assert_eq!(node_id("ab"), 97 * 31 + 98);
        assert_eq!(node_id("n-1"), node_id("n-1"));
    }

    #[test]
    fn node_encodes_as_tagged_structure() {
        let row = Value::Map(map! { "_nodeId" => "a", "labels" => Value::List(vec![]) });
        assert_eq!(
            encode(&shape_value(row)),
            vec![0xB3, 0x4E, 0x61, 0x90, 0xA0]
        );
    }

    #[test]
    fn nested_nodes_are_found() {
        let inner = Value::Map(map! { "_nodeId" => 1, "labels" => Value::List(vec![]) });
        let row = Value::List(vec![Value::Map(map! { "n" => inner })]);

        let Value::List(items) = shape_value(row) else {
            panic!("not a list");
        };
        let outer = items[0].as_map().unwrap();
        assert!(matches!(outer.get("n"), Some(Value::Structure(s)) if s.signature == 0x4E));
    }

    #[test]
    fn plain_maps_are_untouched() {
        let row = Value::Map(map! { "labels" => Value::List(vec![]), "x" => 1 });
        assert_eq!(shape_value(row.clone()), row);
    }
}
