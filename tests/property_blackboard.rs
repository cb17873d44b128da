use proptest::prelude::*;
use serde_json::json;
use swarm_core::blackboard::{Blackboard, Writer};

#[derive(Debug, Clone)]
enum Op {
    Write(u8),
    Append(u8),
    Delete,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<u8>().prop_map(Op::Write),
        any::<u8>().prop_map(Op::Append),
        Just(Op::Delete),
    ]
}

proptest! {
    /// Reading a section back immediately after writing it always returns
    /// exactly that value, whatever interleaving of writers/keys preceded
    /// it, and a deleted section is never reported as present.
    #[test]
    fn write_then_read_round_trips_under_arbitrary_interleaving(
        ops in prop::collection::vec(op_strategy(), 0..50),
        key_count in 1usize..4,
    ) {
        let board = Blackboard::new(true);
        let keys: Vec<String> = (0..key_count).map(|i| format!("section-{i}")).collect();

        for (i, op) in ops.iter().enumerate() {
            let key = &keys[i % keys.len()];
            match op {
                Op::Write(n) => {
                    board.write(key, json!(n), Writer::Agent(format!("agent-{n}")));
                    prop_assert_eq!(board.read(key).ok(), Some(json!(n)));
                }
                Op::Append(n) => {
                    if !board.has(key) {
                        board.write(key, json!([]), Writer::System);
                    }
                    let before = board.read(key).unwrap();
                    if before.is_array() {
                        board.append(key, json!(n), Writer::Agent(format!("agent-{n}"))).unwrap();
                    }
                }
                Op::Delete => {
                    board.delete(key);
                    prop_assert!(!board.has(key));
                }
            }
        }
    }

    /// Every successful write/append strictly increases that section's
    /// version and its history length, regardless of how many distinct
    /// sections are interleaved with it.
    #[test]
    fn version_and_history_length_are_monotonic_per_section(
        writes in prop::collection::vec(any::<u8>(), 1..30),
    ) {
        let board = Blackboard::new(true);
        let mut previous_version = 0;
        for n in writes {
            let section = board.write("k", json!(n), Writer::Agent("a".to_string()));
            prop_assert!(section.version > previous_version);
            prop_assert_eq!(board.get_history("k").len() as u64, section.version);
            previous_version = section.version;
        }
    }
}
