//! Property tests: the delta path and the classic path must leave a node in
//! the same final state for any pair of fact snapshots.

use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;

use rete_core::core::{FieldMap, Value};
use rete_core::delta::detector::DetectorConfig;
use rete_core::delta::propagator::{
    ClassicPropagateFn, DeltaPropagator, NodeDeliveryFn, PropagationConfig,
};
use rete_core::delta::{DependencyIndex, OutcomeMode, PropagationMode};

const FIELDS: [&str; 5] = ["price", "stock", "status", "name", "rating"];

fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        (-1000i64..1000).prop_map(Value::Int),
        any::<bool>().prop_map(Value::Bool),
        "[a-z]{1,6}".prop_map(Value::from),
        (-1000i64..1000).prop_map(|n| Value::Float(n as f64)),
    ]
}

fn fact_strategy() -> impl Strategy<Value = FieldMap> {
    prop::collection::vec(prop::option::of(value_strategy()), FIELDS.len()).prop_map(|values| {
        let mut map = FieldMap::new();
        for (name, value) in FIELDS.iter().zip(values) {
            if let Some(v) = value {
                map.insert(name.to_string(), v);
            }
        }
        map
    })
}

/// A node that mirrors the fact: deltas patch its copy, classic replaces it.
struct MirrorNode {
    state: Mutex<FieldMap>,
}

impl MirrorNode {
    fn new(initial: FieldMap) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(initial),
        })
    }

    fn delivery(self: &Arc<Self>) -> NodeDeliveryFn {
        let node = Arc::clone(self);
        Arc::new(move |_node_id, delta| {
            let node = Arc::clone(&node);
            Box::pin(async move {
                let mut state = node.state.lock();
                for (name, field) in &delta.fields {
                    if field.new_value.is_null() {
                        state.remove(name);
                    } else {
                        state.insert(name.clone(), field.new_value.clone());
                    }
                }
                Ok(())
            })
        })
    }

    fn classic(self: &Arc<Self>) -> ClassicPropagateFn {
        let node = Arc::clone(self);
        Arc::new(move |update| {
            let node = Arc::clone(&node);
            Box::pin(async move {
                *node.state.lock() = update.new;
                Ok(())
            })
        })
    }
}

fn watcher_index() -> Arc<DependencyIndex> {
    let index = DependencyIndex::new();
    let fields: Vec<String> = FIELDS.iter().map(|s| s.to_string()).collect();
    index.add_alpha("watcher", "Fact", &fields);
    Arc::new(index)
}

fn propagator(mode: PropagationMode) -> DeltaPropagator {
    let p = DeltaPropagator::new(
        DetectorConfig::default(),
        PropagationConfig {
            default_mode: mode,
            ..PropagationConfig::default()
        },
    );
    p.set_index(watcher_index());
    p
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn delta_and_classic_paths_converge(old in fact_strategy(), new in fact_strategy()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let delta_node = MirrorNode::new(old.clone());
            let delta_prop = propagator(PropagationMode::Delta);
            delta_prop.update_callbacks(|cb| {
                cb.node_delivery = Some(delta_node.delivery());
                cb.classic_propagate = Some(delta_node.classic());
            });

            let classic_node = MirrorNode::new(old.clone());
            let classic_prop = propagator(PropagationMode::Classic);
            classic_prop.update_callbacks(|cb| {
                cb.node_delivery = Some(classic_node.delivery());
                cb.classic_propagate = Some(classic_node.classic());
            });

            delta_prop
                .propagate_update(&old, &new, "Fact~f1", "Fact")
                .await
                .unwrap();
            classic_prop
                .propagate_update(&old, &new, "Fact~f1", "Fact")
                .await
                .unwrap();

            let delta_state = delta_node.state.lock().clone();
            let classic_state = classic_node.state.lock().clone();
            prop_assert_eq!(delta_state, classic_state);
            Ok(())
        })?;
    }

    #[test]
    fn identical_snapshots_never_touch_the_node(fact in fact_strategy()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let node = MirrorNode::new(fact.clone());
            let prop = propagator(PropagationMode::Auto);
            prop.update_callbacks(|cb| {
                cb.node_delivery = Some(node.delivery());
                cb.classic_propagate = Some(node.classic());
            });

            let outcome = prop
                .propagate_update(&fact, &fact, "Fact~f1", "Fact")
                .await
                .unwrap();
            prop_assert_eq!(outcome.mode, OutcomeMode::Noop);
            prop_assert_eq!(node.state.lock().clone(), fact);
            Ok(())
        })?;
    }

    #[test]
    fn fields_changed_counts_differing_keys(old in fact_strategy(), new in fact_strategy()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let node = MirrorNode::new(old.clone());
            let prop = propagator(PropagationMode::Delta);
            prop.update_callbacks(|cb| {
                cb.node_delivery = Some(node.delivery());
                cb.classic_propagate = Some(node.classic());
            });

            let outcome = prop
                .propagate_update(&old, &new, "Fact~f1", "Fact")
                .await
                .unwrap();

            let expected = FIELDS
                .iter()
                .filter(|name| old.get(**name) != new.get(**name))
                .count();
            prop_assert_eq!(outcome.fields_changed, expected);
            Ok(())
        })?;
    }
}
