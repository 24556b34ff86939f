//! Minimal end-to-end walk-through: wire a small product network into the
//! engine, push a few updates, and print what each path did.
//!
//! Run with `RUST_LOG=debug cargo run --example price_update` to see the
//! per-update tracing output.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rete_core::core::{FieldMap, Value};
use rete_core::delta::propagator::{ClassicUpdate, PropagationConfig};
use rete_core::delta::{DeltaEngine, EngineConfig, FactDelta};
use rete_core::rete::{NetworkNode, NodeKind, StaticNetwork};

fn product_network() -> StaticNetwork {
    StaticNetwork::new()
        .with_node(
            NetworkNode::new("alpha_price", NodeKind::Alpha)
                .with_variable("Product")
                .with_condition(json!({
                    "type": "comparison",
                    "op": ">",
                    "left": { "type": "fieldAccess", "field": "price" },
                    "right": 100
                })),
        )
        .with_node(
            NetworkNode::new("alpha_stock", NodeKind::Alpha)
                .with_variable("Product")
                .with_condition(json!({
                    "type": "comparison",
                    "op": "==",
                    "left": { "type": "fieldAccess", "field": "stock" },
                    "right": 0
                })),
        )
        .with_node(
            NetworkNode::new("term_discount", NodeKind::Terminal)
                .with_variable("Product")
                .with_condition(json!({
                    "type": "fieldAccess",
                    "field": "price"
                }))
                .with_action(json!({
                    "type": "updateWithModifications",
                    "modifications": { "status": "discounted" }
                })),
        )
}

fn product(price: f64, stock: i64, status: &str) -> FieldMap {
    FieldMap::from([
        ("id".to_string(), Value::from("p123")),
        ("price".to_string(), Value::Float(price)),
        ("stock".to_string(), Value::Int(stock)),
        ("status".to_string(), Value::from(status)),
    ])
}

#[tokio::main]
async fn main() -> rete_core::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let engine = DeltaEngine::new(EngineConfig {
        propagation: PropagationConfig {
            primary_key_fields: vec!["id".to_string()],
            log_propagation_details: true,
            ..PropagationConfig::default()
        },
        ..EngineConfig::default()
    })
    .with_network(Arc::new(product_network()))
    .with_node_delivery(Arc::new(|node_id: String, delta: Arc<FactDelta>| {
        Box::pin(async move {
            let mut fields: Vec<&String> = delta.fields.keys().collect();
            fields.sort();
            info!(node = %node_id, ?fields, "delta delivered");
            Ok(())
        }) as BoxFuture<'static, rete_core::Result<()>>
    }))
    .with_classic_propagate(Arc::new(|update: ClassicUpdate| {
        Box::pin(async move {
            info!(fact_id = %update.fact_id, "classic retract+insert");
            Ok(())
        }) as BoxFuture<'static, rete_core::Result<()>>
    }))
    .with_storage_update(Arc::new(|fact_id: String, _fields: FieldMap| {
        Box::pin(async move {
            info!(fact_id = %fact_id, "snapshot persisted");
            Ok(())
        }) as BoxFuture<'static, rete_core::Result<()>>
    }));

    let baseline = product(100.0, 5, "active");

    // Single field change: delta path, two price-watching nodes.
    let outcome = engine
        .process_update(
            &baseline,
            &product(150.0, 5, "active"),
            "Product~p123",
            "Product",
        )
        .await?;
    info!(mode = ?outcome.mode, nodes = outcome.nodes_visited, "price update");

    // Most fields change at once: falls back to the classic path.
    let outcome = engine
        .process_update(
            &baseline,
            &product(80.0, 0, "clearance"),
            "Product~p123",
            "Product",
        )
        .await?;
    info!(mode = ?outcome.mode, reason = ?outcome.fallback_reason, "bulk update");

    // Identical snapshots: nothing runs.
    let outcome = engine
        .process_update(&baseline, &baseline, "Product~p123", "Product")
        .await?;
    info!(mode = ?outcome.mode, "no-change update");

    let stats = engine.statistics();
    println!(
        "{}",
        serde_json::to_string_pretty(&stats).unwrap_or_default()
    );

    Ok(())
}
