// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Hierarchical variable resolution across instance chains.

mod common;

use std::sync::Arc;

use serde_json::json;

use common::{CountingStore, memory_services, services_over, sqlite_services};
use runtara_orchestrator::instance::ProcessInstance;
use runtara_orchestrator::services::ProcessServices;
use runtara_orchestrator::store::MemoryStore;
use runtara_orchestrator::variable::{ProcessVariable, VariableKey, VariableType};

async fn store_instance(services: &ProcessServices, instance: &ProcessInstance) {
    assert!(services.instances().insert(instance).await.unwrap());
}

async fn store_output(services: &ProcessServices, owner: &ProcessInstance, task: &str, payload: serde_json::Value) {
    let variable = ProcessVariable::new(owner, task, VariableType::Output, payload).unwrap();
    services.variables().save(&variable).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_child_reads_root_output() {
    let services = memory_services();

    let root = ProcessInstance::new_root("order-process").with_id("root-1");
    store_instance(&services, &root).await;
    store_output(&services, &root, "t1", json!({"x": 1})).await;

    let mut child = ProcessInstance::child_of(&root, "fan-out", true).with_id("child-1");
    assert_eq!(child.root_id.as_deref(), Some("root-1"));
    assert_eq!(child.parent_id.as_deref(), Some("root-1"));
    store_instance(&services, &child).await;

    let unresolved = services
        .resolver()
        .resolve(&mut child, &[VariableKey::output("t1")])
        .await
        .unwrap();

    assert!(unresolved.is_empty());
    assert_eq!(
        child.variables.get("t1", VariableType::Output),
        Some(&json!({"x": 1}))
    );
}

#[tokio::test]
async fn test_sequential_child_does_not_read_parent() {
    let services = memory_services();

    let root = ProcessInstance::new_root("order-process").with_id("root-1");
    store_instance(&services, &root).await;
    store_output(&services, &root, "t1", json!("parent-only")).await;

    let mut child = ProcessInstance::child_of(&root, "sub-process", false).with_id("child-1");
    store_instance(&services, &child).await;

    let unresolved = services
        .resolver()
        .resolve(&mut child, &[VariableKey::output("t1")])
        .await
        .unwrap();

    assert_eq!(unresolved, vec![VariableKey::output("t1")]);
    assert!(child.variables.is_empty());
}

#[tokio::test]
async fn test_own_variables_win_over_ancestors() {
    let services = memory_services();

    let root = ProcessInstance::new_root("p").with_id("root-1");
    store_instance(&services, &root).await;
    store_output(&services, &root, "t1", json!("from-root")).await;

    let mut child = ProcessInstance::child_of(&root, "p", true).with_id("child-1");
    store_instance(&services, &child).await;
    store_output(&services, &child, "t1", json!("from-child")).await;

    services
        .resolver()
        .resolve(&mut child, &[VariableKey::output("t1")])
        .await
        .unwrap();

    assert_eq!(
        child.variables.get("t1", VariableType::Output),
        Some(&json!("from-child"))
    );
}

#[tokio::test]
async fn test_deep_chain_resolution() {
    let services = sqlite_services().await;

    // root -> c1 -> c2 -> c3, all concurrent
    let root = ProcessInstance::new_root("p").with_id("root-1");
    store_instance(&services, &root).await;
    store_output(&services, &root, "t-root", json!(0)).await;

    let mut chain = vec![root];
    for depth in 1..=3 {
        let parent = chain.last().unwrap();
        let child = ProcessInstance::child_of(parent, "p", true).with_id(format!("c{}", depth));
        store_instance(&services, &child).await;
        store_output(&services, &child, &format!("t-c{}", depth), json!(depth)).await;
        chain.push(child);
    }

    let mut leaf = chain.pop().unwrap();
    let deps = vec![
        VariableKey::output("t-root"),
        VariableKey::output("t-c1"),
        VariableKey::output("t-c2"),
        VariableKey::output("t-c3"),
        VariableKey::output("never-produced"),
    ];

    let unresolved = services.resolver().resolve(&mut leaf, &deps).await.unwrap();

    assert_eq!(unresolved, vec![VariableKey::output("never-produced")]);
    assert_eq!(leaf.variables.get("t-root", VariableType::Output), Some(&json!(0)));
    assert_eq!(leaf.variables.get("t-c1", VariableType::Output), Some(&json!(1)));
    assert_eq!(leaf.variables.get("t-c2", VariableType::Output), Some(&json!(2)));
    assert_eq!(leaf.variables.get("t-c3", VariableType::Output), Some(&json!(3)));
}

#[tokio::test]
async fn test_walk_stops_at_sequential_ancestor() {
    let services = memory_services();

    let root = ProcessInstance::new_root("p").with_id("root-1");
    store_instance(&services, &root).await;
    store_output(&services, &root, "t1", json!("unreachable")).await;

    // middle is a sequential sub-process, so its concurrent child can reach
    // middle but not root
    let middle = ProcessInstance::child_of(&root, "p", false).with_id("middle");
    store_instance(&services, &middle).await;
    store_output(&services, &middle, "t2", json!("reachable")).await;

    let mut leaf = ProcessInstance::child_of(&middle, "p", true).with_id("leaf");
    store_instance(&services, &leaf).await;

    let unresolved = services
        .resolver()
        .resolve(&mut leaf, &[VariableKey::output("t1"), VariableKey::output("t2")])
        .await
        .unwrap();

    assert_eq!(unresolved, vec![VariableKey::output("t1")]);
    assert_eq!(leaf.variables.get("t2", VariableType::Output), Some(&json!("reachable")));
}

#[tokio::test]
async fn test_short_circuit_makes_no_store_calls() {
    let counting = Arc::new(CountingStore::new(Arc::new(MemoryStore::new())));
    let services = services_over(counting.clone());

    let mut instance = ProcessInstance::new_root("p").with_id("root-1");
    instance.variables.put("t1", VariableType::Output, json!(1));
    instance.variables.put("t2", VariableType::State, json!(2));

    let deps = vec![
        VariableKey::output("t1"),
        VariableKey::new("t2", VariableType::State),
    ];
    let unresolved = services.resolver().resolve(&mut instance, &deps).await.unwrap();

    assert!(unresolved.is_empty());
    assert_eq!(counting.calls(), 0);
}

#[tokio::test]
async fn test_missing_parent_stops_silently() {
    let counting = Arc::new(CountingStore::new(Arc::new(MemoryStore::new())));
    let services = services_over(counting.clone());

    let root = ProcessInstance::new_root("p").with_id("root-1");
    // Root is never stored: the child's parent pointer dangles
    let mut child = ProcessInstance::child_of(&root, "p", true).with_id("child-1");

    let unresolved = services
        .resolver()
        .resolve(&mut child, &[VariableKey::output("t1")])
        .await
        .unwrap();

    assert_eq!(unresolved, vec![VariableKey::output("t1")]);
    assert!(child.variables.get("t1", VariableType::Output).is_none());
    // One bulk fetch for the child, one failed parent load
    assert_eq!(counting.calls(), 2);
}

#[tokio::test]
async fn test_hydrate_and_record() {
    let services = memory_services();
    let mut instance = ProcessInstance::new_root("p").with_id("root-1");

    let produced = vec![
        ProcessVariable::new(&instance, "t1", VariableType::Output, json!({"rows": 3})).unwrap(),
        ProcessVariable::new(&instance, "t1", VariableType::Input, json!({"q": "x"})).unwrap(),
    ];
    services.resolver().record(&mut instance, produced).await.unwrap();
    assert_eq!(instance.variables.len(), 2);

    let mut reloaded = ProcessInstance::new_root("p").with_id("root-1");
    let restored = services.resolver().hydrate(&mut reloaded).await.unwrap();
    assert_eq!(restored, 2);
    assert_eq!(
        reloaded.variables.get("t1", VariableType::Output),
        Some(&json!({"rows": 3}))
    );
}
