//! Evaluating an applied stack again

use svmkit::graph::{NodeState, Operation, StackState};

use super::helpers::{bootstrap_stack, destroy, evaluate, operation, ClusterSpec, RecordingTransport};

async fn applied(transport: &RecordingTransport) -> StackState {
    let report = evaluate(transport, &bootstrap_stack(&ClusterSpec::default()), &StackState::new()).await;
    assert!(report.is_success(), "failures: {:?}", report.failures());
    transport.reset();
    report.into_state()
}

// =============================================================================
// Story: Nothing changed, nothing happens
// =============================================================================

#[tokio::test]
async fn unchanged_stack_makes_no_remote_calls() {
    let transport = RecordingTransport::new();
    let prior = applied(&transport).await;

    let report = evaluate(&transport, &bootstrap_stack(&ClusterSpec::default()), &prior).await;

    assert!(report.is_success());
    for node in report.nodes() {
        assert_eq!(node.operation, Some(Operation::Same), "{}", node.id);
    }
    assert!(transport.sent().is_empty());
    assert_eq!(transport.opens(), 0);
    assert_eq!(report.state(), &prior);
}

// =============================================================================
// Story: Changes are classified per resource
// =============================================================================

#[tokio::test]
async fn primordial_change_replaces_genesis() {
    let transport = RecordingTransport::new();
    let prior = applied(&transport).await;
    let old_hash = prior.get("genesis").unwrap().outputs["genesisHash"].clone();

    let spec = ClusterSpec {
        treasury_lamports: 200_000_000_000_000,
        ..Default::default()
    };
    let report = evaluate(&transport, &bootstrap_stack(&spec), &prior).await;

    assert!(report.is_success(), "failures: {:?}", report.failures());
    assert_eq!(operation(&report, "genesis"), Some(Operation::Replace));
    assert_ne!(report.outputs("genesis").unwrap()["genesisHash"], old_hash);

    let removed = transport
        .position(r#"mv "$LEDGER_PATH/.svmkit-genesis" "$LEDGER_PATH/.svmkit-genesis.retired""#)
        .expect("old genesis retired");
    let rebuilt = transport.position("solana-genesis").expect("genesis rebuilt");
    assert!(removed < rebuilt);

    // New hash flows into the validator flags; identity is unchanged
    assert_eq!(operation(&report, "validator"), Some(Operation::Update));
    assert_eq!(operation(&report, "identity"), Some(Operation::Same));
}

#[tokio::test]
async fn rpc_port_change_updates_validator_in_place() {
    let transport = RecordingTransport::new();
    let prior = applied(&transport).await;

    let spec = ClusterSpec {
        rpc_port: 9899,
        ..Default::default()
    };
    let report = evaluate(&transport, &bootstrap_stack(&spec), &prior).await;

    assert!(report.is_success(), "failures: {:?}", report.failures());
    assert_eq!(operation(&report, "validator"), Some(Operation::Update));
    assert_eq!(operation(&report, "genesis"), Some(Operation::Same));

    assert!(transport.position("systemctl stop").is_none());
    let install = &transport.bodies()[transport.position("systemctl restart svmkit-validator").unwrap()];
    assert!(install.script.contains("--rpc-port 9899"));
}

// =============================================================================
// Story: Removing resources
// =============================================================================

#[tokio::test]
async fn resource_dropped_from_stack_is_deleted() {
    let transport = RecordingTransport::new();
    let prior = applied(&transport).await;

    let mut stack = bootstrap_stack(&ClusterSpec::default());
    stack.resources.remove("validator");
    let report = evaluate(&transport, &stack, &prior).await;

    assert!(report.is_success(), "failures: {:?}", report.failures());
    assert_eq!(operation(&report, "validator"), Some(Operation::Delete));
    assert!(report.state().get("validator").is_none());
    assert!(transport.position("timeout 60 systemctl stop svmkit-validator").is_some());
}

#[tokio::test]
async fn destroy_tears_down_dependents_first() {
    let transport = RecordingTransport::new();
    let prior = applied(&transport).await;

    let report = destroy(&transport, &prior).await;

    assert!(report.is_success(), "failures: {:?}", report.failures());
    assert!(report.state().is_empty());
    for node in report.nodes() {
        assert_eq!(node.state, NodeState::Ready, "{}", node.id);
        assert_eq!(node.operation, Some(Operation::Delete), "{}", node.id);
    }

    let validator = transport.position("systemctl stop svmkit-validator").unwrap();
    let genesis = transport.position(".svmkit-genesis").unwrap();
    assert!(validator < genesis);
}
