//! Remote failures and malformed stacks

use svmkit::graph::{NodeState, StackState};
use svmkit::stack::Stack;
use svmkit::Error;

use super::helpers::{bootstrap_stack, evaluate, ClusterSpec, RecordingTransport};

// =============================================================================
// Story: A failed resource stops its dependents, not its siblings
// =============================================================================

#[tokio::test]
async fn genesis_failure_skips_the_validator() {
    let transport = RecordingTransport::new();
    transport.fail_when("solana-genesis", 1, "Error: insufficient funds for bootstrap stake");

    let report = evaluate(&transport, &bootstrap_stack(&ClusterSpec::default()), &StackState::new()).await;

    assert!(!report.is_success());
    let genesis = report.get("genesis").unwrap();
    assert_eq!(genesis.state, NodeState::Failed);
    assert!(genesis
        .error
        .as_deref()
        .unwrap()
        .contains("insufficient funds for bootstrap stake"));

    let validator = report.get("validator").unwrap();
    assert_eq!(validator.state, NodeState::Failed);
    assert!(validator.error.as_deref().unwrap().contains("dependency genesis failed"));
    assert!(transport.position("svmkit-validator").is_none());

    // Key pairs are unaffected and kept for the next run
    assert_eq!(report.get("identity").unwrap().state, NodeState::Ready);
    assert!(report.state().get("identity").is_some());
    assert!(report.state().get("genesis").is_none());
}

#[tokio::test]
async fn incompatible_ledger_is_reported_as_such() {
    let transport = RecordingTransport::new();
    transport.fail_when("solana-genesis", 90, "ledger at /home/sol/ledger was built from different inputs");

    let report = evaluate(&transport, &bootstrap_stack(&ClusterSpec::default()), &StackState::new()).await;

    let error = report.get("genesis").unwrap().error.clone().unwrap();
    assert!(error.contains("incompatible ledger"), "{error}");
}

#[tokio::test]
async fn failed_node_is_retried_on_the_next_run() {
    let transport = RecordingTransport::new();
    transport.fail_when("systemctl restart svmkit-validator", 1, "Failed to restart");
    let first = evaluate(&transport, &bootstrap_stack(&ClusterSpec::default()), &StackState::new()).await;
    assert_eq!(first.get("validator").unwrap().state, NodeState::Failed);

    let healthy = RecordingTransport::new();
    let second = evaluate(&healthy, &bootstrap_stack(&ClusterSpec::default()), first.state()).await;
    assert!(second.is_success(), "failures: {:?}", second.failures());
    assert!(healthy.position("systemctl restart svmkit-validator").is_some());
    assert!(healthy.position("solana-genesis").is_none());
}

// =============================================================================
// Story: Bad stacks are rejected before anything runs
// =============================================================================

#[test]
fn self_reference_is_a_cycle() {
    let yaml = r#"
resources:
  genesis:
    type: svm:genesis:Solana
    properties:
      flags: { identityPubkey: "${genesis.genesisHash}" }
"#;
    let err = Stack::from_yaml(yaml).unwrap().graph().unwrap_err();
    match err {
        Error::Cycle { path } => assert_eq!(path, vec!["genesis", "genesis"]),
        other => panic!("expected Cycle, got {other:?}"),
    }
}

#[test]
fn transitive_cycle_names_the_path() {
    let yaml = r#"
resources:
  a:
    type: svm:KeyPair
    dependsOn: [c]
  b:
    type: svm:KeyPair
    dependsOn: [a]
  c:
    type: svm:KeyPair
    dependsOn: [b]
"#;
    let err = Stack::from_yaml(yaml).unwrap().graph().unwrap_err();
    match err {
        Error::Cycle { path } => {
            assert_eq!(path.first(), path.last());
            assert_eq!(path.len(), 4);
        }
        other => panic!("expected Cycle, got {other:?}"),
    }
}

#[tokio::test]
async fn reference_to_undeclared_node_fails_before_any_call() {
    let yaml = r#"
resources:
  validator:
    type: svm:validator:Agave
    properties:
      flags: { expectedGenesisHash: "${genesis.genesisHash}" }
"#;
    let transport = RecordingTransport::new();
    let graph = Stack::from_yaml(yaml).unwrap().graph().unwrap();
    let ctx = svmkit::resource::ApplyContext::new(
        std::sync::Arc::new(transport.clone()),
        svmkit::retry::RetryConfig::default(),
    );
    let result = svmkit::graph::Evaluator::new(svmkit::resource::ResourceRegistry::builtin(), ctx)
        .evaluate(&graph, &StackState::new(), &tokio_util::sync::CancellationToken::new())
        .await;

    assert!(matches!(result, Err(Error::Validation { .. })));
    assert!(transport.sent().is_empty());
}
