//! Bringing a bootstrap cluster up from nothing

use serde_json::Value;

use svmkit::graph::{NodeState, Operation, StackState};

use super::helpers::{
    bootstrap_stack, evaluate, ledger_hash, operation, ClusterSpec, RecordingTransport, BOOTSTRAP_HOST,
};

// =============================================================================
// Story: A fresh stack comes up in dependency order
// =============================================================================

#[tokio::test]
async fn validator_starts_only_after_genesis_is_built() {
    let transport = RecordingTransport::new();
    let report = evaluate(&transport, &bootstrap_stack(&ClusterSpec::default()), &StackState::new()).await;

    assert!(report.is_success(), "failures: {:?}", report.failures());
    for id in ["identity", "vote-account", "stake-account", "treasury", "genesis", "validator"] {
        assert_eq!(report.get(id).unwrap().state, NodeState::Ready, "{id}");
        assert_eq!(operation(&report, id), Some(Operation::Create), "{id}");
    }

    let genesis = transport.position("solana-genesis").expect("genesis ran");
    let validator = transport
        .position("systemctl restart svmkit-validator")
        .expect("validator installed");
    assert!(genesis < validator);
    assert!(transport.sent().iter().all(|s| s.host == BOOTSTRAP_HOST));
}

#[tokio::test]
async fn validator_expects_the_hash_genesis_produced() {
    let transport = RecordingTransport::new();
    let report = evaluate(&transport, &bootstrap_stack(&ClusterSpec::default()), &StackState::new()).await;

    let hash = report.outputs("genesis").unwrap()["genesisHash"]
        .as_str()
        .unwrap()
        .to_string();
    let digest = report.outputs("genesis").unwrap()["configDigest"].as_str().unwrap();
    assert_eq!(hash, ledger_hash(digest), "hash is read back from the ledger");
    let validator_inputs = &report.state().get("validator").unwrap().inputs;
    assert_eq!(validator_inputs["flags"]["expectedGenesisHash"], Value::from(hash.clone()));

    let install = &transport.bodies()[transport.position("systemctl restart svmkit-validator").unwrap()];
    assert!(install.script.contains(&format!("--expected-genesis-hash {hash}")));
}

#[tokio::test]
async fn validator_reports_identity_and_service_status() {
    let transport = RecordingTransport::new();
    let report = evaluate(&transport, &bootstrap_stack(&ClusterSpec::default()), &StackState::new()).await;

    let validator = report.outputs("validator").unwrap();
    assert_eq!(validator["status"], "running");
    assert_eq!(
        validator["identityPubkey"],
        report.outputs("identity").unwrap()["publicKey"]
    );
}

// =============================================================================
// Story: Key pairs are independent of each other
// =============================================================================

#[tokio::test]
async fn key_pairs_are_distinct_and_need_no_host() {
    let transport = RecordingTransport::new();
    let report = evaluate(&transport, &bootstrap_stack(&ClusterSpec::default()), &StackState::new()).await;

    let keys: Vec<String> = ["identity", "vote-account", "stake-account", "treasury"]
        .iter()
        .map(|id| report.outputs(id).unwrap()["publicKey"].as_str().unwrap().to_string())
        .collect();
    for (i, a) in keys.iter().enumerate() {
        for b in &keys[i + 1..] {
            assert_ne!(a, b);
        }
    }

    for id in ["identity", "vote-account", "stake-account", "treasury"] {
        assert!(report.state().get(id).unwrap().dependencies.is_empty(), "{id}");
    }
}

#[tokio::test]
async fn state_records_dependencies_for_teardown() {
    let transport = RecordingTransport::new();
    let report = evaluate(&transport, &bootstrap_stack(&ClusterSpec::default()), &StackState::new()).await;

    let order = report.state().teardown_order();
    let index = |id: &str| order.iter().position(|o| o == id).unwrap();
    assert!(index("validator") < index("genesis"));
    assert!(index("genesis") < index("identity"));
}
