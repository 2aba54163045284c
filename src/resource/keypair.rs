use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};

use super::{parse_inputs, to_outputs, ApplyContext, DiffKind, Resource, KEY_PAIR_TYPE};
use crate::keypair::{KeyAlgorithm, KeyPair, PublicKey, SecretBlob};
use crate::Result;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct KeyPairArgs {
    #[serde(default)]
    algorithm: KeyAlgorithm,
}

/// Outputs exposed to dependents
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct KeyPairOutputs {
    pub public_key: PublicKey,
    pub private_key: Vec<u8>,
    pub json: SecretBlob,
}

impl KeyPairOutputs {
    fn from_key(key: &KeyPair) -> Self {
        Self {
            public_key: key.public_key(),
            private_key: key.to_bytes().to_vec(),
            json: key.serialize(),
        }
    }
}

/// `svm:KeyPair`: a locally generated ed25519 key pair
///
/// Generation needs no host. Any input change generates a new key, and
/// deletion forgets the key without touching anything remote.
pub struct KeyPairResource;

#[async_trait]
impl Resource for KeyPairResource {
    fn type_token(&self) -> &'static str {
        KEY_PAIR_TYPE
    }

    fn check(&self, _ctx: &ApplyContext, id: &str, inputs: &Value) -> Result<()> {
        let args: KeyPairArgs = parse_inputs(id, inputs)?;
        // Surface unsupported algorithms before anything is scheduled
        if args.algorithm != KeyAlgorithm::Ed25519 {
            KeyPair::generate(id, args.algorithm)?;
        }
        Ok(())
    }

    fn diff(&self, _id: &str, _old: &Value, _new: &Value) -> Result<DiffKind> {
        Ok(DiffKind::Replace)
    }

    #[instrument(skip_all, fields(node = %id))]
    async fn create(&self, _ctx: &ApplyContext, id: &str, inputs: &Value) -> Result<Value> {
        let args: KeyPairArgs = parse_inputs(id, inputs)?;
        let key = KeyPair::generate(id, args.algorithm)?;
        info!(public_key = %key.public_key(), "generated key pair");
        to_outputs(KEY_PAIR_TYPE, &KeyPairOutputs::from_key(&key))
    }

    async fn update(
        &self,
        ctx: &ApplyContext,
        id: &str,
        _old_outputs: &Value,
        inputs: &Value,
    ) -> Result<Value> {
        self.create(ctx, id, inputs).await
    }

    async fn delete(&self, _ctx: &ApplyContext, _id: &str, _inputs: &Value, _outputs: &Value) -> Result<()> {
        Ok(())
    }
}
