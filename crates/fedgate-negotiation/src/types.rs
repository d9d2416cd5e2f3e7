//! Wire types for the control-plane management API.
//!
//! Outbound bodies are JSON-LD compacted against the EDC vocabulary, so plain
//! property names are used. Inbound bodies are read tolerantly: prefixed
//! (`dcat:`, `odrl:`, `edc:`) and unprefixed keys are both accepted.

use crate::error::NegotiationError;
use fedgate_types::RemoteNode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Default dataspace protocol identifier.
pub const DATASPACE_PROTOCOL: &str = "dataspace-protocol-http";

/// Vocabulary every outbound body is compacted against.
pub const EDC_VOCAB: &str = "https://w3id.org/edc/v0.0.1/ns/";

/// Namespace bound to the `odrl:` prefix in catalog policies.
pub const ODRL_NAMESPACE: &str = "http://www.w3.org/ns/odrl/2/";

/// Remote context that maps plain policy terms onto ODRL.
pub const ODRL_CONTEXT: &str = "http://www.w3.org/ns/odrl.jsonld";

fn edc_context() -> Value {
    json!({ "@vocab": EDC_VOCAB })
}

/// EDC vocabulary plus the `odrl` prefix, so echoed clauses keep their
/// catalog meaning after expansion.
fn policy_context() -> Value {
    json!({ "@vocab": EDC_VOCAB, "odrl": ODRL_NAMESPACE })
}

/// Body of `POST /catalog/request`.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogRequest {
    #[serde(rename = "@context")]
    pub context: Value,
    #[serde(rename = "@type")]
    pub kind: &'static str,
    #[serde(rename = "counterPartyAddress")]
    pub counter_party_address: String,
    #[serde(rename = "counterPartyId")]
    pub counter_party_id: String,
    pub protocol: String,
}

impl CatalogRequest {
    pub fn new(node: &RemoteNode, protocol: &str) -> Self {
        Self {
            context: edc_context(),
            kind: "CatalogRequest",
            counter_party_address: node.counter_party_address.clone(),
            counter_party_id: node.counter_party_id.clone(),
            protocol: protocol.to_string(),
        }
    }
}

/// A usage-policy offer discovered in a catalog.
///
/// The clauses are kept as raw JSON because the provider rejects any
/// negotiation whose policy differs from the one it advertised.
#[derive(Debug, Clone, PartialEq)]
pub struct Offer {
    pub offer_id: String,
    pub permission: Value,
    pub prohibition: Value,
    pub obligation: Value,
}

/// The `policy` member of a contract request.
///
/// Carries its own ODRL context: `Offer`, `permission` and the other plain
/// terms are ODRL terms, not EDC ones.
#[derive(Debug, Clone, Serialize)]
pub struct OfferPolicy {
    #[serde(rename = "@context")]
    pub context: &'static str,
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub kind: &'static str,
    pub assigner: String,
    pub target: String,
    pub permission: Value,
    pub prohibition: Value,
    pub obligation: Value,
}

/// Body of `POST /contractnegotiations`.
#[derive(Debug, Clone, Serialize)]
pub struct ContractRequest {
    #[serde(rename = "@context")]
    pub context: Value,
    #[serde(rename = "@type")]
    pub kind: &'static str,
    #[serde(rename = "counterPartyAddress")]
    pub counter_party_address: String,
    #[serde(rename = "counterPartyId")]
    pub counter_party_id: String,
    pub protocol: String,
    pub policy: OfferPolicy,
}

impl ContractRequest {
    pub fn new(node: &RemoteNode, protocol: &str, offer: &Offer) -> Self {
        Self {
            context: policy_context(),
            kind: "ContractRequest",
            counter_party_address: node.counter_party_address.clone(),
            counter_party_id: node.counter_party_id.clone(),
            protocol: protocol.to_string(),
            policy: OfferPolicy {
                context: ODRL_CONTEXT,
                id: offer.offer_id.clone(),
                kind: "Offer",
                assigner: node.counter_party_id.clone(),
                target: node.asset_id.clone(),
                permission: offer.permission.clone(),
                prohibition: offer.prohibition.clone(),
                obligation: offer.obligation.clone(),
            },
        }
    }
}

/// Body of `POST /transferprocesses`.
#[derive(Debug, Clone, Serialize)]
pub struct TransferRequest {
    #[serde(rename = "@context")]
    pub context: Value,
    #[serde(rename = "@type")]
    pub kind: &'static str,
    #[serde(rename = "connectorId")]
    pub connector_id: String,
    #[serde(rename = "counterPartyAddress")]
    pub counter_party_address: String,
    #[serde(rename = "contractId")]
    pub contract_id: String,
    pub protocol: String,
    #[serde(rename = "transferType")]
    pub transfer_type: String,
}

impl TransferRequest {
    pub fn new(node: &RemoteNode, protocol: &str, contract_id: &str, transfer_type: &str) -> Self {
        Self {
            context: edc_context(),
            kind: "TransferRequest",
            connector_id: node.counter_party_id.clone(),
            counter_party_address: node.counter_party_address.clone(),
            contract_id: contract_id.to_string(),
            protocol: protocol.to_string(),
            transfer_type: transfer_type.to_string(),
        }
    }
}

/// Acknowledgement carrying the id of a newly created process.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdResponse {
    #[serde(rename = "@id")]
    pub id: String,
}

/// Polled state of a contract negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NegotiationStatus {
    #[serde(alias = "edc:state")]
    pub state: String,
    #[serde(default, rename = "contractAgreementId", alias = "edc:contractAgreementId")]
    pub contract_agreement_id: Option<String>,
    #[serde(default, rename = "errorDetail", alias = "edc:errorDetail")]
    pub error_detail: Option<String>,
}

impl NegotiationStatus {
    pub fn pending(state: &str) -> Self {
        Self {
            state: state.to_string(),
            contract_agreement_id: None,
            error_detail: None,
        }
    }

    pub fn finalized(contract_agreement_id: &str) -> Self {
        Self {
            state: "FINALIZED".to_string(),
            contract_agreement_id: Some(contract_agreement_id.to_string()),
            error_detail: None,
        }
    }
}

/// Polled state of a transfer process.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransferStatus {
    #[serde(alias = "edc:state")]
    pub state: String,
    #[serde(default, rename = "errorDetail", alias = "edc:errorDetail")]
    pub error_detail: Option<String>,
}

impl TransferStatus {
    pub fn new(state: &str) -> Self {
        Self {
            state: state.to_string(),
            error_detail: None,
        }
    }
}

/// Endpoint data reference: where the data plane lives and how to call it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DataAddress {
    #[serde(alias = "edc:endpoint")]
    pub endpoint: String,
    #[serde(alias = "edc:authorization")]
    pub authorization: String,
}

fn member<'a>(value: &'a Value, prefix: &str, name: &str) -> Option<&'a Value> {
    value
        .get(format!("{prefix}:{name}"))
        .or_else(|| value.get(name))
}

/// Treats a JSON-LD member that may be a single object or an array uniformly.
fn one_or_many(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other],
    }
}

/// Scans a catalog for the dataset registered as `asset_id` and extracts its offer.
///
/// Returns `Ok(None)` when the catalog has no such dataset. A matching
/// dataset without a usable policy is a protocol error.
pub fn find_offer(catalog: &Value, asset_id: &str) -> Result<Option<Offer>, NegotiationError> {
    let datasets = one_or_many(member(catalog, "dcat", "dataset"));
    let Some(dataset) = datasets
        .into_iter()
        .find(|d| d.get("@id").and_then(Value::as_str) == Some(asset_id))
    else {
        return Ok(None);
    };

    let policy = one_or_many(member(dataset, "odrl", "hasPolicy"))
        .into_iter()
        .next()
        .ok_or_else(|| {
            NegotiationError::Protocol(format!("dataset {asset_id} carries no usage policy"))
        })?;

    let offer_id = policy
        .get("@id")
        .and_then(Value::as_str)
        .ok_or_else(|| NegotiationError::Protocol(format!("policy of {asset_id} has no @id")))?
        .to_string();

    let clause = |name: &str| {
        member(policy, "odrl", name)
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()))
    };

    Ok(Some(Offer {
        offer_id,
        permission: clause("permission"),
        prohibition: clause("prohibition"),
        obligation: clause("obligation"),
    }))
}
