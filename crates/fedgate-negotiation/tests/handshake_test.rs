use async_trait::async_trait;
use fedgate_negotiation::{
    CatalogRequest, ChannelCache, ContractRequest, ControlPlane, DataAddress, IdResponse,
    NegotiationClient, NegotiationError, NegotiationSettings, NegotiationStatus, PollBudget,
    TransferRequest, TransferStatus,
};
use fedgate_types::{Channel, RemoteNode};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Control plane that replays scripted responses and records every call.
struct ScriptedControlPlane {
    catalog: Value,
    negotiation_polls: Mutex<VecDeque<NegotiationStatus>>,
    transfer_polls: Mutex<VecDeque<TransferStatus>>,
    calls: Mutex<Vec<String>>,
    contract_ids: Mutex<Vec<String>>,
}

impl ScriptedControlPlane {
    fn new(catalog: Value) -> Self {
        Self {
            catalog,
            negotiation_polls: Mutex::new(VecDeque::new()),
            transfer_polls: Mutex::new(VecDeque::from([TransferStatus::new("STARTED")])),
            calls: Mutex::new(Vec::new()),
            contract_ids: Mutex::new(Vec::new()),
        }
    }

    fn with_negotiation_polls(self, polls: impl IntoIterator<Item = NegotiationStatus>) -> Self {
        *self.negotiation_polls.lock().unwrap() = polls.into_iter().collect();
        self
    }

    fn with_transfer_polls(self, polls: impl IntoIterator<Item = TransferStatus>) -> Self {
        *self.transfer_polls.lock().unwrap() = polls.into_iter().collect();
        self
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    fn count(&self, call: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == call)
            .count()
    }
}

#[async_trait]
impl ControlPlane for ScriptedControlPlane {
    async fn request_catalog(&self, _request: &CatalogRequest) -> Result<Value, NegotiationError> {
        self.record("catalog");
        Ok(self.catalog.clone())
    }

    async fn start_negotiation(
        &self,
        _request: &ContractRequest,
    ) -> Result<IdResponse, NegotiationError> {
        self.record("negotiate");
        Ok(IdResponse {
            id: "neg-1".to_string(),
        })
    }

    async fn negotiation_status(
        &self,
        _negotiation_id: &str,
    ) -> Result<NegotiationStatus, NegotiationError> {
        self.record("negotiation-status");
        Ok(self
            .negotiation_polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| NegotiationStatus::pending("REQUESTED")))
    }

    async fn start_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<IdResponse, NegotiationError> {
        self.record("transfer");
        self.contract_ids
            .lock()
            .unwrap()
            .push(request.contract_id.clone());
        Ok(IdResponse {
            id: "tp-1".to_string(),
        })
    }

    async fn transfer_status(
        &self,
        _transfer_process_id: &str,
    ) -> Result<TransferStatus, NegotiationError> {
        self.record("transfer-status");
        Ok(self
            .transfer_polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| TransferStatus::new("REQUESTED")))
    }

    async fn data_address(
        &self,
        _transfer_process_id: &str,
    ) -> Result<DataAddress, NegotiationError> {
        self.record("dataaddress");
        Ok(DataAddress {
            endpoint: "http://provider:19291/public".to_string(),
            authorization: "edr-token".to_string(),
        })
    }
}

fn node() -> RemoteNode {
    RemoteNode {
        node_id: 1001,
        node_key: "NODE_A".to_string(),
        display_name: "Node A".to_string(),
        asset_id: "node-A".to_string(),
        remote_source_key: "SYNPUF".to_string(),
        counter_party_address: "http://provider:19194/protocol".to_string(),
        counter_party_id: "provider".to_string(),
    }
}

fn catalog_with(asset_id: &str) -> Value {
    json!({
        "dcat:dataset": [{
            "@id": asset_id,
            "odrl:hasPolicy": {
                "@id": "offer-1",
                "odrl:permission": [],
                "odrl:prohibition": [],
                "odrl:obligation": []
            }
        }]
    })
}

fn client(cp: Arc<ScriptedControlPlane>, budget: PollBudget) -> NegotiationClient {
    NegotiationClient::new(
        cp,
        NegotiationSettings {
            budget,
            ..NegotiationSettings::default()
        },
    )
}

fn fast_budget() -> PollBudget {
    PollBudget {
        interval: Duration::from_millis(1),
        max_attempts: 5,
    }
}

#[tokio::test]
async fn missing_asset_fails_without_negotiating() {
    let cp = Arc::new(ScriptedControlPlane::new(catalog_with("some-other-asset")));
    let err = client(cp.clone(), fast_budget())
        .obtain_channel(&node())
        .await
        .unwrap_err();

    assert!(matches!(err, NegotiationError::Failed(_)), "got {err:?}");
    assert_eq!(cp.count("catalog"), 1);
    assert_eq!(cp.count("negotiate"), 0);
}

#[tokio::test(start_paused = true)]
async fn negotiation_finalized_on_last_attempt_proceeds_to_transfer() {
    let polls = std::iter::repeat(NegotiationStatus::pending("NEGOTIATING"))
        .take(29)
        .chain(std::iter::once(NegotiationStatus::finalized("X")));
    let cp = Arc::new(ScriptedControlPlane::new(catalog_with("node-A")).with_negotiation_polls(polls));

    let started = tokio::time::Instant::now();
    let channel = client(cp.clone(), PollBudget::default())
        .obtain_channel(&node())
        .await
        .unwrap();

    assert_eq!(cp.count("negotiation-status"), 30);
    assert_eq!(*cp.contract_ids.lock().unwrap(), vec!["X".to_string()]);
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(
        channel,
        Channel::new("http://provider:19291/public", "edr-token")
    );
}

#[tokio::test]
async fn terminated_negotiation_stops_polling() {
    let polls = [
        NegotiationStatus::pending("REQUESTED"),
        NegotiationStatus {
            state: "TERMINATED".to_string(),
            contract_agreement_id: None,
            error_detail: Some("contract refused".to_string()),
        },
    ];
    let cp = Arc::new(ScriptedControlPlane::new(catalog_with("node-A")).with_negotiation_polls(polls));

    let err = client(cp.clone(), fast_budget())
        .obtain_channel(&node())
        .await
        .unwrap_err();

    assert_eq!(err, NegotiationError::Failed("contract refused".to_string()));
    assert_eq!(cp.count("negotiation-status"), 2);
    assert_eq!(cp.count("transfer"), 0);
}

#[tokio::test]
async fn exhausted_budget_times_out() {
    let cp = Arc::new(ScriptedControlPlane::new(catalog_with("node-A")));
    let err = client(cp.clone(), fast_budget())
        .obtain_channel(&node())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        NegotiationError::Timeout {
            phase: "negotiation",
            attempts: 5
        }
    );
    assert_eq!(cp.count("negotiation-status"), 5);
}

#[tokio::test]
async fn transfer_that_never_starts_times_out() {
    let cp = Arc::new(
        ScriptedControlPlane::new(catalog_with("node-A"))
            .with_negotiation_polls([NegotiationStatus::finalized("agreement-1")])
            .with_transfer_polls(std::iter::repeat(TransferStatus::new("REQUESTED")).take(10)),
    );
    let err = client(cp.clone(), fast_budget())
        .obtain_channel(&node())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        NegotiationError::Timeout {
            phase: "transfer",
            attempts: 5
        }
    );
    assert_eq!(cp.count("transfer-status"), 5);
    assert_eq!(cp.count("dataaddress"), 0);
}

#[tokio::test]
async fn transfer_polling_follows_the_same_discipline() {
    let cp = Arc::new(
        ScriptedControlPlane::new(catalog_with("node-A"))
            .with_negotiation_polls([NegotiationStatus::finalized("agreement-1")])
            .with_transfer_polls([
                TransferStatus::new("REQUESTED"),
                TransferStatus::new("TERMINATED"),
            ]),
    );
    let err = client(cp.clone(), fast_budget())
        .obtain_channel(&node())
        .await
        .unwrap_err();

    assert!(matches!(err, NegotiationError::Failed(_)));
    assert_eq!(cp.count("transfer-status"), 2);
    assert_eq!(cp.count("dataaddress"), 0);
}

#[tokio::test]
async fn endpoint_override_replaces_issued_endpoint() {
    let cp = Arc::new(
        ScriptedControlPlane::new(catalog_with("node-A"))
            .with_negotiation_polls([NegotiationStatus::finalized("agreement-1")]),
    );
    let client = NegotiationClient::new(
        cp,
        NegotiationSettings {
            endpoint_override: Some("http://localhost:19291/public".to_string()),
            budget: fast_budget(),
            ..NegotiationSettings::default()
        },
    );

    let channel = client.obtain_channel(&node()).await.unwrap();
    assert_eq!(channel.endpoint, "http://localhost:19291/public");
    assert_eq!(channel.authorization, "edr-token");
}

#[tokio::test]
async fn cache_runs_one_handshake_for_concurrent_requests() {
    let cp = Arc::new(
        ScriptedControlPlane::new(catalog_with("node-A"))
            .with_negotiation_polls([NegotiationStatus::finalized("agreement-1")]),
    );
    let client = client(cp.clone(), fast_budget());
    let cache = ChannelCache::new();
    let node = node();

    let requests = (0..8).map(|_| {
        let cache = cache.clone();
        let client = client.clone();
        let node = node.clone();
        async move {
            let asset_id = node.asset_id.clone();
            cache
                .get_or_create(&asset_id, move || async move {
                    client.obtain_channel(&node).await
                })
                .await
        }
    });
    let leases = futures_util::future::join_all(requests).await;

    assert_eq!(cp.count("catalog"), 1);
    let first = leases[0].as_ref().unwrap().channel.clone();
    for lease in leases {
        assert_eq!(lease.unwrap().channel, first);
    }
}

#[tokio::test]
async fn failed_handshake_leaves_no_entry_and_retries_fresh() {
    let cp = Arc::new(ScriptedControlPlane::new(catalog_with("absent")));
    let client = client(cp.clone(), fast_budget());
    let cache = ChannelCache::new();
    let node = node();

    for _ in 0..2 {
        let (client, n) = (client.clone(), node.clone());
        let result = cache
            .get_or_create(&node.asset_id, move || async move {
                client.obtain_channel(&n).await
            })
            .await;
        assert!(result.is_err());
        assert!(!cache.contains(&node.asset_id));
    }
    assert_eq!(cp.count("catalog"), 2);
}
