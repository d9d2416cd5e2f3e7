//! Drives the four-phase handshake that turns an asset into a [`Channel`].

use crate::control_plane::ControlPlane;
use crate::error::NegotiationError;
use crate::session::{NegotiationSession, PollVerdict};
use crate::types::{find_offer, CatalogRequest, ContractRequest, TransferRequest, DATASPACE_PROTOCOL};
use fedgate_types::{Channel, RemoteNode};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Attempt/interval budget of one polling phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollBudget {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 30,
        }
    }
}

/// Protocol-level knobs of the handshake.
#[derive(Debug, Clone)]
pub struct NegotiationSettings {
    pub protocol: String,
    pub transfer_type: String,
    /// Replaces the endpoint of every issued credential when set.
    pub endpoint_override: Option<String>,
    pub budget: PollBudget,
}

impl Default for NegotiationSettings {
    fn default() -> Self {
        Self {
            protocol: DATASPACE_PROTOCOL.to_string(),
            transfer_type: "pull".to_string(),
            endpoint_override: None,
            budget: PollBudget::default(),
        }
    }
}

/// Negotiation client over any [`ControlPlane`].
#[derive(Clone)]
pub struct NegotiationClient {
    control_plane: Arc<dyn ControlPlane>,
    settings: NegotiationSettings,
}

impl NegotiationClient {
    pub fn new(control_plane: Arc<dyn ControlPlane>, settings: NegotiationSettings) -> Self {
        Self {
            control_plane,
            settings,
        }
    }

    pub fn settings(&self) -> &NegotiationSettings {
        &self.settings
    }

    /// Runs the full handshake for `node`'s asset and returns its channel.
    ///
    /// # Errors
    ///
    /// - [`NegotiationError::Failed`] if the asset is not offered or the
    ///   remote terminates the negotiation or transfer.
    /// - [`NegotiationError::Timeout`] if a polling phase exhausts its budget.
    /// - [`NegotiationError::Protocol`] on an unexpected response.
    /// - [`NegotiationError::Transport`] if the control plane is unreachable.
    pub async fn obtain_channel(&self, node: &RemoteNode) -> Result<Channel, NegotiationError> {
        let mut session = NegotiationSession::new(&node.asset_id);
        tracing::info!(asset_id = %node.asset_id, node_key = %node.node_key, "starting handshake");

        match self.run(node, &mut session).await {
            Ok(channel) => {
                tracing::info!(
                    asset_id = %node.asset_id,
                    transfer_process_id = session.transfer_process_id.as_deref().unwrap_or_default(),
                    endpoint = %channel.endpoint,
                    "channel ready"
                );
                Ok(channel)
            }
            Err(e) => {
                let e = session.fail(e);
                tracing::warn!(
                    asset_id = %node.asset_id,
                    state = ?session.state(),
                    error = %e,
                    "handshake failed"
                );
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        node: &RemoteNode,
        session: &mut NegotiationSession,
    ) -> Result<Channel, NegotiationError> {
        let cp = self.control_plane.as_ref();
        let protocol = &self.settings.protocol;

        // 1. Catalog discovery
        session.catalog_requested()?;
        let catalog = cp
            .request_catalog(&CatalogRequest::new(node, protocol))
            .await?;
        let offer = find_offer(&catalog, &node.asset_id)?.ok_or_else(|| {
            NegotiationError::Failed(format!(
                "asset {} is not offered by {}",
                node.asset_id, node.counter_party_id
            ))
        })?;
        session.offer_found(&offer.offer_id)?;

        // 2. Contract negotiation
        let ack = cp
            .start_negotiation(&ContractRequest::new(node, protocol, &offer))
            .await?;
        session.negotiation_started(&ack.id)?;

        // 3. Negotiation polling
        let negotiation_id = ack.id;
        self.poll_until_settled(
            session,
            "negotiation",
            || cp.negotiation_status(&negotiation_id),
            NegotiationSession::apply_negotiation_poll,
        )
        .await?;

        // 4. Transfer initiation
        let contract_id = session
            .contract_agreement_id
            .clone()
            .ok_or_else(|| NegotiationError::Protocol("missing contract agreement".to_string()))?;
        let ack = cp
            .start_transfer(&TransferRequest::new(
                node,
                protocol,
                &contract_id,
                &self.settings.transfer_type,
            ))
            .await?;
        session.transfer_requested(&ack.id)?;

        // 5. Transfer polling
        let transfer_process_id = ack.id;
        self.poll_until_settled(
            session,
            "transfer",
            || cp.transfer_status(&transfer_process_id),
            NegotiationSession::apply_transfer_poll,
        )
        .await?;

        // 6. Credential retrieval
        let address = cp.data_address(&transfer_process_id).await?;
        let endpoint = match &self.settings.endpoint_override {
            Some(endpoint) => {
                tracing::debug!(issued = %address.endpoint, %endpoint, "overriding data-plane endpoint");
                endpoint.clone()
            }
            None => address.endpoint,
        };
        let channel = Channel::new(endpoint, address.authorization);
        session.channel_ready(channel.clone())?;
        Ok(channel)
    }

    /// Polls on a fixed interval until `apply` settles the phase or the
    /// attempt budget runs out.
    async fn poll_until_settled<R, F, Fut>(
        &self,
        session: &mut NegotiationSession,
        phase: &'static str,
        mut fetch: F,
        apply: fn(&mut NegotiationSession, &R) -> Result<PollVerdict, NegotiationError>,
    ) -> Result<(), NegotiationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, NegotiationError>>,
    {
        let PollBudget {
            interval,
            max_attempts,
        } = self.settings.budget;

        for attempt in 1..=max_attempts {
            tokio::time::sleep(interval).await;
            let response = fetch().await?;
            if apply(session, &response)? == PollVerdict::Settled {
                tracing::debug!(asset_id = %session.asset_id, phase, attempt, "phase settled");
                return Ok(());
            }
        }

        Err(session.time_out(phase, max_attempts))
    }
}
