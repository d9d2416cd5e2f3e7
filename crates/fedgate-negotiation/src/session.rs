//! Per-asset handshake state machine.
//!
//! ```text
//! Idle -> CatalogRequested -> OfferFound -> Negotiating -> Finalized
//!      -> TransferRequested -> TransferStarted -> ChannelReady
//! any state         -> Terminated
//! any polling state -> TimedOut
//! ```
//!
//! Polling phases are expressed as pure transition functions from the
//! current state and the latest poll response to the next state, so the
//! machine can be driven by scripted responses without a network or timers.

use crate::error::NegotiationError;
use crate::types::{NegotiationStatus, TransferStatus};
use fedgate_types::Channel;
use serde::Serialize;

/// Where a handshake currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Idle,
    CatalogRequested,
    OfferFound,
    Negotiating,
    Finalized,
    TransferRequested,
    TransferStarted,
    ChannelReady,
    Terminated,
    TimedOut,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::ChannelReady | Self::Terminated | Self::TimedOut)
    }

    /// States in which the driver polls the control plane.
    pub fn is_polling(self) -> bool {
        matches!(self, Self::Negotiating | Self::TransferRequested)
    }
}

/// Negotiation states after which no agreement will ever appear.
const NEGOTIATION_TERMINATED: &[&str] = &["TERMINATED", "TERMINATING"];

/// Transfer states after which no data-plane credential will be issued.
const TRANSFER_TERMINATED: &[&str] = &[
    "TERMINATED",
    "TERMINATING",
    "DEPROVISIONED",
    "DEPROVISIONING",
    "COMPLETED",
];

fn state_in(state: &str, set: &[&str]) -> bool {
    let state = state.trim_start_matches("edc:");
    set.iter().any(|s| s.eq_ignore_ascii_case(state))
}

/// Next state of the negotiation phase given the latest poll.
///
/// Only meaningful while `current` is [`SessionState::Negotiating`]; any
/// other state is returned unchanged.
pub fn negotiation_transition(current: SessionState, poll: &NegotiationStatus) -> SessionState {
    if current != SessionState::Negotiating {
        return current;
    }
    if state_in(&poll.state, &["FINALIZED"]) {
        SessionState::Finalized
    } else if state_in(&poll.state, NEGOTIATION_TERMINATED) {
        SessionState::Terminated
    } else {
        SessionState::Negotiating
    }
}

/// Next state of the transfer phase given the latest poll.
///
/// Only meaningful while `current` is [`SessionState::TransferRequested`].
pub fn transfer_transition(current: SessionState, poll: &TransferStatus) -> SessionState {
    if current != SessionState::TransferRequested {
        return current;
    }
    if state_in(&poll.state, &["STARTED"]) {
        SessionState::TransferStarted
    } else if state_in(&poll.state, TRANSFER_TERMINATED) {
        SessionState::Terminated
    } else {
        SessionState::TransferRequested
    }
}

/// Whether a polling phase needs another poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollVerdict {
    Pending,
    Settled,
}

/// The evolving state of one handshake for one asset.
#[derive(Debug, Clone)]
pub struct NegotiationSession {
    pub asset_id: String,
    state: SessionState,
    pub offer_id: Option<String>,
    pub negotiation_id: Option<String>,
    pub contract_agreement_id: Option<String>,
    pub transfer_process_id: Option<String>,
    pub channel: Option<Channel>,
    pub last_error: Option<NegotiationError>,
}

impl NegotiationSession {
    pub fn new(asset_id: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            state: SessionState::Idle,
            offer_id: None,
            negotiation_id: None,
            contract_agreement_id: None,
            transfer_process_id: None,
            channel: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn advance(&mut self, from: SessionState, to: SessionState) -> Result<(), NegotiationError> {
        if self.state != from {
            return Err(NegotiationError::Protocol(format!(
                "handshake for {} cannot move from {:?} to {:?}",
                self.asset_id, self.state, to
            )));
        }
        tracing::debug!(asset_id = %self.asset_id, from = ?from, to = ?to, "handshake transition");
        self.state = to;
        Ok(())
    }

    pub fn catalog_requested(&mut self) -> Result<(), NegotiationError> {
        self.advance(SessionState::Idle, SessionState::CatalogRequested)
    }

    pub fn offer_found(&mut self, offer_id: &str) -> Result<(), NegotiationError> {
        self.advance(SessionState::CatalogRequested, SessionState::OfferFound)?;
        self.offer_id = Some(offer_id.to_string());
        Ok(())
    }

    pub fn negotiation_started(&mut self, negotiation_id: &str) -> Result<(), NegotiationError> {
        self.advance(SessionState::OfferFound, SessionState::Negotiating)?;
        self.negotiation_id = Some(negotiation_id.to_string());
        Ok(())
    }

    /// Feeds one negotiation poll into the machine.
    ///
    /// Reaching `FINALIZED` records the agreement id. A remote termination
    /// is returned as [`NegotiationError::Failed`] right away.
    pub fn apply_negotiation_poll(
        &mut self,
        poll: &NegotiationStatus,
    ) -> Result<PollVerdict, NegotiationError> {
        if self.state != SessionState::Negotiating {
            return Err(NegotiationError::Protocol(format!(
                "negotiation poll received in state {:?}",
                self.state
            )));
        }
        match negotiation_transition(self.state, poll) {
            SessionState::Finalized => {
                let agreement = poll.contract_agreement_id.as_deref().ok_or_else(|| {
                    self.record(NegotiationError::Protocol(
                        "negotiation finalized without a contractAgreementId".to_string(),
                    ))
                })?;
                self.contract_agreement_id = Some(agreement.to_string());
                self.advance(SessionState::Negotiating, SessionState::Finalized)?;
                Ok(PollVerdict::Settled)
            }
            SessionState::Terminated => {
                self.state = SessionState::Terminated;
                let detail = poll
                    .error_detail
                    .clone()
                    .unwrap_or_else(|| format!("negotiation reached {}", poll.state));
                Err(self.record(NegotiationError::Failed(detail)))
            }
            _ => Ok(PollVerdict::Pending),
        }
    }

    pub fn transfer_requested(&mut self, transfer_process_id: &str) -> Result<(), NegotiationError> {
        self.advance(SessionState::Finalized, SessionState::TransferRequested)?;
        self.transfer_process_id = Some(transfer_process_id.to_string());
        Ok(())
    }

    /// Feeds one transfer poll into the machine.
    pub fn apply_transfer_poll(
        &mut self,
        poll: &TransferStatus,
    ) -> Result<PollVerdict, NegotiationError> {
        if self.state != SessionState::TransferRequested {
            return Err(NegotiationError::Protocol(format!(
                "transfer poll received in state {:?}",
                self.state
            )));
        }
        match transfer_transition(self.state, poll) {
            SessionState::TransferStarted => {
                self.advance(SessionState::TransferRequested, SessionState::TransferStarted)?;
                Ok(PollVerdict::Settled)
            }
            SessionState::Terminated => {
                self.state = SessionState::Terminated;
                let detail = poll
                    .error_detail
                    .clone()
                    .unwrap_or_else(|| format!("transfer process reached {}", poll.state));
                Err(self.record(NegotiationError::Failed(detail)))
            }
            _ => Ok(PollVerdict::Pending),
        }
    }

    pub fn channel_ready(&mut self, channel: Channel) -> Result<(), NegotiationError> {
        self.advance(SessionState::TransferStarted, SessionState::ChannelReady)?;
        self.channel = Some(channel);
        Ok(())
    }

    /// Marks the current polling phase as having exhausted its budget.
    pub fn time_out(&mut self, phase: &'static str, attempts: u32) -> NegotiationError {
        if self.state.is_polling() {
            self.state = SessionState::TimedOut;
        }
        self.record(NegotiationError::Timeout { phase, attempts })
    }

    /// Records a failure raised outside the poll transitions.
    ///
    /// Remote rejections terminate the session; other errors leave the state
    /// where the handshake stopped.
    pub fn fail(&mut self, error: NegotiationError) -> NegotiationError {
        if matches!(error, NegotiationError::Failed(_)) && !self.state.is_terminal() {
            self.state = SessionState::Terminated;
        }
        self.record(error)
    }

    fn record(&mut self, error: NegotiationError) -> NegotiationError {
        self.last_error = Some(error.clone());
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn negotiating() -> NegotiationSession {
        let mut session = NegotiationSession::new("node-A");
        session.catalog_requested().unwrap();
        session.offer_found("offer-1").unwrap();
        session.negotiation_started("neg-1").unwrap();
        session
    }

    #[test]
    fn pending_polls_keep_negotiating_until_finalized() {
        let mut session = negotiating();
        let script = std::iter::repeat(NegotiationStatus::pending("NEGOTIATING"))
            .take(29)
            .chain(std::iter::once(NegotiationStatus::finalized("X")));

        let mut verdicts = Vec::new();
        for poll in script {
            verdicts.push(session.apply_negotiation_poll(&poll).unwrap());
        }

        assert_eq!(verdicts.len(), 30);
        assert!(verdicts[..29].iter().all(|v| *v == PollVerdict::Pending));
        assert_eq!(verdicts[29], PollVerdict::Settled);
        assert_eq!(session.state(), SessionState::Finalized);
        assert_eq!(session.contract_agreement_id.as_deref(), Some("X"));
    }

    #[test]
    fn terminated_negotiation_fails_immediately() {
        let mut session = negotiating();
        let poll = NegotiationStatus {
            state: "TERMINATED".to_string(),
            contract_agreement_id: None,
            error_detail: Some("policy mismatch".to_string()),
        };
        let err = session.apply_negotiation_poll(&poll).unwrap_err();
        assert_eq!(err, NegotiationError::Failed("policy mismatch".to_string()));
        assert_eq!(session.state(), SessionState::Terminated);
        assert_eq!(session.last_error, Some(err));
    }

    #[test]
    fn finalized_without_agreement_is_a_protocol_error() {
        let mut session = negotiating();
        let err = session
            .apply_negotiation_poll(&NegotiationStatus::pending("FINALIZED"))
            .unwrap_err();
        assert!(matches!(err, NegotiationError::Protocol(_)));
    }

    #[test]
    fn phases_cannot_be_skipped() {
        let mut session = NegotiationSession::new("node-A");
        assert!(session.negotiation_started("neg-1").is_err());
        assert!(session.transfer_requested("tp-1").is_err());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn transfer_started_then_channel_ready() {
        let mut session = negotiating();
        session
            .apply_negotiation_poll(&NegotiationStatus::finalized("agreement-1"))
            .unwrap();
        session.transfer_requested("tp-1").unwrap();

        assert_eq!(
            session
                .apply_transfer_poll(&TransferStatus::new("REQUESTED"))
                .unwrap(),
            PollVerdict::Pending
        );
        assert_eq!(
            session
                .apply_transfer_poll(&TransferStatus::new("STARTED"))
                .unwrap(),
            PollVerdict::Settled
        );
        session
            .channel_ready(Channel::new("http://provider/public", "token"))
            .unwrap();
        assert_eq!(session.state(), SessionState::ChannelReady);
        assert!(session.state().is_terminal());
    }

    #[test]
    fn time_out_only_applies_to_polling_states() {
        let mut session = negotiating();
        let err = session.time_out("negotiation", 30);
        assert_eq!(
            err,
            NegotiationError::Timeout {
                phase: "negotiation",
                attempts: 30
            }
        );
        assert_eq!(session.state(), SessionState::TimedOut);
    }

    #[test]
    fn transitions_are_pure_functions_of_state_and_poll() {
        let poll = TransferStatus::new("STARTED");
        assert_eq!(
            transfer_transition(SessionState::TransferRequested, &poll),
            SessionState::TransferStarted
        );
        assert_eq!(
            transfer_transition(SessionState::Negotiating, &poll),
            SessionState::Negotiating
        );
        assert_eq!(
            negotiation_transition(
                SessionState::Negotiating,
                &NegotiationStatus::pending("edc:TERMINATING")
            ),
            SessionState::Terminated
        );
    }
}
