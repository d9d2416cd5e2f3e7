//! Dataspace protocol client for fedgate.
//!
//! Turns an asset identifier into an authorized, time-bounded data-pull
//! [`Channel`](fedgate_types::Channel) by driving the consumer connector's
//! management API through four phases:
//!
//! 1. catalog discovery (find the asset's offer),
//! 2. contract negotiation (submit the offer verbatim, poll until finalized),
//! 3. transfer initiation (request a pull transfer, poll until started),
//! 4. credential retrieval (fetch the endpoint data reference).
//!
//! [`ChannelCache`] sits in front of the client and guarantees at most one
//! concurrent handshake per asset.

pub mod cache;
pub mod client;
pub mod control_plane;
pub mod error;
pub mod session;
pub mod types;

pub use cache::{ChannelCache, ChannelLease, EntryStatus};
pub use client::{NegotiationClient, NegotiationSettings, PollBudget};
pub use control_plane::{ControlPlane, ManagementClient, API_KEY_HEADER};
pub use error::NegotiationError;
pub use session::{NegotiationSession, PollVerdict, SessionState};
pub use types::{
    find_offer, CatalogRequest, ContractRequest, DataAddress, IdResponse, NegotiationStatus, Offer,
    TransferRequest, TransferStatus, DATASPACE_PROTOCOL, ODRL_CONTEXT, ODRL_NAMESPACE,
};
