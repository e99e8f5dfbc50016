//! Errors surfaced by the sync facade.

use vtt_net::TransportError;

/// Why a [`crate::SyncClient`] action was refused or failed.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The local role may not perform this action.
    #[error("not authorized to {action}")]
    Unauthorized {
        /// The refused action.
        action: &'static str,
    },

    /// No live connection to the server.
    #[error("not connected to server")]
    NotConnected,

    /// The transport rejected the message.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
