//! Approval tokens: explicit customer consent before anything is charged.

use std::fmt;
use std::str::FromStr;

use common::AggregateId;
use domain::SessionService;
use event_store::EventStore;
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::signing::Signer;

/// A signed approval: `"{session_id}.{nonce}.{signature}"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalToken {
    pub session_id: AggregateId,
    pub nonce: String,
    signature: String,
}

impl fmt::Display for ApprovalToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.session_id, self.nonce, self.signature)
    }
}

impl FromStr for ApprovalToken {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, '.');
        let (Some(session_id), Some(nonce), Some(signature)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(PipelineError::InvalidApprovalToken);
        };
        if nonce.is_empty() || signature.is_empty() {
            return Err(PipelineError::InvalidApprovalToken);
        }
        let session_id =
            AggregateId::parse(session_id).map_err(|_| PipelineError::InvalidApprovalToken)?;
        Ok(Self {
            session_id,
            nonce: nonce.to_string(),
            signature: signature.to_string(),
        })
    }
}

/// What a verified token vouches for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalClaims {
    pub session_id: AggregateId,
    pub nonce: String,
}

/// Signs and verifies approval tokens with the approval secret.
#[derive(Debug, Clone)]
pub struct ApprovalSigner {
    signer: Signer,
}

impl ApprovalSigner {
    pub fn new(secret: &[u8]) -> Result<Self> {
        Ok(Self {
            signer: Signer::new(secret)?,
        })
    }

    pub fn sign(&self, session_id: AggregateId, nonce: &str) -> ApprovalToken {
        ApprovalToken {
            session_id,
            nonce: nonce.to_string(),
            signature: self.signer.sign(Self::message(session_id, nonce).as_bytes()),
        }
    }

    /// Checks the token's signature. Whether the nonce is still current is
    /// up to the session.
    pub fn verify(&self, token: &str) -> Result<ApprovalClaims> {
        let token: ApprovalToken = token.parse()?;
        let message = Self::message(token.session_id, &token.nonce);
        if !self.signer.verify(message.as_bytes(), &token.signature) {
            return Err(PipelineError::InvalidApprovalToken);
        }
        Ok(ApprovalClaims {
            session_id: token.session_id,
            nonce: token.nonce,
        })
    }

    fn message(session_id: AggregateId, nonce: &str) -> String {
        format!("{session_id}.{nonce}")
    }
}

/// Records consent on a ready session and hands back a token.
pub struct ApprovalGate<S: EventStore> {
    sessions: SessionService<S>,
    signer: ApprovalSigner,
}

impl<S: EventStore> ApprovalGate<S> {
    pub fn new(store: S, signer: ApprovalSigner) -> Self {
        Self {
            sessions: SessionService::new(store),
            signer,
        }
    }

    pub fn signer(&self) -> &ApprovalSigner {
        &self.signer
    }

    /// Approves a ready design for purchase.
    ///
    /// Every approval gets a fresh nonce, so approving again invalidates
    /// tokens handed out earlier. A rejected approval leaves the session
    /// untouched.
    #[tracing::instrument(skip(self))]
    pub async fn approve(&self, session_id: AggregateId, consent: bool) -> Result<ApprovalToken> {
        let nonce = Uuid::new_v4().simple().to_string();
        self.sessions
            .record_consent(session_id, consent, nonce.clone())
            .await?;

        tracing::info!(%session_id, "design approved");
        Ok(self.signer.sign(session_id, &nonce))
    }
}
