//! AWS IAM identity assertions for Vault's AWS auth method.
//!
//! Vault authenticates the sidecar by replaying a SigV4-signed
//! `sts:GetCallerIdentity` request to STS. This module resolves credentials
//! from the ambient AWS credential chain and produces that signed request; it
//! never calls STS itself.

pub mod sts;

pub use sts::{IdentityError, IdentityProvider, SignedRequest, StsIdentity, IAM_SERVER_ID_HEADER};
