//! Fakes shared by unit tests across modules.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::{MockServer, ResponseTemplate};

use crate::aws::sts::BoxFuture;
use crate::aws::{IdentityError, IdentityProvider, SignedRequest, IAM_SERVER_ID_HEADER};
use crate::vault::{AuthSettings, TokenManager, VaultClient};

pub(crate) const LOGIN_PATH: &str = "/v1/auth/aws/login";
pub(crate) const RENEW_PATH: &str = "/v1/auth/token/renew-self";

/// Returns a fixed, unsigned assertion.
pub(crate) struct StaticIdentity;

impl IdentityProvider for StaticIdentity {
    fn signed_caller_identity<'a>(
        &'a self,
        server_id: Option<&'a str>,
    ) -> BoxFuture<'a, Result<SignedRequest, IdentityError>> {
        Box::pin(async move {
            let mut headers = BTreeMap::new();
            if let Some(id) = server_id {
                headers.insert(IAM_SERVER_ID_HEADER.to_owned(), vec![id.to_owned()]);
            }
            Ok(SignedRequest {
                method: "POST".into(),
                url: "https://sts.amazonaws.com/".into(),
                headers,
                body: b"Action=GetCallerIdentity&Version=2011-06-15".to_vec(),
            })
        })
    }
}

pub(crate) fn client_for(server: &MockServer) -> VaultClient {
    VaultClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
}

pub(crate) fn manager_for(server: &MockServer) -> TokenManager {
    manager_at(&server.uri())
}

/// Manager for a Vault at `address`, which need not be listening.
pub(crate) fn manager_at(address: &str) -> TokenManager {
    TokenManager::new(
        VaultClient::new(address, Duration::from_secs(5)).unwrap(),
        Arc::new(StaticIdentity),
        AuthSettings {
            role: "my-role".into(),
            provider: "aws".into(),
            iam_server_id: None,
        },
        Duration::from_secs(10),
    )
}

pub(crate) fn login_reply(token: &str, lease_secs: u64, renewable: bool) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "auth": {
            "client_token": token,
            "lease_duration": lease_secs,
            "renewable": renewable,
        }
    }))
}

pub(crate) fn renew_reply(token: &str, lease_secs: u64, renewable: bool) -> ResponseTemplate {
    login_reply(token, lease_secs, renewable)
}
