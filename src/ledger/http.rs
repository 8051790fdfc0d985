//! Ledger access through the election backend's REST API.

use super::{CastRequest, LedgerClient};
use crate::error::LedgerError;
use crate::integrity::{VoteHash, VoterAddress};
use crate::models::{ElectionMeta, LedgerVote, TxReceipt};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub struct HttpLedgerClient {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct CastBody<'a> {
    election_id: &'a str,
    voter_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    candidate_id: Option<&'a str>,
    encrypted_payload: String,
    vote_hash: VoteHash,
    #[serde(skip_serializing_if = "Option::is_none")]
    gas_limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CastResponse {
    transaction_hash: String,
    #[serde(default)]
    vote_hash: Option<VoteHash>,
    #[serde(default)]
    block_number: Option<u64>,
    #[serde(default)]
    gas_used: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct HasVotedResponse {
    has_voted: bool,
}

#[derive(Debug, Deserialize)]
struct ResultsResponse {
    total_votes: u64,
    #[serde(default)]
    candidate_results: HashMap<String, u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    detail: Option<String>,
}

impl HttpLedgerClient {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>, timeout: Duration) -> Result<Self, LedgerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::NetworkUnavailable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
            timeout,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.base_url, path));
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> LedgerError {
        if err.is_timeout() {
            LedgerError::Timeout(self.timeout)
        } else if err.is_decode() {
            LedgerError::InvalidResponse(err.to_string())
        } else {
            LedgerError::NetworkUnavailable(err.to_string())
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, LedgerError> {
        builder.send().await.map_err(|e| self.transport_error(e))
    }

    async fn decode<T: DeserializeOwned>(&self, response: Response) -> Result<T, LedgerError> {
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| self.transport_error(e));
        }
        let body = response.json::<ErrorBody>().await.unwrap_or_default();
        Err(classify_rejection(status, body.error.or(body.detail)))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, LedgerError> {
        let response = self.send(self.request(Method::GET, path)).await?;
        self.decode(response).await
    }
}

/// Maps a non-success backend response onto the ledger error taxonomy.
pub(crate) fn classify_rejection(status: StatusCode, message: Option<String>) -> LedgerError {
    let lower = message.as_deref().unwrap_or_default().to_ascii_lowercase();

    if status == StatusCode::CONFLICT || lower.contains("already voted") {
        LedgerError::AlreadyVoted
    } else if status == StatusCode::LOCKED || lower.contains("not active") {
        LedgerError::ElectionNotActive
    } else if status == StatusCode::NOT_FOUND {
        LedgerError::NotFound
    } else if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::UNAUTHORIZED
    {
        // Tokens rotate externally; 401 is transient here
        LedgerError::NetworkUnavailable(match message {
            Some(m) => format!("backend returned {}: {}", status, m),
            None => format!("backend returned {}", status),
        })
    } else {
        LedgerError::TransactionReverted(message)
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn has_voted(&self, election_id: &str, voter: &VoterAddress) -> Result<bool, LedgerError> {
        let voter = voter.to_string();
        let builder = self
            .request(Method::GET, &format!("/elections/{}/has-voted/", election_id))
            .query(&[("voter", voter.as_str())]);
        let response = self.send(builder).await?;
        let body: HasVotedResponse = self.decode(response).await?;
        Ok(body.has_voted)
    }

    async fn cast_vote(&self, request: &CastRequest) -> Result<TxReceipt, LedgerError> {
        let body = CastBody {
            election_id: &request.election_id,
            voter_address: request.voter_address.to_string(),
            candidate_id: request.candidate_id.as_deref(),
            encrypted_payload: hex::encode(&request.encrypted_payload),
            vote_hash: request.vote_hash,
            gas_limit: request.gas_limit,
        };
        debug!("POST /elections/vote/ for vote {}", request.vote_hash);

        let response = self.send(self.request(Method::POST, "/elections/vote/").json(&body)).await?;
        let cast: CastResponse = self.decode(response).await?;

        if let Some(returned) = cast.vote_hash {
            if returned != request.vote_hash {
                warn!("Backend reported vote hash {} for submitted vote {}", returned, request.vote_hash);
            }
        }

        Ok(TxReceipt {
            tx_hash: cast.transaction_hash,
            vote_hash: cast.vote_hash.or(Some(request.vote_hash)),
            block_number: cast.block_number,
            gas_used: cast.gas_used,
            confirmed_at: Utc::now(),
        })
    }

    async fn get_vote_count(&self, election_id: &str) -> Result<u64, LedgerError> {
        let results: ResultsResponse = self.get_json(&format!("/elections/{}/results/", election_id)).await?;
        Ok(results.total_votes)
    }

    async fn get_candidate_counts(&self, election_id: &str) -> Result<HashMap<String, u64>, LedgerError> {
        let results: ResultsResponse = self.get_json(&format!("/elections/{}/results/", election_id)).await?;
        Ok(results.candidate_results)
    }

    async fn get_vote(&self, vote_hash: &VoteHash) -> Result<Option<LedgerVote>, LedgerError> {
        match self.get_json(&format!("/elections/verify-vote/{}/", vote_hash)).await {
            Ok(vote) => Ok(Some(vote)),
            Err(LedgerError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_election(&self, election_id: &str) -> Result<ElectionMeta, LedgerError> {
        self.get_json(&format!("/elections/{}/", election_id)).await
    }
}
