//! HTTP + JSON client for the ledger authority.

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tessera_types::{Amount, WalletAddress};

use crate::agreement::{Agreement, AgreementId};
use crate::authority::{
    AuthorityError, Block, CreateAgreementRequest, GeneratedWallet, LedgerAuthority, MinedBlock,
    MiningOutcome, MiningRequest, ProgressReport, TransferRequest, TransitionReceipt,
    Verification, VerificationRequest,
};
use crate::config::ClientConfig;
use crate::error::WalletError;
use crate::mempool::MempoolSnapshot;

/// [`LedgerAuthority`] over the authority's REST interface.
///
/// Wraps `reqwest::Client` with the authority's base URL. Non-success
/// responses become [`AuthorityError::Rejected`] carrying the authority's
/// own `error` or `message` text; anything that prevents reading a response
/// becomes [`AuthorityError::Transport`].
#[derive(Clone)]
pub struct HttpAuthority {
    http: reqwest::Client,
    base: Url,
    mining_timeout: Duration,
}

impl HttpAuthority {
    pub fn new(config: &ClientConfig) -> Result<Self, WalletError> {
        let base = parse_base(&config.authority_url)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| WalletError::Transport(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            base,
            mining_timeout: Duration::from_secs(config.mining_timeout_secs),
        })
    }

    /// The configured authority URL.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, segments: &[&str]) -> Result<Url, AuthorityError> {
        endpoint(&self.base, segments)
    }

    /// Perform `request` and read the whole body, whatever the status.
    async fn exchange(&self, request: RequestBuilder) -> Result<(StatusCode, Vec<u8>), AuthorityError> {
        let response = request
            .send()
            .await
            .map_err(|e| AuthorityError::Transport(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| AuthorityError::Transport(format!("failed to read response: {e}")))?;
        Ok((status, body.to_vec()))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, AuthorityError> {
        let (status, body) = self.exchange(request).await?;
        if !status.is_success() {
            let reason = rejection_reason(status, &body);
            tracing::debug!(%status, %reason, "authority rejected request");
            return Err(AuthorityError::Rejected(reason));
        }
        decode(&body)
    }

    async fn transition(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<TransitionReceipt, AuthorityError> {
        let url = self.url(&["escrow", path])?;
        self.send(self.http.post(url).json(&body)).await
    }
}

fn parse_base(raw: &str) -> Result<Url, WalletError> {
    let mut base = Url::parse(raw.trim())
        .map_err(|e| WalletError::Config(format!("invalid authority URL {raw:?}: {e}")))?;
    if base.cannot_be_a_base() {
        return Err(WalletError::Config(format!(
            "authority URL {raw:?} cannot carry a path"
        )));
    }
    // Joined paths extend the base rather than replacing its last segment.
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base)
}

/// `base` with `segments` appended, each percent-encoded.
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, AuthorityError> {
    let mut url = base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| AuthorityError::Transport(format!("unusable base URL {base}")))?;
        path.pop_if_empty();
        path.extend(segments);
    }
    Ok(url)
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, AuthorityError> {
    serde_json::from_slice(body)
        .map_err(|e| AuthorityError::Transport(format!("invalid JSON response: {e}")))
}

/// `/verify_block` answers 200 `Válido` for a match and 400 `Error` for
/// anything else, including lookups it could not perform.
fn verdict(status: StatusCode, body: &[u8]) -> Result<Verification, AuthorityError> {
    let message = serde_json::from_slice::<MessageResponse>(body)
        .ok()
        .and_then(|r| r.message);
    match message.as_deref().map(str::trim) {
        Some("Válido") if status.is_success() => Ok(Verification::Valid),
        Some("Error") => Ok(Verification::Invalid),
        _ if !status.is_success() => Err(AuthorityError::Rejected(rejection_reason(status, body))),
        _ => Err(AuthorityError::Transport(format!(
            "unexpected verification answer: {message:?}"
        ))),
    }
}

/// The authority's explanation for a non-success response.
fn rejection_reason(status: StatusCode, body: &[u8]) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<String>,
        message: Option<String>,
    }

    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error.or(b.message))
        .filter(|reason| !reason.trim().is_empty())
        .unwrap_or_else(|| format!("authority returned HTTP {status}"))
}

#[derive(Deserialize)]
struct CreatedAgreement {
    agreement_id: AgreementId,
}

#[derive(Deserialize)]
struct AgreementList {
    #[serde(default)]
    agreements: Vec<Agreement>,
}

/// `/mine` answers with the forged block, or only a message when the
/// authority did not produce one in this request.
#[derive(Deserialize)]
struct MineResponse {
    #[serde(default)]
    index: Option<u64>,
    #[serde(default)]
    nonce: Option<u64>,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl MineResponse {
    fn into_outcome(self) -> MiningOutcome {
        match (self.nonce, self.hash) {
            (Some(nonce), Some(hash)) if !hash.is_empty() => MiningOutcome::Mined(MinedBlock {
                index: self.index,
                nonce,
                hash,
            }),
            _ => {
                tracing::debug!(message = ?self.message, "mining request acknowledged without a block");
                MiningOutcome::Accepted
            }
        }
    }
}

#[derive(Deserialize)]
struct BalanceResponse {
    balance: Amount,
}

#[derive(Deserialize)]
struct ChainResponse {
    chain: Vec<Block>,
}

#[derive(Deserialize)]
struct MessageResponse {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct DifficultyResponse {
    difficulty: u32,
}

#[async_trait]
impl LedgerAuthority for HttpAuthority {
    async fn create_agreement(
        &self,
        request: &CreateAgreementRequest,
    ) -> Result<AgreementId, AuthorityError> {
        let url = self.url(&["escrow", "create"])?;
        let created: CreatedAgreement = self.send(self.http.post(url).json(request)).await?;
        Ok(created.agreement_id)
    }

    async fn confirm_seller(
        &self,
        agreement_id: &AgreementId,
        seller: &WalletAddress,
    ) -> Result<TransitionReceipt, AuthorityError> {
        self.transition(
            "confirm-seller",
            json!({ "agreement_id": agreement_id, "seller": seller }),
        )
        .await
    }

    async fn confirm_shipment(
        &self,
        agreement_id: &AgreementId,
        seller: &WalletAddress,
        tracking_info: &str,
    ) -> Result<TransitionReceipt, AuthorityError> {
        self.transition(
            "confirm-shipment",
            json!({ "agreement_id": agreement_id, "seller": seller, "tracking_info": tracking_info }),
        )
        .await
    }

    async fn confirm_delivery(
        &self,
        agreement_id: &AgreementId,
        buyer: &WalletAddress,
    ) -> Result<TransitionReceipt, AuthorityError> {
        self.transition(
            "confirm-delivery",
            json!({ "agreement_id": agreement_id, "buyer": buyer }),
        )
        .await
    }

    async fn open_dispute(
        &self,
        agreement_id: &AgreementId,
        buyer: &WalletAddress,
        reason: &str,
    ) -> Result<TransitionReceipt, AuthorityError> {
        self.transition(
            "open-dispute",
            json!({ "agreement_id": agreement_id, "buyer": buyer, "reason": reason }),
        )
        .await
    }

    async fn get_agreement(
        &self,
        agreement_id: &AgreementId,
    ) -> Result<Option<Agreement>, AuthorityError> {
        let url = self.url(&["escrow", "agreement", agreement_id.as_str()])?;
        let (status, body) = self.exchange(self.http.get(url)).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(AuthorityError::Rejected(rejection_reason(status, &body)));
        }
        decode(&body).map(Some)
    }

    async fn list_agreements(
        &self,
        address: &WalletAddress,
    ) -> Result<Vec<Agreement>, AuthorityError> {
        let url = self.url(&["escrow", "agreements", address.as_str()])?;
        let list: AgreementList = self.send(self.http.get(url)).await?;
        Ok(list.agreements)
    }

    async fn submit_mining_job(
        &self,
        request: &MiningRequest,
    ) -> Result<MiningOutcome, AuthorityError> {
        let url = self.url(&["mine"])?;
        let response: MineResponse = self
            .send(self.http.post(url).json(request).timeout(self.mining_timeout))
            .await?;
        Ok(response.into_outcome())
    }

    async fn mining_progress(&self) -> Result<ProgressReport, AuthorityError> {
        let url = self.url(&["mine", "progress"])?;
        self.send(self.http.get(url)).await
    }

    async fn mempool(&self) -> Result<MempoolSnapshot, AuthorityError> {
        let url = self.url(&["mempool"])?;
        self.send(self.http.get(url)).await
    }

    async fn balance(&self, address: &WalletAddress) -> Result<Amount, AuthorityError> {
        let url = self.url(&["balance"])?;
        let response: BalanceResponse = self
            .send(self.http.get(url).query(&[("address", address.as_str())]))
            .await?;
        Ok(response.balance)
    }

    async fn chain(&self) -> Result<Vec<Block>, AuthorityError> {
        let url = self.url(&["chain"])?;
        let response: ChainResponse = self.send(self.http.get(url)).await?;
        Ok(response.chain)
    }

    async fn submit_transaction(
        &self,
        request: &TransferRequest,
    ) -> Result<String, AuthorityError> {
        let url = self.url(&["transactions", "new"])?;
        let response: MessageResponse = self.send(self.http.post(url).json(request)).await?;
        Ok(response
            .message
            .unwrap_or_else(|| "transaction accepted".to_string()))
    }

    async fn generate_wallet(&self) -> Result<GeneratedWallet, AuthorityError> {
        let url = self.url(&["generate_wallet"])?;
        self.send(self.http.get(url)).await
    }

    async fn verify_transaction(
        &self,
        request: &VerificationRequest,
    ) -> Result<Verification, AuthorityError> {
        let url = self.url(&["verify_block"])?;
        let (status, body) = self.exchange(self.http.post(url).json(request)).await?;
        let verification = verdict(status, &body)?;
        tracing::debug!(block = request.block_index, ?verification, "transaction verified");
        Ok(verification)
    }

    async fn difficulty(&self) -> Result<u32, AuthorityError> {
        let url = self.url(&["settings", "difficulty"])?;
        let response: DifficultyResponse = self.send(self.http.get(url)).await?;
        Ok(response.difficulty)
    }

    async fn set_difficulty(&self, difficulty: u32) -> Result<(), AuthorityError> {
        let url = self.url(&["settings", "difficulty"])?;
        let _: MessageResponse = self
            .send(self.http.post(url).json(&json!({ "difficulty": difficulty })))
            .await?;
        Ok(())
    }
}
