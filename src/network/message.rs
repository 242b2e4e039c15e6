use crate::contract::{
    AgentId, ContractId, FailureReason, ProviderInfo, RequestId, StatusUpdate, StorageContract,
    StorageRequest,
};
use crate::error::{MarketError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(u64);

impl MessageId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    StorageRequest(StorageRequest),
    AllocationRequest {
        request_id: RequestId,
        contract: StorageContract,
    },
    AllocationResponse(AllocationResponse),
    StorageResponse(StorageResponse),
    ProviderRegistration(ProviderInfo),
    StatusUpdate(StatusUpdate),
}

impl Message {
    pub const KINDS: [&'static str; 6] = [
        "storage_request",
        "allocation_request",
        "allocation_response",
        "storage_response",
        "provider_registration",
        "status_update",
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            Self::StorageRequest(_) => "storage_request",
            Self::AllocationRequest { .. } => "allocation_request",
            Self::AllocationResponse(_) => "allocation_response",
            Self::StorageResponse(_) => "storage_response",
            Self::ProviderRegistration(_) => "provider_registration",
            Self::StatusUpdate(_) => "status_update",
        }
    }

    /// Decodes a raw body, checking the `type` tag before the payload so an
    /// unknown tag is reported as such instead of as a parse failure.
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| MarketError::MalformedMessage(e.to_string()))?;

        let tag = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| MarketError::MalformedMessage("missing `type` tag".to_string()))?;

        if !Self::KINDS.contains(&tag) {
            return Err(MarketError::UnknownMessageType(tag.to_string()));
        }

        let message: Self = serde_json::from_value(value)
            .map_err(|e| MarketError::MalformedMessage(e.to_string()))?;
        message.validate()?;
        Ok(message)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| MarketError::MalformedMessage(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::StorageRequest(request) => request.validate(),
            Self::AllocationRequest { contract, .. } if contract.space_gb == 0 => Err(
                MarketError::MalformedMessage(format!("contract {} reserves 0GB", contract.contract_id)),
            ),
            Self::ProviderRegistration(info) if info.available_space_gb > info.total_space_gb => {
                Err(MarketError::MalformedMessage(format!(
                    "provider {} reports more free space than capacity",
                    info.agent_id
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn unexpected(&self, agent: &str) -> MarketError {
        MarketError::UnexpectedMessage {
            agent: agent.to_string(),
            kind: self.kind(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationResponse {
    pub request_id: RequestId,
    pub provider_id: AgentId,
    #[serde(flatten)]
    pub decision: AllocationDecision,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AllocationDecision {
    Accepted { contract_id: ContractId },
    Rejected { reason: FailureReason },
}

impl AllocationDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageResponse {
    pub request_id: RequestId,
    #[serde(flatten)]
    pub outcome: StorageOutcome,
}

impl StorageResponse {
    pub fn success(request_id: RequestId, contract: StorageContract) -> Self {
        Self {
            request_id,
            outcome: StorageOutcome::Success { contract },
        }
    }

    pub fn failure(request_id: RequestId, reason: FailureReason) -> Self {
        Self {
            request_id,
            outcome: StorageOutcome::Failure { reason },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StorageOutcome {
    Success { contract: StorageContract },
    Failure { reason: FailureReason },
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub id: MessageId,
    pub from: AgentId,
    pub to: AgentId,
    pub body: Message,
    pub sent_at: f64,
    pub latency: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::ContractStatus;
    use uuid::Uuid;

    #[test]
    fn storage_response_carries_type_and_status_tags() {
        let response = Message::StorageResponse(StorageResponse::failure(
            Uuid::nil(),
            FailureReason::NoSuitableProvider,
        ));
        let json: serde_json::Value = serde_json::from_str(&response.to_json().unwrap()).unwrap();

        assert_eq!(json["type"], "storage_response");
        assert_eq!(json["status"], "failure");
        assert_eq!(json["reason"], "no_suitable_provider");
    }

    #[test]
    fn decodes_allocation_response() {
        let raw = format!(
            r#"{{"type":"allocation_response","request_id":"{}","provider_id":"provider0","status":"rejected","reason":"insufficient_space"}}"#,
            Uuid::nil()
        );
        let message = Message::from_json(&raw).unwrap();

        match message {
            Message::AllocationResponse(resp) => {
                assert_eq!(resp.provider_id, "provider0");
                assert_eq!(
                    resp.decision,
                    AllocationDecision::Rejected { reason: FailureReason::InsufficientSpace }
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decodes_success_with_contract() {
        let request = StorageRequest::new("buyer0", 10, 1.0, 1.0, 0.0);
        let contract = StorageContract::pending(&request, "provider0", 0.5, 0.0, 60.0)
            .with_status(ContractStatus::Active);
        let raw = Message::StorageResponse(StorageResponse::success(request.request_id, contract.clone()))
            .to_json()
            .unwrap();

        match Message::from_json(&raw).unwrap() {
            Message::StorageResponse(StorageResponse {
                outcome: StorageOutcome::Success { contract: decoded },
                ..
            }) => assert_eq!(decoded, contract),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_tag_is_reported_explicitly() {
        let err = Message::from_json(r#"{"type":"gossip","payload":1}"#).unwrap_err();
        assert_eq!(err, MarketError::UnknownMessageType("gossip".into()));
    }

    #[test]
    fn missing_tag_and_bad_payload_are_malformed() {
        assert!(matches!(
            Message::from_json(r#"{"request_id":1}"#),
            Err(MarketError::MalformedMessage(_))
        ));
        assert!(matches!(
            Message::from_json(r#"{"type":"status_update","provider_id":"p"}"#),
            Err(MarketError::MalformedMessage(_))
        ));
        assert!(matches!(Message::from_json("not json"), Err(MarketError::MalformedMessage(_))));
    }

    #[test]
    fn zero_space_request_fails_validation() {
        let mut request = StorageRequest::new("buyer0", 10, 1.0, 1.0, 0.0);
        request.space_gb = 0;
        let raw = Message::StorageRequest(request).to_json().unwrap();
        assert!(matches!(Message::from_json(&raw), Err(MarketError::MalformedMessage(_))));
    }
}
