use crate::error::{MarketError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type AgentId = String;
pub type RequestId = Uuid;
pub type ContractId = Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageRequest {
    pub buyer_id: AgentId,
    pub space_gb: u64,
    pub duration_hours: f64,
    pub max_price_per_gb_hour: f64,
    pub timestamp: f64,
    pub request_id: RequestId,
}

impl StorageRequest {
    pub fn new(
        buyer_id: impl Into<AgentId>,
        space_gb: u64,
        duration_hours: f64,
        max_price_per_gb_hour: f64,
        timestamp: f64,
    ) -> Self {
        Self {
            buyer_id: buyer_id.into(),
            space_gb,
            duration_hours,
            max_price_per_gb_hour,
            timestamp,
            request_id: Uuid::new_v4(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.space_gb == 0 {
            return Err(MarketError::MalformedMessage(format!(
                "request {} asks for 0GB",
                self.request_id
            )));
        }
        // written this way so NaN fails too
        if !(self.duration_hours > 0.0) || !self.duration_hours.is_finite() {
            return Err(MarketError::MalformedMessage(format!(
                "request {} has non-positive or unbounded duration {}",
                self.request_id, self.duration_hours
            )));
        }
        if !(self.max_price_per_gb_hour >= 0.0) || !self.max_price_per_gb_hour.is_finite() {
            return Err(MarketError::MalformedMessage(format!(
                "request {} has negative or unbounded max price {}",
                self.request_id, self.max_price_per_gb_hour
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageContract {
    pub contract_id: ContractId,
    pub buyer_id: AgentId,
    pub provider_id: AgentId,
    pub space_gb: u64,
    pub duration_hours: f64,
    pub price_per_gb_hour: f64,
    pub total_cost: f64,
    pub start_time: f64,
    pub end_time: f64,
    pub status: ContractStatus,
}

impl StorageContract {
    /// Builds a pending contract for `request` at `price_per_gb_hour`.
    ///
    /// `seconds_per_hour` maps contract hours onto the simulation clock.
    pub fn pending(
        request: &StorageRequest,
        provider_id: impl Into<AgentId>,
        price_per_gb_hour: f64,
        start_time: f64,
        seconds_per_hour: f64,
    ) -> Self {
        Self {
            contract_id: Uuid::new_v4(),
            buyer_id: request.buyer_id.clone(),
            provider_id: provider_id.into(),
            space_gb: request.space_gb,
            duration_hours: request.duration_hours,
            price_per_gb_hour,
            total_cost: Self::cost(request.space_gb, request.duration_hours, price_per_gb_hour),
            start_time,
            end_time: start_time + request.duration_hours * seconds_per_hour,
            status: ContractStatus::Pending,
        }
    }

    pub fn cost(space_gb: u64, duration_hours: f64, price_per_gb_hour: f64) -> f64 {
        space_gb as f64 * duration_hours * price_per_gb_hour
    }

    pub fn is_expired(&self, now: f64) -> bool {
        now >= self.end_time
    }

    pub fn with_status(mut self, status: ContractStatus) -> Self {
        self.status = status;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub agent_id: AgentId,
    pub total_space_gb: u64,
    pub available_space_gb: u64,
    pub reputation: f64,
    pub price_per_gb_hour: f64,
    pub last_seen: f64,
    pub success_count: u64,
    pub failure_count: u64,
}

impl ProviderInfo {
    pub fn success_rate(&self) -> f64 {
        let attempts = self.success_count + self.failure_count;
        if attempts == 0 {
            0.0
        } else {
            self.success_count as f64 / attempts as f64
        }
    }

    pub fn availability(&self) -> f64 {
        if self.total_space_gb == 0 {
            0.0
        } else {
            self.available_space_gb as f64 / self.total_space_gb as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub provider_id: AgentId,
    pub available_space_gb: u64,
    pub utilization: f64,
    pub reputation: f64,
    pub price_per_gb_hour: f64,
    pub active_contracts: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NoSuitableProvider,
    InsufficientSpace,
    ProviderFailure,
    NetworkCorruption,
    Timeout,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoSuitableProvider => "no_suitable_provider",
            Self::InsufficientSpace => "insufficient_space",
            Self::ProviderFailure => "provider_failure",
            Self::NetworkCorruption => "network_corruption",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
