use async_trait::async_trait;
use thiserror::Error;

use crate::domain::quote::OperatorId;
use crate::domain::request::ServiceRequest;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MatchingError {
    #[error("operator matching unavailable: {0}")]
    Unavailable(String),
}

/// Picks the operators a new request is announced to. Tier, service and
/// radius rules live behind this trait.
#[async_trait]
pub trait MatchingPort: Send + Sync {
    async fn match_operators(
        &self,
        request: &ServiceRequest,
    ) -> Result<Vec<OperatorId>, MatchingError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoMatching;

#[async_trait]
impl MatchingPort for NoMatching {
    async fn match_operators(
        &self,
        _request: &ServiceRequest,
    ) -> Result<Vec<OperatorId>, MatchingError> {
        Ok(Vec::new())
    }
}

/// Matches every request to the same operator list.
#[derive(Clone, Debug, Default)]
pub struct StaticMatching {
    operators: Vec<OperatorId>,
}

impl StaticMatching {
    pub fn new(operators: impl IntoIterator<Item = OperatorId>) -> Self {
        Self { operators: operators.into_iter().collect() }
    }
}

#[async_trait]
impl MatchingPort for StaticMatching {
    async fn match_operators(
        &self,
        _request: &ServiceRequest,
    ) -> Result<Vec<OperatorId>, MatchingError> {
        Ok(self.operators.clone())
    }
}
