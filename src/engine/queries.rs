use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn get_rule(&self, id: Ulid) -> Result<AvailabilityRule, EngineError> {
        self.rules
            .find_by_id(id)
            .await?
            .ok_or(EngineError::NotFound(id))
    }

    /// All rules, or only those in `status`. Ordered by `valid_from`.
    pub async fn list_rules(
        &self,
        status: Option<RuleStatus>,
    ) -> Result<Vec<AvailabilityRule>, EngineError> {
        Ok(match status {
            Some(s) => self.rules.find_by_status(s).await?,
            None => self.rules.find_all().await?,
        })
    }

    pub async fn get_override(&self, id: Ulid) -> Result<AvailabilityOverride, EngineError> {
        self.overrides
            .find_by_id(id)
            .await?
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn list_overrides(
        &self,
        status: Option<OverrideStatus>,
    ) -> Result<Vec<AvailabilityOverride>, EngineError> {
        Ok(match status {
            Some(s) => self.overrides.find_by_status(s).await?,
            None => self.overrides.find_all().await?,
        })
    }

    /// Zone shared by every non-archived rule, if any rule exists.
    pub async fn calendar_timezone(&self) -> Result<Option<String>, EngineError> {
        Ok(self
            .rules
            .find_all_non_archived(None)
            .await?
            .into_iter()
            .next()
            .map(|r| r.timezone))
    }
}
