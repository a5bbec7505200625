//! Rule administration: change quotas of a running process.
//!
//! [`RuleAdmin`] is a `tower::Service<AdminCommand>`, so a transport (an HTTP
//! route, a channel, a CLI) only has to turn its input into an [`AdminCommand`].
//! [`UpdateRuleRequest`] is the JSON body accepted by the conventional
//! administrative endpoint.
//!
//! No authorization is performed here. Whoever can reach this service can
//! change every quota; gate it at the edge.

use std::task::{Context, Poll};

use futures::future::{self, Ready};
use serde::{Deserialize, Serialize};
use tower::Service;
use tracing::info;

use crate::engine::AdmissionEngine;
use crate::error::ValidationError;
use crate::rule::Rule;

/// Lowest threshold accepted from the administrative endpoint.
pub const MIN_REQUEST_THRESHOLD: f64 = 1.0;

/// Errors surfaced by the administration service.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AdminError {
    /// The rule was rejected by the engine.
    #[error("invalid rule: {0}")]
    Validation(#[from] ValidationError),
    /// The request body could not be decoded.
    #[error("malformed request: {0}")]
    Malformed(String),
    /// The request decoded but violates endpoint constraints.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Administrative operations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AdminCommand {
    /// Insert or replace the rule of `resource`.
    UpdateRule {
        /// Resource identifier.
        resource: String,
        /// New threshold.
        threshold: f64,
    },
    /// Read the rule of `resource`.
    GetRule {
        /// Resource identifier.
        resource: String,
    },
    /// List all active rules.
    ListRules,
    /// Replace every rule.
    LoadRules {
        /// New rule set.
        rules: Vec<Rule>,
    },
}

impl AdminCommand {
    /// Stable label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            AdminCommand::UpdateRule { .. } => "update_rule",
            AdminCommand::GetRule { .. } => "get_rule",
            AdminCommand::ListRules => "list_rules",
            AdminCommand::LoadRules { .. } => "load_rules",
        }
    }
}

/// Successful result of an [`AdminCommand`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AdminResponse {
    /// Mutation applied.
    Ack,
    /// Rule lookup result.
    Rule(Option<Rule>),
    /// Active rules sorted by resource.
    Rules(Vec<Rule>),
}

/// JSON body of the rule-update endpoint: `{"resource": "...", "threshold": n}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateRuleRequest {
    /// Resource identifier, e.g. `POST:/orders`.
    pub resource: String,
    /// New threshold, at least [`MIN_REQUEST_THRESHOLD`].
    pub threshold: f64,
}

impl UpdateRuleRequest {
    /// Decode and validate a JSON body.
    pub fn from_json(body: &[u8]) -> Result<Self, AdminError> {
        let req: UpdateRuleRequest =
            serde_json::from_slice(body).map_err(|e| AdminError::Malformed(e.to_string()))?;
        req.validate()?;
        Ok(req)
    }

    /// Endpoint-level checks; the engine applies its own validation afterwards.
    pub fn validate(&self) -> Result<(), AdminError> {
        if self.resource.trim().is_empty() {
            return Err(AdminError::InvalidRequest("resource is required".into()));
        }
        if !self.threshold.is_finite() || self.threshold < MIN_REQUEST_THRESHOLD {
            return Err(AdminError::InvalidRequest(format!(
                "threshold must be >= {} (got {})",
                MIN_REQUEST_THRESHOLD, self.threshold
            )));
        }
        Ok(())
    }

    /// Turn the request into an update command.
    pub fn into_command(self) -> AdminCommand {
        AdminCommand::UpdateRule { resource: self.resource, threshold: self.threshold }
    }
}

/// Administration handle over an engine.
#[derive(Clone, Debug)]
pub struct RuleAdmin {
    engine: AdmissionEngine,
}

impl RuleAdmin {
    /// Administer `engine`.
    pub fn new(engine: AdmissionEngine) -> Self {
        Self { engine }
    }

    /// Insert or replace the rule of `resource` with `threshold`.
    pub fn update_rule(&self, resource: &str, threshold: f64) -> Result<(), ValidationError> {
        self.engine.update_rule(resource, threshold)
    }

    /// Run one command synchronously.
    pub fn execute(&self, cmd: AdminCommand) -> Result<AdminResponse, AdminError> {
        let label = cmd.label();
        let result = match cmd {
            AdminCommand::UpdateRule { resource, threshold } => {
                self.update_rule(&resource, threshold).map(|_| AdminResponse::Ack)
            }
            AdminCommand::GetRule { resource } => Ok(AdminResponse::Rule(self.engine.rule(&resource))),
            AdminCommand::ListRules => Ok(AdminResponse::Rules(self.engine.rules())),
            AdminCommand::LoadRules { rules } => {
                self.engine.load_rules(rules).map(|_| AdminResponse::Ack)
            }
        };
        match &result {
            Ok(_) => info!(target: "flowgate::admin", command = label, "admin command applied"),
            Err(e) => info!(target: "flowgate::admin", command = label, error = %e, "admin command rejected"),
        }
        result.map_err(AdminError::from)
    }
}

impl Service<AdminCommand> for RuleAdmin {
    type Response = AdminResponse;
    type Error = AdminError;
    type Future = Ready<Result<AdminResponse, AdminError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, cmd: AdminCommand) -> Self::Future {
        future::ready(self.execute(cmd))
    }
}

/// Raw JSON bodies in, responses out; convenient for HTTP handlers.
impl Service<Vec<u8>> for RuleAdmin {
    type Response = AdminResponse;
    type Error = AdminError;
    type Future = Ready<Result<AdminResponse, AdminError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, body: Vec<u8>) -> Self::Future {
        future::ready(UpdateRuleRequest::from_json(&body).and_then(|req| self.execute(req.into_command())))
    }
}
