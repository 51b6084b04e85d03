//! Route model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use beacon_common::{Error, OrgId, Result};
use beacon_expr::Expression;

/// A stored notification route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    pub org_id: OrgId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub expression: String,
    pub channels: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Grouping labels handed to the grouping engine for alerts this route sends
    #[serde(default)]
    pub group_by: Vec<String>,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Client-supplied fields for create and update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub expression: String,
    pub channels: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub group_by: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl RouteDraft {
    /// Check the draft and compile its expression
    pub fn validate(&self) -> Result<Expression> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_input("route name is required"));
        }
        if self.channels.is_empty() {
            return Err(Error::invalid_input("route needs at least one channel"));
        }
        if self.channels.iter().any(|c| c.trim().is_empty()) {
            return Err(Error::invalid_input("channel names must not be empty"));
        }
        if self.expression.trim().is_empty() {
            return Err(Error::invalid_input("route expression is required"));
        }
        Expression::compile(&self.expression).map_err(|e| {
            Error::invalid_input(format!("invalid route expression: {}", e))
        })
    }

    /// A new route owned by `org_id`
    pub fn into_route(self, org_id: &str, user: &str) -> Route {
        let now = Utc::now();
        Route {
            id: uuid::Uuid::new_v4().to_string(),
            org_id: org_id.to_string(),
            name: self.name,
            description: self.description,
            expression: self.expression,
            channels: self.channels,
            priority: self.priority,
            enabled: self.enabled,
            tags: self.tags,
            group_by: self.group_by,
            created_by: user.to_string(),
            updated_by: user.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl Route {
    /// Replace the client fields, keeping identity and creation metadata
    pub fn apply(&mut self, draft: RouteDraft, user: &str) {
        self.name = draft.name;
        self.description = draft.description;
        self.expression = draft.expression;
        self.channels = draft.channels;
        self.priority = draft.priority;
        self.enabled = draft.enabled;
        self.tags = draft.tags;
        self.group_by = draft.group_by;
        self.updated_by = user.to_string();
        self.updated_at = Utc::now();
    }
}
