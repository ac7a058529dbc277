//! Per-object status computed during a build.

use serde::{Deserialize, Serialize};

use crate::model::ObjectRef;

/// Condition reported on a routing object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCondition {
    Valid,
    Invalid,
    Orphaned,
}

impl StatusCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCondition::Valid => "valid",
            StatusCondition::Invalid => "invalid",
            StatusCondition::Orphaned => "orphaned",
        }
    }
}

/// The status of one observed routing object after a build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub object: ObjectRef,
    pub condition: StatusCondition,
    pub description: String,
    /// The FQDN the object roots, when it is a root.
    pub vhost: Option<String>,
}

impl Status {
    pub fn valid(object: ObjectRef, vhost: Option<String>) -> Self {
        Self {
            object,
            condition: StatusCondition::Valid,
            description: "valid HTTPProxy".to_string(),
            vhost,
        }
    }

    pub fn invalid(object: ObjectRef, description: impl Into<String>, vhost: Option<String>) -> Self {
        Self { object, condition: StatusCondition::Invalid, description: description.into(), vhost }
    }

    pub fn orphaned(object: ObjectRef) -> Self {
        Self {
            object,
            condition: StatusCondition::Orphaned,
            description: "this HTTPProxy is not part of a delegation chain from a root HTTPProxy"
                .to_string(),
            vhost: None,
        }
    }
}
