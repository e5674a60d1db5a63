//! Target resolution
//!
//! Picks one entity out of a target list by kind and id.
//!
//! Turrets match on their team id. Globes carry no identifier in the current
//! feed schema, so the requested id is read as a bearing and compared to the
//! globe's theta with exact float equality. That only works when the client
//! echoes back the exact theta it was given; globes that do carry a stable
//! `id` are matched on it instead.

use crate::TargetEntity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("Target not found: {kind} {id}")]
    TargetNotFound { kind: TargetKind, id: String },
    #[error("Invalid target: {0}")]
    InvalidInput(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Globe,
    Turret,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Globe => write!(f, "globe"),
            Self::Turret => write!(f, "turret"),
        }
    }
}

impl FromStr for TargetKind {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "globe" => Ok(Self::Globe),
            "turret" => Ok(Self::Turret),
            other => Err(ResolveError::InvalidInput(format!(
                "unknown target_type '{}', expected 'globe' or 'turret'",
                other
            ))),
        }
    }
}

/// Return the first target of `kind` identified by `id`.
pub fn resolve(targets: &[TargetEntity], kind: TargetKind, id: &str) -> Result<TargetEntity, ResolveError> {
    let found = match kind {
        TargetKind::Turret => targets
            .iter()
            .find(|t| t.kind == TargetKind::Turret && t.id.as_deref() == Some(id)),
        TargetKind::Globe => {
            let bearing = id.trim().parse::<f64>().ok();
            let found = targets.iter().find(|t| {
                t.kind == TargetKind::Globe
                    && (t.id.as_deref() == Some(id) || bearing.is_some_and(|b| t.theta == b))
            });
            if let Some(globe) = found {
                if globe.id.as_deref() != Some(id) {
                    warn!("Globe {} matched by exact theta; feed carries no globe ids", id);
                }
            }
            found
        }
    };

    found.cloned().ok_or_else(|| ResolveError::TargetNotFound {
        kind,
        id: id.to_string(),
    })
}
