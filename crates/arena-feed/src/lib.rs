//! Arena Feed
//!
//! Reads the externally hosted arena snapshot: every turret and globe
//! position in the shared polar frame.
//!
//! ```text
//! {
//!   "turrets": { "<team id>": { "r": 300.0, "theta": 2.58 }, ... },
//!   "globes":  [ { "r": 300.0, "theta": 3.98, "z": 200.7 }, ... ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use targeting::PolarPoint;
use thiserror::Error;

pub mod client;
pub mod resolver;

pub use client::{FeedClient, FeedConfig};
pub use resolver::{resolve, ResolveError, TargetKind};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedError {
    #[error("feed unreachable: {0}")]
    Unreachable(String),
    #[error("malformed feed: {0}")]
    Malformed(String),
    #[error("feed field missing: {0}")]
    FieldMissing(String),
    #[error("team id not found: {0}")]
    TurretNotFound(String),
}

pub type Result<T> = std::result::Result<T, FeedError>;

/// Position of one turret, as reported by the feed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TurretPosition {
    pub r: f64,
    pub theta: f64,
}

impl TurretPosition {
    pub fn polar(&self) -> PolarPoint {
        PolarPoint::new(self.r, self.theta)
    }
}

/// A target candidate: a globe or another turret
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetEntity {
    #[serde(rename = "type")]
    pub kind: TargetKind,
    pub r: f64,
    pub theta: f64,
    pub z: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl TargetEntity {
    pub fn polar(&self) -> PolarPoint {
        PolarPoint::new(self.r, self.theta).with_z(self.z)
    }
}

/// One parsed arena snapshot. Turrets keep the feed's key order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArenaSnapshot {
    turrets: Vec<(String, TurretPosition)>,
    globes: Vec<TargetEntity>,
}

#[derive(Debug, Deserialize)]
struct RawSnapshot {
    turrets: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    globes: Option<Vec<RawGlobe>>,
}

#[derive(Debug, Deserialize)]
struct RawTurret {
    r: Option<f64>,
    theta: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawGlobe {
    r: Option<f64>,
    theta: Option<f64>,
    z: Option<f64>,
    id: Option<serde_json::Value>,
}

fn required(value: Option<f64>, field: impl FnOnce() -> String) -> Result<f64> {
    match value {
        Some(v) if v.is_finite() => Ok(v),
        Some(_) => Err(FeedError::Malformed(format!("{} is not finite", field()))),
        None => Err(FeedError::FieldMissing(field())),
    }
}

fn id_string(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl ArenaSnapshot {
    /// Parse a feed body
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        let raw: RawSnapshot =
            serde_json::from_slice(body).map_err(|e| FeedError::Malformed(e.to_string()))?;

        let raw_turrets = raw
            .turrets
            .ok_or_else(|| FeedError::FieldMissing("turrets".to_string()))?;

        let mut turrets = Vec::with_capacity(raw_turrets.len());
        for (id, value) in raw_turrets {
            let turret: RawTurret = serde_json::from_value(value)
                .map_err(|e| FeedError::Malformed(format!("turrets.{}: {}", id, e)))?;
            let r = required(turret.r, || format!("turrets.{}.r", id))?;
            let theta = required(turret.theta, || format!("turrets.{}.theta", id))?;
            turrets.push((id, TurretPosition { r, theta }));
        }

        let mut globes = Vec::new();
        for (i, globe) in raw.globes.unwrap_or_default().into_iter().enumerate() {
            let r = required(globe.r, || format!("globes[{}].r", i))?;
            let theta = required(globe.theta, || format!("globes[{}].theta", i))?;
            let z = match globe.z {
                Some(z) => required(Some(z), || format!("globes[{}].z", i))?,
                None => 0.0,
            };
            globes.push(TargetEntity {
                kind: TargetKind::Globe,
                r,
                theta,
                z,
                id: globe.id.and_then(id_string),
            });
        }

        Ok(Self { turrets, globes })
    }

    /// Position of the turret registered under `id`
    pub fn turret(&self, id: &str) -> Result<TurretPosition> {
        self.turrets
            .iter()
            .find(|(tid, _)| tid == id)
            .map(|(_, pos)| *pos)
            .ok_or_else(|| FeedError::TurretNotFound(id.to_string()))
    }

    /// All target candidates: globes first, then turrets in feed order.
    pub fn targets(&self) -> Vec<TargetEntity> {
        let turrets = self.turrets.iter().map(|(id, pos)| TargetEntity {
            kind: TargetKind::Turret,
            r: pos.r,
            theta: pos.theta,
            z: 0.0,
            id: Some(id.clone()),
        });
        self.globes.iter().cloned().chain(turrets).collect()
    }

    /// Target candidates without the caller's own turret
    pub fn targets_excluding(&self, own_id: &str) -> Vec<TargetEntity> {
        self.targets()
            .into_iter()
            .filter(|t| !(t.kind == TargetKind::Turret && t.id.as_deref() == Some(own_id)))
            .collect()
    }

    pub fn turret_count(&self) -> usize {
        self.turrets.len()
    }

    pub fn globe_count(&self) -> usize {
        self.globes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = include_str!("../../../fixtures/positions.json");

    #[test]
    fn test_parse_bundled_fixture() {
        let snapshot = ArenaSnapshot::from_slice(FIXTURE.as_bytes()).unwrap();
        assert_eq!(snapshot.turret_count(), 7);
        assert_eq!(snapshot.globe_count(), 4);

        let five = snapshot.turret("5").unwrap();
        assert_eq!(five, TurretPosition { r: 300.0, theta: 0.0 });
    }

    #[test]
    fn test_targets_globes_first_then_turrets_in_feed_order() {
        let body = br#"{
            "turrets": {"9": {"r": 1.0, "theta": 0.1}, "2": {"r": 2.0, "theta": 0.2}},
            "globes": [{"r": 3.0, "theta": 0.3, "z": 4.0}, {"r": 5.0, "theta": 0.5}]
        }"#;
        let targets = ArenaSnapshot::from_slice(body).unwrap().targets();

        let kinds: Vec<TargetKind> = targets.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![TargetKind::Globe, TargetKind::Globe, TargetKind::Turret, TargetKind::Turret]
        );
        assert_eq!(targets[0].z, 4.0);
        assert_eq!(targets[1].z, 0.0);
        assert_eq!(targets[2].id.as_deref(), Some("9"));
        assert_eq!(targets[3].id.as_deref(), Some("2"));
    }

    #[test]
    fn test_targets_excluding_own_turret() {
        let body = br#"{"turrets": {"1": {"r": 1.0, "theta": 0.0}, "2": {"r": 1.0, "theta": 1.0}}}"#;
        let snapshot = ArenaSnapshot::from_slice(body).unwrap();
        let targets = snapshot.targets_excluding("1");

        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id.as_deref(), Some("2"));
    }

    #[test]
    fn test_missing_turrets_key() {
        let err = ArenaSnapshot::from_slice(br#"{"globes": []}"#).unwrap_err();
        assert_eq!(err, FeedError::FieldMissing("turrets".to_string()));
    }

    #[test]
    fn test_missing_turret_field() {
        let err = ArenaSnapshot::from_slice(br#"{"turrets": {"1": {"r": 1.0}}}"#).unwrap_err();
        assert_eq!(err, FeedError::FieldMissing("turrets.1.theta".to_string()));
    }

    #[test]
    fn test_non_numeric_field_is_malformed() {
        let err =
            ArenaSnapshot::from_slice(br#"{"turrets": {"1": {"r": "far", "theta": 0}}}"#).unwrap_err();
        assert!(matches!(err, FeedError::Malformed(_)));

        let err = ArenaSnapshot::from_slice(b"<html>").unwrap_err();
        assert!(matches!(err, FeedError::Malformed(_)));
    }

    #[test]
    fn test_unknown_turret() {
        let snapshot = ArenaSnapshot::from_slice(FIXTURE.as_bytes()).unwrap();
        assert_eq!(
            snapshot.turret("42").unwrap_err(),
            FeedError::TurretNotFound("42".to_string())
        );
    }

    #[test]
    fn test_target_serializes_like_feed() {
        let body = br#"{"turrets": {"3": {"r": 1.0, "theta": 2.0}}, "globes": [{"r": 1.0, "theta": 0.5}]}"#;
        let targets = ArenaSnapshot::from_slice(body).unwrap().targets();
        let json = serde_json::to_value(&targets).unwrap();

        assert_eq!(json[0]["type"], "globe");
        assert!(json[0].get("id").is_none());
        assert_eq!(json[1]["type"], "turret");
        assert_eq!(json[1]["id"], "3");
    }
}
