//! Session token values and their merge rule.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tessera_types::{Lsn, RegionId};

use crate::error::{Result, SessionTokenError};

/// Replication watermark observed for one partition range.
///
/// Two shapes exist on the wire:
///
/// - **Simple**: a bare LSN, `"<lsn>"`.
/// - **Vector**: `"<version>#<globalLsn>[#<regionId>=<lsn>...]"`, carrying a
///   per-region LSN for multi-region accounts. `version` changes whenever the
///   set of regions does.
///
/// [`SessionToken::merge`] takes the componentwise maximum. It is commutative,
/// associative and idempotent, and the result always covers both inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionToken {
    Simple(Lsn),
    Vector(VectorToken),
}

/// The vector form of a session token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VectorToken {
    pub version: u64,
    pub global_lsn: Lsn,
    pub regions: BTreeMap<RegionId, Lsn>,
}

impl VectorToken {
    pub fn new(version: u64, global_lsn: Lsn) -> Self {
        Self {
            version,
            global_lsn,
            regions: BTreeMap::new(),
        }
    }

    pub fn with_region(mut self, region: RegionId, lsn: Lsn) -> Self {
        self.regions.insert(region, lsn);
        self
    }

    fn merge(&self, other: &VectorToken) -> VectorToken {
        // Regions of the highest version define the shape; every LSN is the
        // max over all inputs that carry that region.
        let (shape, rest) = if self.version >= other.version {
            (self, other)
        } else {
            (other, self)
        };
        let mut regions = shape.regions.clone();
        for (region, lsn) in &rest.regions {
            if let Some(current) = regions.get_mut(region) {
                *current = (*current).max(*lsn);
            } else if rest.version == shape.version {
                regions.insert(*region, *lsn);
            }
        }
        VectorToken {
            version: shape.version,
            global_lsn: self.global_lsn.max(other.global_lsn),
            regions,
        }
    }
}

impl SessionToken {
    pub fn simple(lsn: u64) -> Self {
        Self::Simple(Lsn::new(lsn))
    }

    /// The partition-wide LSN the token guarantees.
    pub fn lsn(&self) -> Lsn {
        match self {
            SessionToken::Simple(lsn) => *lsn,
            SessionToken::Vector(v) => v.global_lsn,
        }
    }

    /// Componentwise maximum of `self` and `other`.
    ///
    /// A vector token absorbs a simple one into its global LSN.
    pub fn merge(&self, other: &SessionToken) -> SessionToken {
        match (self, other) {
            (SessionToken::Simple(a), SessionToken::Simple(b)) => SessionToken::Simple((*a).max(*b)),
            (SessionToken::Vector(a), SessionToken::Vector(b)) => SessionToken::Vector(a.merge(b)),
            (SessionToken::Vector(v), SessionToken::Simple(lsn))
            | (SessionToken::Simple(lsn), SessionToken::Vector(v)) => {
                let mut merged = v.clone();
                merged.global_lsn = merged.global_lsn.max(*lsn);
                SessionToken::Vector(merged)
            }
        }
    }

    /// Returns true when merging `other` into `self` would change nothing.
    pub fn covers(&self, other: &SessionToken) -> bool {
        self.merge(other) == *self
    }

    /// Returns true when `self` carries progress that `baseline` lacks.
    pub fn is_newer_than(&self, baseline: &SessionToken) -> bool {
        !baseline.covers(self)
    }
}

fn parse_u64(field: &'static str, text: &str, token: &str) -> Result<u64> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SessionTokenError::InvalidNumber {
            field,
            token: token.to_string(),
        });
    }
    text.parse().map_err(|_| SessionTokenError::InvalidNumber {
        field,
        token: token.to_string(),
    })
}

impl FromStr for SessionToken {
    type Err = SessionTokenError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(SessionTokenError::Empty);
        }
        if !s.contains('#') {
            return Ok(SessionToken::Simple(Lsn::new(parse_u64("lsn", s, s)?)));
        }

        let mut parts = s.split('#');
        let version = parse_u64("version", parts.next().unwrap_or_default(), s)?;
        let global_lsn = parse_u64("global lsn", parts.next().unwrap_or_default(), s)?;
        let mut token = VectorToken::new(version, Lsn::new(global_lsn));

        for entry in parts {
            let (region, lsn) =
                entry
                    .split_once('=')
                    .ok_or_else(|| SessionTokenError::InvalidRegionEntry {
                        entry: entry.to_string(),
                        token: s.to_string(),
                    })?;
            let region = u32::try_from(parse_u64("region id", region, s)?).map_err(|_| {
                SessionTokenError::InvalidRegionEntry {
                    entry: entry.to_string(),
                    token: s.to_string(),
                }
            })?;
            let lsn = parse_u64("region lsn", lsn, s)?;
            if token
                .regions
                .insert(RegionId::new(region), Lsn::new(lsn))
                .is_some()
            {
                return Err(SessionTokenError::DuplicateRegion {
                    region,
                    token: s.to_string(),
                });
            }
        }

        Ok(SessionToken::Vector(token))
    }
}

impl Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionToken::Simple(lsn) => write!(f, "{lsn}"),
            SessionToken::Vector(v) => {
                write!(f, "{}#{}", v.version, v.global_lsn)?;
                for (region, lsn) in &v.regions {
                    write!(f, "#{region}={lsn}")?;
                }
                Ok(())
            }
        }
    }
}
