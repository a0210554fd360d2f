//! The session-token header: `"<rangeId>:<token>[,<rangeId>:<token>...]"`.

use std::fmt::{self, Display};
use std::str::FromStr;

use tessera_types::RangeId;

use crate::error::{Result, SessionTokenError};
use crate::token::SessionToken;

/// A parsed session-token header.
///
/// Entries keep their wire order so that rendering a canonical header
/// reproduces it exactly.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionTokenHeader {
    entries: Vec<(RangeId, SessionToken)>,
}

impl SessionTokenHeader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Header carrying a single range token.
    pub fn single(range_id: RangeId, token: SessionToken) -> Self {
        Self {
            entries: vec![(range_id, token)],
        }
    }

    pub fn push(&mut self, range_id: RangeId, token: SessionToken) {
        self.entries.push((range_id, token));
    }

    pub fn entries(&self) -> &[(RangeId, SessionToken)] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<(RangeId, SessionToken)> {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Token carried for `range_id`, merging duplicates.
    pub fn token_for(&self, range_id: &RangeId) -> Option<SessionToken> {
        self.entries
            .iter()
            .filter(|(id, _)| id == range_id)
            .map(|(_, token)| token)
            .fold(None, |acc: Option<SessionToken>, token| {
                Some(match acc {
                    Some(acc) => acc.merge(token),
                    None => token.clone(),
                })
            })
    }
}

impl FromStr for SessionTokenHeader {
    type Err = SessionTokenError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(SessionTokenError::Empty);
        }
        let mut header = SessionTokenHeader::new();
        for segment in s.split(',') {
            let (range, token) = segment
                .split_once(':')
                .ok_or_else(|| SessionTokenError::InvalidSegment(segment.to_string()))?;
            let range_id =
                RangeId::parse(range).ok_or_else(|| SessionTokenError::InvalidRangeId(range.to_string()))?;
            header.push(range_id, token.parse()?);
        }
        Ok(header)
    }
}

impl Display for SessionTokenHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, (range_id, token)) in self.entries.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{range_id}:{token}")?;
        }
        Ok(())
    }
}

impl FromIterator<(RangeId, SessionToken)> for SessionTokenHeader {
    fn from_iter<I: IntoIterator<Item = (RangeId, SessionToken)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
