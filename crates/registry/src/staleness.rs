use crate::config::RebuildPolicy;
use crate::Result;
use serde::Serialize;

/// Why a hive is being rebuilt instead of served from its archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildReason {
    Missing,
    Corrupt,
    FormatVersionChanged,
    ChecksumChanged,
    DependencyUpdated,
}

/// What the archive held for a hive when it was looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistedState<'a> {
    Missing,
    Corrupt,
    Present {
        format_version: u32,
        checksum: &'a str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildAssessment {
    pub required: bool,
    pub reasons: Vec<RebuildReason>,
}

impl RebuildAssessment {
    fn from_reasons(reasons: Vec<RebuildReason>) -> Self {
        Self {
            required: !reasons.is_empty(),
            reasons,
        }
    }
}

/// Decide whether a persisted hive must be rebuilt.
///
/// The format version is checked first and wins even under [`RebuildPolicy::Frozen`]: new code
/// cannot read an old shape. `current_checksum` is only evaluated when the policy allows
/// rebuilds and the format matched. An updated dependency always forces a rebuild.
pub fn assess_rebuild(
    persisted: PersistedState<'_>,
    format_version: u32,
    policy: RebuildPolicy,
    dependency_updated: bool,
    current_checksum: impl FnOnce() -> Result<String>,
) -> Result<RebuildAssessment> {
    let (stored_version, stored_checksum) = match persisted {
        PersistedState::Missing => {
            return Ok(RebuildAssessment::from_reasons(vec![RebuildReason::Missing]))
        }
        PersistedState::Corrupt => {
            return Ok(RebuildAssessment::from_reasons(vec![RebuildReason::Corrupt]))
        }
        PersistedState::Present {
            format_version,
            checksum,
        } => (format_version, checksum),
    };

    if stored_version != format_version {
        return Ok(RebuildAssessment::from_reasons(vec![
            RebuildReason::FormatVersionChanged,
        ]));
    }

    let mut reasons = Vec::new();
    if policy.allows_rebuild() && current_checksum()? != stored_checksum {
        reasons.push(RebuildReason::ChecksumChanged);
    }
    if dependency_updated {
        reasons.push(RebuildReason::DependencyUpdated);
    }
    Ok(RebuildAssessment::from_reasons(reasons))
}
