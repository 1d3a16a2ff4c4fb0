//! Consumer roles and the masks feeders use to target them

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Role of a process reading frames from the shared region.
///
/// Each kind occupies its own bit so a [`ConsumerPattern`] can select any
/// combination of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsumerKind {
    SteamVr,
    OpenXr,
    OculusD3D11,
    OculusD3D12,
    NonVrD3D11,
    Viewer,
}

impl ConsumerKind {
    pub const ALL: [ConsumerKind; 6] = [
        ConsumerKind::SteamVr,
        ConsumerKind::OpenXr,
        ConsumerKind::OculusD3D11,
        ConsumerKind::OculusD3D12,
        ConsumerKind::NonVrD3D11,
        ConsumerKind::Viewer,
    ];

    pub const fn bits(self) -> u32 {
        match self {
            ConsumerKind::SteamVr => 1 << 0,
            ConsumerKind::OpenXr => 1 << 1,
            ConsumerKind::OculusD3D11 => 1 << 2,
            ConsumerKind::OculusD3D12 => 1 << 3,
            ConsumerKind::NonVrD3D11 => 1 << 4,
            ConsumerKind::Viewer => 1 << 5,
        }
    }

    pub fn is_vr(self) -> bool {
        !matches!(self, ConsumerKind::NonVrD3D11 | ConsumerKind::Viewer)
    }
}

/// Set of consumer kinds, stored in the shared record as a raw `u32`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsumerPattern(pub u32);

impl ConsumerPattern {
    /// Matches every kind, including kinds added after this build.
    pub const ANY: ConsumerPattern = ConsumerPattern(u32::MAX);
    pub const NONE: ConsumerPattern = ConsumerPattern(0);
    pub const VR: ConsumerPattern = ConsumerPattern(
        ConsumerKind::SteamVr.bits()
            | ConsumerKind::OpenXr.bits()
            | ConsumerKind::OculusD3D11.bits()
            | ConsumerKind::OculusD3D12.bits(),
    );

    pub fn matches(self, kind: ConsumerKind) -> bool {
        self.0 & kind.bits() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn with(self, kind: ConsumerKind) -> Self {
        ConsumerPattern(self.0 | kind.bits())
    }
}

impl From<ConsumerKind> for ConsumerPattern {
    fn from(kind: ConsumerKind) -> Self {
        ConsumerPattern(kind.bits())
    }
}

impl FromIterator<ConsumerKind> for ConsumerPattern {
    fn from_iter<I: IntoIterator<Item = ConsumerKind>>(iter: I) -> Self {
        iter.into_iter().fold(ConsumerPattern::NONE, ConsumerPattern::with)
    }
}

impl Default for ConsumerPattern {
    fn default() -> Self {
        ConsumerPattern::ANY
    }
}
