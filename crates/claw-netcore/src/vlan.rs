//! VLAN assignment for provider networks (spec §4.2).

use rand::rngs::OsRng;
use rand::Rng;

const MIN_VLAN: u16 = 1;
const MAX_VLAN: u16 = 4096;

/// Collaborator contract for picking a VLAN id for a brand-new provider
/// network. A pure function in spirit — no state, no persistence.
///
/// Collisions across concurrently-created provider networks are
/// possible and accepted: the 12-bit space matches 802.1Q and callers
/// may retry on detected collision (not modelled here; see spec §4.2).
pub trait VlanPicker: Send + Sync {
    /// Returns a VLAN id uniformly distributed over `1..=4096`.
    fn pick(&self) -> u16;
}

/// Default [`VlanPicker`] backed by a cryptographically secure RNG.
///
/// Non-crypto RNGs are non-conforming per spec §4.2; this type sources
/// randomness from [`OsRng`] on every call rather than seeding a
/// pseudo-random generator once, so there is no seed material to leak
/// or reuse across processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CryptoVlanPicker;

impl VlanPicker for CryptoVlanPicker {
    fn pick(&self) -> u16 {
        OsRng.gen_range(MIN_VLAN..=MAX_VLAN)
    }
}
