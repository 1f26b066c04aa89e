//! Kepler pipeline quality flags.
//!
//! Each cadence carries a bitmask; a cadence is excluded from fitting when any
//! bit of the caller's exclusion mask is set.

pub const ATTITUDE_TWEAK: u32 = 1;
pub const SAFE_MODE: u32 = 2;
pub const COARSE_POINT: u32 = 4;
pub const EARTH_POINT: u32 = 8;
pub const ARGABRIGHTENING: u32 = 16;
pub const DESAT: u32 = 32;
pub const APERTURE_COSMIC: u32 = 64;
pub const MANUAL_EXCLUDE: u32 = 128;
pub const DISCONTINUITY: u32 = 256;
pub const IMPULSIVE_OUTLIER: u32 = 512;
pub const COLLATERAL_COSMIC: u32 = 1024;
pub const STRAYLIGHT: u32 = 2048;

/// Cadences flagged with any of these bits are unreliable enough that they
/// should never drive the systematic fit.
pub const DEFAULT_EXCLUDE_MASK: u32 =
    ATTITUDE_TWEAK | SAFE_MODE | COARSE_POINT | EARTH_POINT | DESAT | MANUAL_EXCLUDE;

/// `true` when `flags` has any bit of `mask` set.
pub fn is_excluded(flags: u32, mask: u32) -> bool {
    flags & mask != 0
}

/// Human-readable names for the bits set in `flags` (unknown bits are skipped).
pub fn describe(flags: u32) -> Vec<&'static str> {
    const NAMES: [(u32, &str); 12] = [
        (ATTITUDE_TWEAK, "attitude tweak"),
        (SAFE_MODE, "safe mode"),
        (COARSE_POINT, "coarse point"),
        (EARTH_POINT, "earth point"),
        (ARGABRIGHTENING, "argabrightening"),
        (DESAT, "desaturation"),
        (APERTURE_COSMIC, "aperture cosmic ray"),
        (MANUAL_EXCLUDE, "manual exclude"),
        (DISCONTINUITY, "discontinuity"),
        (IMPULSIVE_OUTLIER, "impulsive outlier"),
        (COLLATERAL_COSMIC, "collateral cosmic ray"),
        (STRAYLIGHT, "straylight"),
    ];
    NAMES
        .iter()
        .filter(|(bit, _)| flags & bit != 0)
        .map(|(_, name)| *name)
        .collect()
}
