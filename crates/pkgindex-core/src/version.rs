//! Version-sortable key encoding.
//!
//! The search engine sorts string fields byte-wise, so every indexed release
//! carries a `version_sortable` string computed once at write time. The
//! string has a one-digit release channel followed by five ten-digit
//! segments, wide enough for any `u32` so date-style versions such as
//! `20240101` keep their order:
//!
//! ```text
//!   channel . major      . minor      . bugfix     . class      . number
//!      1    . 0000000002 . 0000000005 . 0000000003 . 0000000004 . 0000000000   <- 2.5.3
//!      0    . 0000000003 . 0000000000 . 0000000000 . 0000000001 . 0000000002   <- 3.0.0a2
//! ```
//!
//! The channel is `1` for stable releases and `0` for prereleases, so any
//! stable release outranks any prerelease. Within a channel the segments
//! order by `(major, minor, bugfix, class, number)` with the class ladder
//! `dev < alpha < beta < rc < stable`. npm channel tags `canary`, `next`
//! and `preview` rank as `rc`; unrecognized tokens such as `post` are stable.
//!
//! [`encode`] is total: strings that do not look like a version get the
//! all-zero key and sort to the bottom.

use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Key returned for unparseable input.
pub const MIN_SORTABLE: &str = "0.0000000000.0000000000.0000000000.0000000000.0000000000";

/// Prerelease ladder. The discriminant is the ordinal written into the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrereleaseClass {
    Dev = 0,
    Alpha = 1,
    Beta = 2,
    Rc = 3,
    Stable = 4,
}

impl PrereleaseClass {
    /// Classify a prerelease token by its leading letters.
    pub fn from_token(token: &str) -> Self {
        let lower = token.to_ascii_lowercase();
        if lower.starts_with("dev") {
            PrereleaseClass::Dev
        } else if lower == "a" || lower.starts_with("alpha") {
            PrereleaseClass::Alpha
        } else if lower == "b" || lower.starts_with("beta") {
            PrereleaseClass::Beta
        } else if lower.starts_with('c')
            || lower == "rc"
            || lower.starts_with("pre")
            || lower == "next"
        {
            PrereleaseClass::Rc
        } else {
            PrereleaseClass::Stable
        }
    }

    pub fn ordinal(self) -> u32 {
        self as u32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PrereleaseClass::Dev => "dev",
            PrereleaseClass::Alpha => "alpha",
            PrereleaseClass::Beta => "beta",
            PrereleaseClass::Rc => "rc",
            PrereleaseClass::Stable => "stable",
        }
    }
}

/// Parsed, comparable form of a version string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionKey {
    pub major: u32,
    pub minor: u32,
    pub bugfix: u32,
    pub class: PrereleaseClass,
    pub number: u32,
}

impl VersionKey {
    /// The all-zero key used for malformed input.
    pub const MIN: VersionKey = VersionKey {
        major: 0,
        minor: 0,
        bugfix: 0,
        class: PrereleaseClass::Dev,
        number: 0,
    };

    pub fn is_stable(&self) -> bool {
        self.class == PrereleaseClass::Stable
    }

    fn channel(&self) -> u32 {
        if self.is_stable() {
            1
        } else {
            0
        }
    }

    /// Fixed-width rendering. Byte order of two sortable strings equals
    /// the [`Ord`] order of their keys.
    pub fn sortable(&self) -> String {
        if *self == VersionKey::MIN {
            return MIN_SORTABLE.to_string();
        }
        format!(
            "{}.{:010}.{:010}.{:010}.{:010}.{:010}",
            self.channel(),
            self.major,
            self.minor,
            self.bugfix,
            self.class.ordinal(),
            self.number,
        )
    }

    fn tuple(&self) -> (u32, u32, u32, u32, PrereleaseClass, u32) {
        (
            self.channel(),
            self.major,
            self.minor,
            self.bugfix,
            self.class,
            self.number,
        )
    }
}

impl Ord for VersionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        if self == other {
            return Ordering::Equal;
        }
        match (*self == VersionKey::MIN, *other == VersionKey::MIN) {
            (true, _) => Ordering::Less,
            (_, true) => Ordering::Greater,
            _ => self.tuple().cmp(&other.tuple()),
        }
    }
}

impl PartialOrd for VersionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sortable())
    }
}

/// Result of [`encode`]: the key, its sortable rendering and the raw
/// prerelease token (empty for stable releases).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedVersion {
    pub key: VersionKey,
    pub sortable: String,
    pub postfix: String,
}

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*[vV]?(?P<major>\d+)(?:\.(?P<minor>\d+))?(?:\.(?P<bugfix>\d+))?(?:[.\-_+]?(?P<pre>[A-Za-z]+)[.\-_]?(?P<prenum>\d*))?",
        )
        .expect("version pattern is valid")
    })
}

/// Numeric capture; values past `u32::MAX` saturate.
fn segment(caps: &regex::Captures<'_>, name: &str) -> u32 {
    let Some(digits) = caps.name(name).map(|m| m.as_str().trim_start_matches('0')) else {
        return 0;
    };
    if digits.is_empty() {
        return 0;
    }
    if digits.len() > 10 {
        return u32::MAX;
    }
    digits
        .parse::<u64>()
        .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

/// Encode a raw version string. Never fails.
pub fn encode(raw: &str) -> EncodedVersion {
    let Some(caps) = version_regex().captures(raw) else {
        return EncodedVersion {
            key: VersionKey::MIN,
            sortable: MIN_SORTABLE.to_string(),
            postfix: String::new(),
        };
    };

    let token = caps.name("pre").map(|m| m.as_str()).unwrap_or("");
    let class = if token.is_empty() {
        PrereleaseClass::Stable
    } else {
        PrereleaseClass::from_token(token)
    };
    let number = if class == PrereleaseClass::Stable {
        0
    } else {
        segment(&caps, "prenum")
    };
    let postfix = if class == PrereleaseClass::Stable {
        String::new()
    } else {
        format!(
            "{}{}",
            token,
            caps.name("prenum").map(|m| m.as_str()).unwrap_or("")
        )
    };

    let key = VersionKey {
        major: segment(&caps, "major"),
        minor: segment(&caps, "minor"),
        bugfix: segment(&caps, "bugfix"),
        class,
        number,
    };
    EncodedVersion {
        sortable: key.sortable(),
        key,
        postfix,
    }
}

/// Shorthand for `encode(raw).sortable`.
pub fn sortable(raw: &str) -> String {
    encode(raw).sortable
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_older(older: &str, newer: &str) {
        let a = encode(older);
        let b = encode(newer);
        assert!(
            a.sortable < b.sortable,
            "{older} ({}) should sort below {newer} ({})",
            a.sortable,
            b.sortable
        );
        assert!(a.key < b.key);
    }

    #[test]
    fn stable_release_layout() {
        let e = encode("2.5.3");
        assert_eq!(e.key.class, PrereleaseClass::Stable);
        assert_eq!(e.sortable, "1.0000000002.0000000005.0000000003.0000000004.0000000000");
        assert!(e.postfix.is_empty());
    }

    #[test]
    fn prerelease_of_newer_major_sorts_below_stable() {
        assert_older("3.0.0a2", "2.5.3");
    }

    #[test]
    fn prerelease_ladder() {
        let chain = ["1.0.0.dev1", "1.0.0a1", "1.0.0a2", "1.0.0b1", "1.0.0rc1", "1.0.0rc2"];
        for pair in chain.windows(2) {
            assert_older(pair[0], pair[1]);
        }
        assert_older("1.0.0rc2", "1.0.0");
    }

    #[test]
    fn zero_padding_orders_magnitudes() {
        assert_older("9.0", "10.0");
        assert_older("1.9.0", "1.10.0");
        assert_older("1.0.9", "1.0.10");
    }

    #[test]
    fn missing_segments_default_to_zero() {
        let three_one = "1.0000000003.0000000001.0000000000.0000000004.0000000000";
        assert_eq!(encode("3").sortable, "1.0000000003.0000000000.0000000000.0000000004.0000000000");
        assert_eq!(encode("3.1").sortable, three_one);
        assert_eq!(encode("v3.1").sortable, three_one);
    }

    #[test]
    fn only_first_prerelease_token_counts() {
        let e = encode("1.0.0a1.dev3");
        assert_eq!(e.key.class, PrereleaseClass::Alpha);
        assert_eq!(e.key.number, 1);
        assert_eq!(e.postfix, "a1");
    }

    #[test]
    fn npm_style_prerelease() {
        let e = encode("2.0.0-beta.3");
        assert_eq!(e.key.class, PrereleaseClass::Beta);
        assert_eq!(e.key.number, 3);
        assert_older("2.0.0-beta.3", "2.0.0-rc.1");
    }

    #[test]
    fn post_release_is_stable() {
        let e = encode("1.2.3.post1");
        assert!(e.key.is_stable());
        assert_eq!(e.sortable, encode("1.2.3").sortable);
    }

    #[test]
    fn unparseable_falls_back_to_minimum() {
        for raw in ["", "garbage", "latest", "..."] {
            let e = encode(raw);
            assert_eq!(e.key, VersionKey::MIN);
            assert_eq!(e.sortable, MIN_SORTABLE);
        }
        assert_older("garbage", "0.0.1.dev0");
    }

    #[test]
    fn fixed_shape() {
        for raw in [
            "1",
            "12.34.56",
            "0.1a",
            "2024.10.1rc12",
            "junk",
            "99999.1.1",
            "20240101",
            "99999999999999999999.1",
        ] {
            let s = encode(raw).sortable;
            let parts: Vec<&str> = s.split('.').collect();
            assert_eq!(parts.len(), 6, "{raw} -> {s}");
            assert_eq!(parts[0].len(), 1);
            assert!(parts[1..].iter().all(|p| p.len() == 10), "{raw} -> {s}");
        }
    }

    #[test]
    fn large_and_date_style_numbers_keep_their_order() {
        assert_older("20230101", "20240101");
        assert_older("9999", "10000");
        assert_older("1.0.0a9999", "1.0.0a10000");
        assert_older("2023.12.31", "2024.1.1");
        assert_eq!(encode("4294967295").key.major, u32::MAX);
        assert_eq!(encode("99999999999999999999").key.major, u32::MAX);
    }

    #[test]
    fn npm_channel_tags_rank_below_the_release() {
        assert_eq!(encode("19.0.0-canary.1").key.class, PrereleaseClass::Rc);
        assert_eq!(encode("15.0.0-next.3").key.class, PrereleaseClass::Rc);
        assert_older("19.0.0-canary.1", "19.0.0");
        assert_older("15.0.0-next.3", "15.0.0");
        assert!(encode("1.2.3.post1").key.is_stable());
    }
}
