//! Result filtering and sort key, per spec §4.12.

use streamrelay_core::models::{resolution_rank, normalize_title, ContentRef, Stream};

/// The criteria a caller narrows a search by. Empty collections mean "no
/// constraint" on that axis.
#[derive(Debug, Clone, Default)]
pub struct RankerFilters {
    pub languages: Vec<String>,
    pub resolutions: Vec<String>,
    pub min_bytes: u64,
    pub max_bytes: u64,
}

impl RankerFilters {
    fn size_ok(&self, size_bytes: Option<u64>) -> bool {
        let Some(size) = size_bytes else {
            return true;
        };
        if self.min_bytes > 0 && size < self.min_bytes {
            return false;
        }
        if self.max_bytes > 0 && size > self.max_bytes {
            return false;
        }
        true
    }

    fn resolution_ok(&self, resolution: Option<&str>) -> bool {
        if self.resolutions.is_empty() {
            return true;
        }
        let Some(resolution) = resolution else {
            return false;
        };
        self.resolutions.iter().any(|r| r.eq_ignore_ascii_case(resolution))
    }

    fn language_ok(&self, languages: &[String]) -> bool {
        if self.languages.is_empty() {
            return true;
        }
        languages
            .iter()
            .any(|lang| self.languages.iter().any(|want| want.eq_ignore_ascii_case(lang)))
    }
}

/// Year filter for movies: keep when absent on either side, or within ±1.
#[must_use]
pub fn year_matches(requested: Option<u32>, found: Option<u32>) -> bool {
    match (requested, found) {
        (Some(requested), Some(found)) => requested.abs_diff(found) <= 1,
        _ => true,
    }
}

/// Requires at least half (rounded up) of the canonical title's words to
/// appear as substrings of the normalized candidate title.
#[must_use]
pub fn title_matches(canonical_title: &str, candidate_title: &str) -> bool {
    let canonical = normalize_title(canonical_title);
    let candidate = normalize_title(candidate_title);
    let words: Vec<&str> = canonical.split_whitespace().collect();
    if words.is_empty() {
        return true;
    }
    let required = words.len().div_ceil(2);
    let hits = words.iter().filter(|w| candidate.contains(*w)).count();
    hits >= required
}

/// Episode filter: requires the parsed `(season, episode)` to match exactly,
/// or the title to match a season/episode pattern built from the request.
/// A result that cannot be pinned to an episode is always rejected — season
/// packs never satisfy a specific-episode request.
#[must_use]
pub fn episode_matches(
    requested: (u32, u32),
    parsed: Option<(u32, u32)>,
    candidate_title: &str,
) -> bool {
    if let Some(parsed) = parsed {
        return parsed == requested;
    }
    let (season, episode) = requested;
    let patterns = [
        format!("s{season:02}e{episode:02}"),
        format!("{season}x{episode:02}"),
        format!("episode {episode}"),
    ];
    let normalized = candidate_title.to_lowercase();
    patterns.iter().any(|p| normalized.contains(p))
}

/// Applies every filter applicable to a stream's shape and content type.
#[must_use]
pub fn filter_stream(stream: &Stream, content_ref: &ContentRef, filters: &RankerFilters) -> bool {
    if !filters.size_ok(stream.size_bytes) {
        return false;
    }
    if !filters.resolution_ok(stream.resolution.as_deref()) {
        return false;
    }
    match content_ref {
        ContentRef::Movie { meta, .. } => {
            if !year_matches(meta.release_year, None) {
                return false;
            }
            if let Some(title) = &meta.canonical_title {
                if !title_matches(title, &stream.title) {
                    return false;
                }
            }
        }
        ContentRef::Episode { season, episode, .. } => {
            if !episode_matches((*season, *episode), None, &stream.title) {
                return false;
            }
        }
    }
    true
}

/// `(isPersonal desc, resolutionRank desc, sizeBytes desc)` — stable.
pub fn sort_streams(streams: &mut [Stream]) {
    streams.sort_by(|a, b| {
        b.is_personal
            .cmp(&a.is_personal)
            .then_with(|| resolution_rank(b.resolution.as_deref()).cmp(&resolution_rank(a.resolution.as_deref())))
            .then_with(|| b.size_bytes.unwrap_or(0).cmp(&a.size_bytes.unwrap_or(0)))
    });
}

/// Drops any non-personal item sharing a hash with a personal item, per the
/// personal-file shadowing invariant (§8).
#[must_use]
pub fn shadow_personal_duplicates(mut streams: Vec<Stream>) -> Vec<Stream> {
    use std::collections::HashSet;

    let personal_hashes: HashSet<String> = streams
        .iter()
        .filter(|s| s.is_personal)
        .filter_map(|s| s.hash.clone())
        .collect();

    streams.retain(|s| s.is_personal || s.hash.as_ref().is_none_or(|h| !personal_hashes.contains(h)));
    streams
}

/// `language_ok` is exposed standalone since callers sometimes need it
/// against a raw language list rather than a [`Stream`].
#[must_use]
pub fn language_matches(filters: &RankerFilters, languages: &[String]) -> bool {
    filters.language_ok(languages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_within_one_passes() {
        assert!(year_matches(Some(1999), Some(2000)));
        assert!(year_matches(Some(1999), Some(1998)));
        assert!(!year_matches(Some(1999), Some(2001)));
        assert!(year_matches(None, Some(2001)));
    }

    #[test]
    fn title_requires_half_the_words() {
        assert!(title_matches("The Matrix", "the.matrix.1999.1080p"));
        assert!(!title_matches("The Matrix Reloaded", "completely.unrelated.title"));
    }

    #[test]
    fn episode_rejects_season_pack_without_pin() {
        assert!(!episode_matches((1, 3), None, "Show.Season.1.Complete"));
        assert!(episode_matches((1, 3), None, "Show.S01E03.1080p"));
        assert!(episode_matches((1, 3), Some((1, 3)), "anything"));
        assert!(!episode_matches((1, 3), Some((1, 4)), "anything"));
    }

    #[test]
    fn sort_orders_personal_then_resolution_then_size() {
        let mut streams = vec![
            Stream {
                name: "a".into(),
                title: "a".into(),
                url: "u".into(),
                binge_group: "g".into(),
                resolution: Some("720p".into()),
                size_bytes: Some(1),
                is_personal: false,
                hash: None,
                provider: None,
                retry_after_secs: None,
            },
            Stream {
                name: "b".into(),
                title: "b".into(),
                url: "u".into(),
                binge_group: "g".into(),
                resolution: Some("2160p".into()),
                size_bytes: Some(1),
                is_personal: false,
                hash: None,
                provider: None,
                retry_after_secs: None,
            },
            Stream {
                name: "c".into(),
                title: "c".into(),
                url: "u".into(),
                binge_group: "g".into(),
                resolution: Some("480p".into()),
                size_bytes: Some(1),
                is_personal: true,
                hash: None,
                provider: None,
                retry_after_secs: None,
            },
        ];
        sort_streams(&mut streams);
        assert_eq!(streams[0].name, "c");
        assert_eq!(streams[1].name, "b");
        assert_eq!(streams[2].name, "a");
    }

    #[test]
    fn shadowing_drops_non_personal_duplicate_hash() {
        let make = |is_personal: bool| Stream {
            name: "n".into(),
            title: "t".into(),
            url: "u".into(),
            binge_group: "g".into(),
            resolution: None,
            size_bytes: None,
            is_personal,
            hash: Some("deadbeef".into()),
            provider: None,
            retry_after_secs: None,
        };
        let streams = shadow_personal_duplicates(vec![make(false), make(true)]);
        assert_eq!(streams.len(), 1);
        assert!(streams[0].is_personal);
    }
}
