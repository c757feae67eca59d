//! Test fixtures shared across this crate's test modules.

use crate::config::ProviderConfig;
use crate::models::{ContentMeta, ContentRef, HttpStream, PersonalFile, Torrent};

#[must_use]
pub fn movie_ref(imdb_id: &str) -> ContentRef {
    ContentRef::Movie {
        imdb_id: imdb_id.to_string(),
        meta: ContentMeta::default(),
    }
}

#[must_use]
pub fn episode_ref(imdb_id: &str, season: u32, episode: u32) -> ContentRef {
    ContentRef::Episode {
        imdb_id: imdb_id.to_string(),
        season,
        episode,
        meta: ContentMeta::default(),
    }
}

pub struct TorrentFixture {
    info_hash: String,
    seeders: u32,
    resolution: Option<String>,
}

impl TorrentFixture {
    #[must_use]
    pub fn new(info_hash: &str) -> Self {
        Self {
            info_hash: info_hash.to_string(),
            seeders: 10,
            resolution: Some("1080p".to_string()),
        }
    }

    #[must_use]
    pub fn with_seeders(mut self, seeders: u32) -> Self {
        self.seeders = seeders;
        self
    }

    #[must_use]
    pub fn with_resolution(mut self, resolution: &str) -> Self {
        self.resolution = Some(resolution.to_string());
        self
    }

    #[must_use]
    pub fn build(self) -> Torrent {
        Torrent {
            info_hash: self.info_hash,
            title: "Test.Release.2020.1080p".to_string(),
            size_bytes: 4_000_000_000,
            seeders: self.seeders,
            tracker: "test-tracker".to_string(),
            languages: vec!["en".to_string()],
            season: None,
            episode: None,
            resolution: self.resolution,
            codec: Some("h264".to_string()),
            quality_category: Some("bluray".to_string()),
        }
    }
}

#[must_use]
pub fn http_stream_fixture(provider_label: &str, url: &str) -> HttpStream {
    HttpStream {
        provider_label: provider_label.to_string(),
        display_title: "Test Release 2020".to_string(),
        size_bytes: Some(2_000_000_000),
        resolution: Some("720p".to_string()),
        opaque_url: url.to_string(),
    }
}

#[must_use]
pub fn personal_file_fixture(provider: &str, hash: &str) -> PersonalFile {
    PersonalFile {
        provider: provider.to_string(),
        file_name: "MyFile.mkv".to_string(),
        url: "https://example.com/personal-file".to_string(),
        hash: Some(hash.to_string()),
        size_bytes: Some(4_000_000_000),
        resolution: Some("1080p".to_string()),
    }
}

#[must_use]
pub fn provider_config_fixture(kind: &str) -> ProviderConfig {
    ProviderConfig {
        kind: kind.to_string(),
        ..ProviderConfig::default()
    }
}

/// Fails the test if `future` doesn't resolve within `duration`.
pub async fn with_timeout<F>(duration: std::time::Duration, future: F) -> F::Output
where
    F: std::future::Future,
{
    tokio::select! {
        result = future => result,
        () = tokio::time::sleep(duration) => {
            panic!("test timed out after {duration:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn torrent_fixture_builds_with_overrides() {
        let torrent = TorrentFixture::new("ABCDEF").with_seeders(99).with_resolution("2160p").build();
        assert_eq!(torrent.info_hash, "ABCDEF");
        assert_eq!(torrent.seeders, 99);
        assert_eq!(torrent.resolution.as_deref(), Some("2160p"));
    }

    #[tokio::test]
    async fn with_timeout_passes_through_fast_future() {
        let result = with_timeout(std::time::Duration::from_secs(1), async { 42 }).await;
        assert_eq!(result, 42);
    }
}
