//! Video links attached to blueprints
//!
//! Only a handful of providers are accepted. The user pastes a watch URL and
//! the stored value is the provider's embed URL.

use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoEmbed {
    pub provider: &'static str,
    pub url: String,
}

struct Provider {
    name: &'static str,
    pattern: Regex,
    embed: fn(&str) -> String,
}

fn provider(name: &'static str, pattern: &str, embed: fn(&str) -> String) -> Option<Provider> {
    match Regex::new(pattern) {
        Ok(pattern) => Some(Provider { name, pattern, embed }),
        Err(e) => {
            tracing::error!("Invalid video pattern for {}: {}", name, e);
            None
        }
    }
}

static PROVIDERS: Lazy<Vec<Provider>> = Lazy::new(|| {
    [
        provider(
            "youtube",
            r"^https?://(?:www\.|m\.)?(?:youtube\.com/(?:watch\?(?:.*&)?v=|embed/|shorts/)|youtu\.be/)([A-Za-z0-9_-]{6,20})",
            |id| format!("https://www.youtube.com/embed/{}", id),
        ),
        provider(
            "vimeo",
            r"^https?://(?:www\.|player\.)?vimeo\.com/(?:video/)?([0-9]{4,12})",
            |id| format!("https://player.vimeo.com/video/{}", id),
        ),
        provider(
            "dailymotion",
            r"^https?://(?:www\.)?(?:dailymotion\.com/(?:embed/)?video/|dai\.ly/)([A-Za-z0-9]{4,20})",
            |id| format!("https://www.dailymotion.com/embed/video/{}", id),
        ),
        provider(
            "bilibili",
            r"^https?://(?:www\.|m\.)?bilibili\.com/video/(BV[A-Za-z0-9]{8,12})",
            |id| format!("https://player.bilibili.com/player.html?bvid={}", id),
        ),
        provider(
            "niconico",
            r"^https?://(?:www\.|sp\.|embed\.)?nicovideo\.jp/watch/((?:sm|nm|so)[0-9]{1,12})",
            |id| format!("https://embed.nicovideo.jp/watch/{}", id),
        ),
    ]
    .into_iter()
    .flatten()
    .collect()
});

/// Resolve a pasted video URL to an embeddable one, `None` for unknown hosts.
pub fn parse_video_url(url: &str) -> Option<VideoEmbed> {
    let url = url.trim();
    PROVIDERS.iter().find_map(|p| {
        let id = p.pattern.captures(url)?.get(1)?.as_str();
        Some(VideoEmbed {
            provider: p.name,
            url: (p.embed)(id),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_youtube_variants() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?feature=share&v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ",
            "http://m.youtube.com/embed/dQw4w9WgXcQ",
        ] {
            let embed = parse_video_url(url).expect(url);
            assert_eq!(embed.provider, "youtube");
            assert_eq!(embed.url, "https://www.youtube.com/embed/dQw4w9WgXcQ");
        }
    }

    #[test]
    fn test_other_providers() {
        let cases = [
            ("https://vimeo.com/76979871", "vimeo", "https://player.vimeo.com/video/76979871"),
            (
                "https://www.dailymotion.com/video/x7tgad0",
                "dailymotion",
                "https://www.dailymotion.com/embed/video/x7tgad0",
            ),
            (
                "https://www.bilibili.com/video/BV1GJ411x7h7",
                "bilibili",
                "https://player.bilibili.com/player.html?bvid=BV1GJ411x7h7",
            ),
            (
                "https://www.nicovideo.jp/watch/sm9",
                "niconico",
                "https://embed.nicovideo.jp/watch/sm9",
            ),
        ];
        for (url, provider, embed) in cases {
            let parsed = parse_video_url(url).expect(url);
            assert_eq!(parsed.provider, provider);
            assert_eq!(parsed.url, embed);
        }
    }

    #[test]
    fn test_rejects_unknown_hosts() {
        assert!(parse_video_url("https://example.com/watch?v=dQw4w9WgXcQ").is_none());
        assert!(parse_video_url("javascript:alert(1)").is_none());
        assert!(parse_video_url("").is_none());
    }
}
