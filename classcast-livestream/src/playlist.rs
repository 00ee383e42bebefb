//! Master playlist writer.
//!
//! The transcoder maintains the per-rendition variant playlists itself;
//! the origin only has to emit the master index that ties them together.
//! Written right after the transcoder spawns (variants appear shortly
//! after) and overwritten on each fresh publish of the same key.

use std::path::{Path, PathBuf};

use classcast_core::models::{Codec, Rendition};

/// Master playlist filename for one codec of a stream.
#[must_use]
pub fn master_filename(stream_key: &str, codec: Codec) -> String {
    format!("{}_{}.m3u8", stream_key, codec.tag())
}

/// Render the master playlist body: one `#EXT-X-STREAM-INF` entry per
/// rendition, highest quality first, each pointing at the relative
/// variant playlist the transcoder writes next to it.
#[must_use]
pub fn render_master_playlist(stream_key: &str, codec: Codec, renditions: &[Rendition]) -> String {
    let mut body = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    for rendition in renditions {
        body.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}\n{}\n",
            rendition.bandwidth(),
            rendition.resolution(),
            rendition.variant_filename(stream_key, codec),
        ));
    }
    body
}

/// Write (or overwrite) the master playlist for one codec of a stream.
pub async fn write_master_playlist(
    streams_dir: &Path,
    stream_key: &str,
    codec: Codec,
    renditions: &[Rendition],
) -> std::io::Result<PathBuf> {
    let path = streams_dir.join(master_filename(stream_key, codec));
    let body = render_master_playlist(stream_key, codec, renditions);
    tokio::fs::write(&path, body).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder() -> Vec<Rendition> {
        vec![
            Rendition::new("720p", 1280, 720, 2500, 128),
            Rendition::new("360p", 640, 360, 700, 64),
        ]
    }

    #[test]
    fn test_render_master_playlist() {
        let body = render_master_playlist("k1", Codec::H264, &ladder());
        let lines: Vec<&str> = body.lines().collect();

        assert_eq!(lines[0], "#EXTM3U");
        assert_eq!(lines[1], "#EXT-X-VERSION:3");
        assert_eq!(lines[2], "#EXT-X-STREAM-INF:BANDWIDTH=2628000,RESOLUTION=1280x720");
        assert_eq!(lines[3], "k1_h264_720p.m3u8");
        assert_eq!(lines[4], "#EXT-X-STREAM-INF:BANDWIDTH=764000,RESOLUTION=640x360");
        assert_eq!(lines[5], "k1_h264_360p.m3u8");
    }

    #[tokio::test]
    async fn test_write_overwrites_previous_publish() {
        let dir = tempfile::tempdir().unwrap();

        let path = write_master_playlist(dir.path(), "k1", Codec::Hevc, &ladder())
            .await
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "k1_hevc.m3u8");

        let shorter = vec![Rendition::new("480p", 854, 480, 800, 96)];
        write_master_playlist(dir.path(), "k1", Codec::Hevc, &shorter)
            .await
            .unwrap();

        let body = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(body.contains("k1_hevc_480p.m3u8"));
        assert!(!body.contains("720p"));
    }
}
