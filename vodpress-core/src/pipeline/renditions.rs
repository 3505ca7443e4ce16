use std::io;
use std::path::Path;

use tokio::fs;

use crate::config::HlsSection;
use crate::encoder::EncoderInvocation;
use crate::ladder::Ladder;

pub const MASTER_PLAYLIST_NAME: &str = "master.m3u8";
pub const RENDITION_PLAYLIST_NAME: &str = "playlist.m3u8";
pub const SEGMENT_TEMPLATE: &str = "segment_%03d.ts";

/// The encoder does not create the rendition tree in every configuration;
/// the stage lays it out up front, one directory per ladder index.
pub(crate) async fn prepare_output_tree(tree: &Path, ladder: &Ladder) -> io::Result<()> {
    fs::create_dir_all(tree).await?;
    for rendition in ladder.renditions() {
        fs::create_dir_all(tree.join(rendition.dir_name())).await?;
    }
    Ok(())
}

/// Build the fan-out run: the input video stream is split into one copy per
/// rendition, each scaled and encoded at its ladder bitrates, muxed into
/// 6-second VOD HLS segments, with one master playlist over all variants.
/// Renditions appear in ascending index order in the argument list, the
/// stream map and the master playlist; the serving layer relies on that.
pub(crate) fn build_invocation(
    section: &HlsSection,
    source: &Path,
    tree: &Path,
    ladder: &Ladder,
) -> EncoderInvocation {
    let count = ladder.len();

    let mut filter = format!("[0:v]split={count}");
    for rendition in ladder.renditions() {
        filter.push_str(&format!("[s{}]", rendition.index));
    }
    for rendition in ladder.renditions() {
        filter.push_str(&format!(
            ";[s{i}]scale={w}:{h}[v{i}]",
            i = rendition.index,
            w = rendition.width,
            h = rendition.height
        ));
    }

    let mut args = vec![
        "-y".to_string(),
        "-i".to_string(),
        source.to_string_lossy().to_string(),
        "-filter_complex".to_string(),
        filter,
    ];

    for rendition in ladder.renditions() {
        let i = rendition.index;
        args.extend([
            "-map".to_string(),
            format!("[v{i}]"),
            "-map".to_string(),
            "0:a".to_string(),
            format!("-c:v:{i}"),
            "libx264".to_string(),
            format!("-b:v:{i}"),
            format!("{}k", rendition.video_bitrate_kbps),
            format!("-c:a:{i}"),
            "aac".to_string(),
            format!("-b:a:{i}"),
            format!("{}k", rendition.audio_bitrate_kbps),
        ]);
    }

    let stream_map = ladder
        .renditions()
        .iter()
        .map(|rendition| format!("v:{i},a:{i}", i = rendition.index))
        .collect::<Vec<_>>()
        .join(" ");

    args.extend([
        "-f".to_string(),
        "hls".to_string(),
        "-hls_time".to_string(),
        section.segment_seconds.to_string(),
        "-hls_playlist_type".to_string(),
        "vod".to_string(),
        "-var_stream_map".to_string(),
        stream_map,
        "-master_pl_name".to_string(),
        MASTER_PLAYLIST_NAME.to_string(),
        "-hls_segment_filename".to_string(),
        format!("{}/%v/{SEGMENT_TEMPLATE}", tree.display()),
        format!("{}/%v/{RENDITION_PLAYLIST_NAME}", tree.display()),
    ]);

    let mut invocation = EncoderInvocation::new(args)
        .with_working_dir(tree)
        .expect_output(tree.join(MASTER_PLAYLIST_NAME));
    for rendition in ladder.renditions() {
        invocation = invocation
            .expect_output(tree.join(rendition.dir_name()).join(RENDITION_PLAYLIST_NAME));
    }
    invocation
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn section() -> HlsSection {
        HlsSection { segment_seconds: 6 }
    }

    #[test]
    fn fan_out_covers_every_rendition_in_ascending_order() {
        let ladder = Ladder::standard();
        let invocation =
            build_invocation(&section(), Path::new("/tmp/norm.mp4"), Path::new("/out/j1"), &ladder);
        let args = &invocation.args;

        let filter = &args[args.iter().position(|a| a == "-filter_complex").unwrap() + 1];
        assert!(filter.starts_with("[0:v]split=3[s0][s1][s2]"));
        assert!(filter.contains("[s0]scale=640:360[v0]"));
        assert!(filter.contains("[s1]scale=1280:720[v1]"));
        assert!(filter.contains("[s2]scale=1920:1080[v2]"));

        let bitrate_pos: Vec<usize> = ["-b:v:0", "-b:v:1", "-b:v:2"]
            .iter()
            .map(|flag| args.iter().position(|a| a == flag).unwrap())
            .collect();
        assert!(bitrate_pos[0] < bitrate_pos[1] && bitrate_pos[1] < bitrate_pos[2]);
        assert_eq!(args[bitrate_pos[0] + 1], "800k");
        assert_eq!(args[bitrate_pos[1] + 1], "2800k");
        assert_eq!(args[bitrate_pos[2] + 1], "5000k");
        let audio = args.iter().position(|a| a == "-b:a:1").unwrap();
        assert_eq!(args[audio + 1], "128k");
    }

    #[test]
    fn hls_muxing_is_vod_with_a_master_playlist() {
        let ladder = Ladder::standard();
        let invocation =
            build_invocation(&section(), Path::new("norm.mp4"), Path::new("/out/j1"), &ladder);
        let args = &invocation.args;

        let map = args.iter().position(|a| a == "-var_stream_map").unwrap();
        assert_eq!(args[map + 1], "v:0,a:0 v:1,a:1 v:2,a:2");
        let hls_time = args.iter().position(|a| a == "-hls_time").unwrap();
        assert_eq!(args[hls_time + 1], "6");
        let playlist_type = args.iter().position(|a| a == "-hls_playlist_type").unwrap();
        assert_eq!(args[playlist_type + 1], "vod");
        let master = args.iter().position(|a| a == "-master_pl_name").unwrap();
        assert_eq!(args[master + 1], "master.m3u8");
        let segments = args.iter().position(|a| a == "-hls_segment_filename").unwrap();
        assert_eq!(args[segments + 1], "/out/j1/%v/segment_%03d.ts");
        assert_eq!(args.last().unwrap(), "/out/j1/%v/playlist.m3u8");
    }

    #[test]
    fn expected_outputs_are_master_plus_each_rendition_playlist() {
        let ladder = Ladder::standard();
        let invocation =
            build_invocation(&section(), Path::new("norm.mp4"), Path::new("/out/j1"), &ladder);
        assert_eq!(
            invocation.expected_outputs,
            vec![
                PathBuf::from("/out/j1/master.m3u8"),
                PathBuf::from("/out/j1/0/playlist.m3u8"),
                PathBuf::from("/out/j1/1/playlist.m3u8"),
                PathBuf::from("/out/j1/2/playlist.m3u8"),
            ]
        );
        assert_eq!(invocation.working_dir.as_deref(), Some(Path::new("/out/j1")));
    }

    #[tokio::test]
    async fn prepare_output_tree_creates_one_dir_per_rendition() {
        let base = tempfile::TempDir::new().unwrap();
        let tree = base.path().join("job");
        prepare_output_tree(&tree, &Ladder::standard()).await.unwrap();
        for index in 0..3 {
            assert!(tree.join(index.to_string()).is_dir());
        }
    }
}
