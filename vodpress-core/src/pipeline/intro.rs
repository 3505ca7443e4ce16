use std::path::Path;

use crate::config::IntroSection;
use crate::encoder::EncoderInvocation;

/// Build the intro-attachment run: both inputs are scaled and padded onto
/// the canonical canvas (aspect preserved, centred letterbox/pillarbox),
/// then concatenated intro-first on video and audio into one file.
pub(crate) fn build_invocation(
    section: &IntroSection,
    intro_asset: &Path,
    source: &Path,
    output: &Path,
) -> EncoderInvocation {
    let width = section.canvas_width;
    let height = section.canvas_height;
    let normalize = format!(
        "scale={width}:{height}:force_original_aspect_ratio=decrease,\
         pad={width}:{height}:(ow-iw)/2:(oh-ih)/2,setsar=1"
    );
    let filter = format!(
        "[0:v]{normalize}[v0];[1:v]{normalize}[v1];\
         [v0][0:a][v1][1:a]concat=n=2:v=1:a=1[outv][outa]"
    );

    let args = vec![
        "-y".to_string(),
        "-i".to_string(),
        intro_asset.to_string_lossy().to_string(),
        "-i".to_string(),
        source.to_string_lossy().to_string(),
        "-filter_complex".to_string(),
        filter,
        "-map".to_string(),
        "[outv]".to_string(),
        "-map".to_string(),
        "[outa]".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-crf".to_string(),
        section.crf.to_string(),
        "-preset".to_string(),
        section.preset.clone(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.to_string_lossy().to_string(),
    ];

    EncoderInvocation::new(args).expect_output(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn section() -> IntroSection {
        IntroSection {
            asset_path: "assets/intro.mp4".into(),
            canvas_width: 1920,
            canvas_height: 1080,
            crf: 23,
            preset: "veryfast".into(),
        }
    }

    #[test]
    fn intro_precedes_source_in_the_concat_graph() {
        let invocation = build_invocation(
            &section(),
            Path::new("/assets/intro.mp4"),
            Path::new("/staging/upload.mp4"),
            Path::new("/staging/normalized.mp4"),
        );

        let intro_pos = invocation
            .args
            .iter()
            .position(|arg| arg == "/assets/intro.mp4")
            .unwrap();
        let source_pos = invocation
            .args
            .iter()
            .position(|arg| arg == "/staging/upload.mp4")
            .unwrap();
        assert!(intro_pos < source_pos, "intro must be input 0");

        let filter = &invocation.args
            [invocation.args.iter().position(|a| a == "-filter_complex").unwrap() + 1];
        assert!(filter.contains("concat=n=2:v=1:a=1"));
        assert!(filter.contains("scale=1920:1080:force_original_aspect_ratio=decrease"));
        assert!(filter.contains("pad=1920:1080:(ow-iw)/2:(oh-ih)/2"));
        assert!(filter.contains("[v0][0:a][v1][1:a]"));
    }

    #[test]
    fn output_uses_the_fixed_quality_preset_and_is_expected() {
        let invocation = build_invocation(
            &section(),
            Path::new("intro.mp4"),
            Path::new("in.mp4"),
            Path::new("out.mp4"),
        );
        let args = &invocation.args;
        let crf = args.iter().position(|a| a == "-crf").unwrap();
        assert_eq!(args[crf + 1], "23");
        let preset = args.iter().position(|a| a == "-preset").unwrap();
        assert_eq!(args[preset + 1], "veryfast");
        assert_eq!(args.last().unwrap(), "out.mp4");
        assert_eq!(invocation.expected_outputs, vec![PathBuf::from("out.mp4")]);
    }
}
