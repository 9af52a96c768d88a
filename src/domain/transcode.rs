//! ffmpeg argument template for HLS output.

use std::ffi::OsString;
use std::path::Path;

pub const PLAYLIST_NAME: &str = "stream.m3u8";
pub const SEGMENT_PATTERN: &str = "segment_%03d.ts";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodecMode {
    /// Remux the source streams untouched.
    Copy,
    /// Re-encode to a fixed video/audio codec pair.
    Reencode { video: String, audio: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HlsProfile {
    pub segment_seconds: u32,
    pub codec: CodecMode,
}

impl Default for HlsProfile {
    fn default() -> Self {
        Self {
            segment_seconds: 4,
            codec: CodecMode::Reencode {
                video: String::from("libx264"),
                audio: String::from("aac"),
            },
        }
    }
}

impl HlsProfile {
    /// Arguments (without the program name) that turn `input` into a VOD
    /// playlist plus numbered segments inside `output_dir`.
    pub fn ffmpeg_args(&self, input: &Path, output_dir: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-y", "-i"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(input.as_os_str().to_owned());

        match &self.codec {
            CodecMode::Copy => {
                args.push("-c".into());
                args.push("copy".into());
            }
            CodecMode::Reencode { video, audio } => {
                args.push("-c:v".into());
                args.push(video.into());
                args.push("-c:a".into());
                args.push(audio.into());
            }
        }

        args.push("-f".into());
        args.push("hls".into());
        args.push("-hls_time".into());
        args.push(self.segment_seconds.to_string().into());
        args.push("-hls_playlist_type".into());
        args.push("vod".into());
        args.push("-hls_segment_filename".into());
        args.push(output_dir.join(SEGMENT_PATTERN).into_os_string());
        args.push(output_dir.join(PLAYLIST_NAME).into_os_string());
        args
    }
}
