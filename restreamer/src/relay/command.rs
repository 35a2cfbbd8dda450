//! Relay transcode command construction.

use crate::domain::{Destination, Stream};

/// Build the ffmpeg argument list relaying `stream` to `destination`.
///
/// Video is passed through untouched; audio is normalized to AAC and the
/// container forced to FLV, which every RTMP destination expects. Extra
/// flags (stream-level first, then destination-level) are appended by plain
/// whitespace tokenization — flag values containing spaces are not
/// supported.
pub fn build_relay_args(input_url: &str, stream: &Stream, destination: &Destination) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-i".to_string(),
        input_url.to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-f".to_string(),
        "flv".to_string(),
    ];

    if let Some(flags) = &stream.ffmpeg_flags {
        args.extend(flags.split_whitespace().map(str::to_string));
    }
    if let Some(flags) = &destination.ffmpeg_flags {
        args.extend(flags.split_whitespace().map(str::to_string));
    }

    args.push(destination.output_url());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Platform;

    fn fixtures() -> (Stream, Destination) {
        let stream = Stream::new("test");
        let dest = Destination::new(Platform::Twitch, "rtmp://live.twitch.tv/app", "key-1");
        (stream, dest)
    }

    #[test]
    fn test_base_args() {
        let (stream, dest) = fixtures();
        let args = build_relay_args("rtmp://127.0.0.1:1935/ingest/abc", &stream, &dest);

        assert_eq!(args[1], "-i");
        assert_eq!(args[2], "rtmp://127.0.0.1:1935/ingest/abc");
        assert!(args.windows(2).any(|w| w == ["-c:v", "copy"]));
        assert!(args.windows(2).any(|w| w == ["-c:a", "aac"]));
        assert!(args.windows(2).any(|w| w == ["-f", "flv"]));
        assert_eq!(args.last().unwrap(), "rtmp://live.twitch.tv/app/key-1");
    }

    #[test]
    fn test_extra_flags_are_tokenized() {
        let (mut stream, mut dest) = fixtures();
        stream.ffmpeg_flags = Some("-b:v 4500k".to_string());
        dest.ffmpeg_flags = Some("-maxrate 6000k".to_string());

        let args = build_relay_args("rtmp://127.0.0.1:1935/ingest/abc", &stream, &dest);

        let stream_flag = args.iter().position(|a| a == "-b:v").unwrap();
        let dest_flag = args.iter().position(|a| a == "-maxrate").unwrap();
        assert_eq!(args[stream_flag + 1], "4500k");
        assert_eq!(args[dest_flag + 1], "6000k");
        // Stream-level flags come before destination-level ones.
        assert!(stream_flag < dest_flag);
        // Output URL stays last.
        assert_eq!(args.last().unwrap(), "rtmp://live.twitch.tv/app/key-1");
    }

    #[test]
    fn test_no_flags() {
        let (stream, dest) = fixtures();
        let args = build_relay_args("rtmp://in", &stream, &dest);
        assert_eq!(args.len(), 10);
    }
}
