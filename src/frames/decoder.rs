use crate::config::FrameConfig;
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::debug;

/// A running decode pipeline: its MJPEG output and the process behind it
pub struct DecoderHandle {
    pub output: Box<dyn AsyncRead + Send + Unpin>,
    pub child: Option<Child>,
}

/// Starts decode pipelines for stream URLs
pub trait DecoderLauncher: Send + Sync {
    fn launch(&self, source_url: &str) -> io::Result<DecoderHandle>;
}

/// ffmpeg transcoding a stream into concatenated JPEG images on stdout
pub struct FfmpegLauncher {
    program: String,
    rtsp_transport: String,
}

impl FfmpegLauncher {
    pub fn new(config: &FrameConfig) -> Self {
        Self {
            program: config.ffmpeg_path.clone(),
            rtsp_transport: config.rtsp_transport.clone(),
        }
    }

    pub fn args(&self, source_url: &str) -> Vec<String> {
        let mut args = Vec::new();
        if source_url.starts_with("rtsp://") {
            args.extend(["-rtsp_transport".to_string(), self.rtsp_transport.clone()]);
        }
        args.extend(
            [
                "-i",
                source_url,
                "-f",
                "image2pipe",
                "-q:v",
                "2",
                "-pix_fmt",
                "yuvj422p",
                "-vcodec",
                "mjpeg",
                "-",
            ]
            .map(str::to_string),
        );
        args
    }
}

impl DecoderLauncher for FfmpegLauncher {
    fn launch(&self, source_url: &str) -> io::Result<DecoderHandle> {
        let mut child = Command::new(&self.program)
            .args(["-hide_banner", "-loglevel", "error"])
            .args(self.args(source_url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "decoder stdout unavailable"))?;

        if let Some(stderr) = child.stderr.take() {
            let pid = child.id();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("ffmpeg[{:?}]: {}", pid, line);
                }
            });
        }

        Ok(DecoderHandle {
            output: Box::new(stdout),
            child: Some(child),
        })
    }
}
