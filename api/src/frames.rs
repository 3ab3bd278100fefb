//! Video frame decoding and sampling
//!
//! Frames are pulled one at a time from an `ffmpeg` child process writing raw
//! RGB to a pipe. Nothing is decoded ahead of the consumer, so a caller that
//! stops iterating stops the decode. Dropping the iterator kills and reaps
//! the child.

use anyhow::{Context, Result, anyhow};
use image::{DynamicImage, RgbImage};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

/// Lazy, single-pass stream of decoded frames
pub type DecodedFrames = Box<dyn Iterator<Item = Result<DynamicImage>> + Send>;

/// Opens a video file as a stream of frames
pub trait VideoDecoder: Send + Sync {
    fn open(&self, path: &Path) -> Result<DecodedFrames>;
}

/// Decoder backed by the `ffprobe` / `ffmpeg` binaries on `PATH`
#[derive(Debug, Default, Clone)]
pub struct FfmpegDecoder;

impl FfmpegDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl FfmpegDecoder {
    fn spawn(&self, path: &Path) -> Result<FfmpegFrames> {
        // Frames come out auto-rotated, so these are display dimensions
        let (width, height) = stream_dimensions(path)?;

        let child = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-nostdin"])
            .arg("-i")
            .arg(path)
            .args(["-an", "-sn"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("ffmpeg not available")?;

        log::info!(
            "[frames] Decoding {} ({}x{})",
            path.display(),
            width,
            height
        );
        FfmpegFrames::new(child, width, height)
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn open(&self, path: &Path) -> Result<DecodedFrames> {
        Ok(Box::new(self.spawn(path)?))
    }
}

/// Raw frames read from a running `ffmpeg` process
struct FfmpegFrames {
    child: Child,
    stdout: BufReader<ChildStdout>,
    width: u32,
    height: u32,
    finished: bool,
}

impl FfmpegFrames {
    /// Take over a child writing `width`x`height` rgb24 frames to stdout.
    fn new(mut child: Child, width: u32, height: u32) -> Result<Self> {
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(anyhow!("ffmpeg stdout was not captured"));
        };
        Ok(Self {
            child,
            stdout: BufReader::new(stdout),
            width,
            height,
            finished: false,
        })
    }

    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Reap the child once stdout is drained and report a failed decode.
    fn finish(&mut self) -> Option<Result<DynamicImage>> {
        self.finished = true;
        match self.child.wait() {
            Ok(status) if status.success() => None,
            Ok(status) => Some(Err(anyhow!("ffmpeg exited with {}", status))),
            Err(e) => Some(Err(anyhow!("waiting for ffmpeg: {}", e))),
        }
    }
}

impl Iterator for FfmpegFrames {
    type Item = Result<DynamicImage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut buf = vec![0u8; self.frame_len()];
        match read_frame(&mut self.stdout, &mut buf) {
            Ok(0) => self.finish(),
            Ok(n) if n < buf.len() => {
                let failure = self.finish();
                Some(failure.unwrap_or_else(|| {
                    Err(anyhow!("truncated frame: {} of {} bytes", n, buf.len()))
                }))
            }
            Ok(_) => match RgbImage::from_raw(self.width, self.height, buf) {
                Some(frame) => Some(Ok(DynamicImage::ImageRgb8(frame))),
                None => {
                    self.finished = true;
                    Some(Err(anyhow!("invalid frame dimensions")))
                }
            },
            Err(e) => {
                self.finished = true;
                Some(Err(anyhow!("reading frame from ffmpeg: {}", e)))
            }
        }
    }
}

impl Drop for FfmpegFrames {
    fn drop(&mut self) {
        // Still running when the consumer stopped early
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

/// Fill `buf` from `reader`, returning fewer bytes only at end of stream.
fn read_frame(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[derive(Debug, Deserialize)]
struct StreamInfo {
    #[serde(default)]
    streams: Vec<VideoStream>,
}

#[derive(Debug, Deserialize)]
struct VideoStream {
    width: Option<u32>,
    height: Option<u32>,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    side_data_list: Vec<SideData>,
}

#[derive(Debug, Deserialize)]
struct SideData {
    rotation: Option<f64>,
}

impl VideoStream {
    /// Rotation in degrees, normalised to 0..360
    fn rotation(&self) -> i64 {
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|d| d.rotation)
            .or_else(|| self.tags.get("rotate").and_then(|r| r.trim().parse().ok()))
            .unwrap_or(0.0);
        (degrees.round() as i64).rem_euclid(360)
    }
}

/// Display width and height of the first video stream
fn stream_dimensions(path: &Path) -> Result<(u32, u32)> {
    let output = Command::new("ffprobe")
        .args(["-v", "error"])
        .args(["-select_streams", "v:0"])
        .args([
            "-show_entries",
            "stream=width,height:stream_tags=rotate:stream_side_data=rotation",
        ])
        .args(["-of", "json"])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .context("ffprobe not available")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("could not open video file: {}", stderr.trim()));
    }

    parse_stream_info(&String::from_utf8_lossy(&output.stdout))
}

/// Parse `ffprobe -of json` output, swapping sides for quarter-turn rotations.
fn parse_stream_info(raw: &str) -> Result<(u32, u32)> {
    let info: StreamInfo = serde_json::from_str(raw).context("parsing ffprobe output")?;
    let stream = info
        .streams
        .first()
        .ok_or_else(|| anyhow!("video has no decodable video stream"))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        (w, h) => {
            return Err(anyhow!(
                "video has zero-sized frames ({}x{})",
                w.unwrap_or(0),
                h.unwrap_or(0)
            ));
        }
    };

    match stream.rotation() {
        90 | 270 => Ok((height, width)),
        _ => Ok((width, height)),
    }
}

/// Keeps every `interval`th frame, numbering frames from 1.
///
/// A decode error is passed through and ends the sequence.
pub struct SampledFrames<I> {
    frames: I,
    interval: usize,
    index: usize,
    done: bool,
}

impl<I> SampledFrames<I>
where
    I: Iterator<Item = Result<DynamicImage>>,
{
    pub fn new(frames: I, interval: usize) -> Self {
        Self {
            frames,
            interval: interval.max(1),
            index: 0,
            done: false,
        }
    }

    /// Number of frames pulled from the decoder so far
    pub fn decoded(&self) -> usize {
        self.index
    }
}

impl<I> Iterator for SampledFrames<I>
where
    I: Iterator<Item = Result<DynamicImage>>,
{
    type Item = Result<(usize, DynamicImage)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let Some(frame) = self.frames.next() else {
                self.done = true;
                return None;
            };
            self.index += 1;
            match frame {
                Ok(frame) if self.index % self.interval == 0 => {
                    return Some(Ok((self.index, frame)));
                }
                Ok(_) => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.context(format!("decoding frame {}", self.index))));
                }
            }
        }
    }
}
