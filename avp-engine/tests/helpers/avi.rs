//! Writer for small uncompressed AVI files
//!
//! Stream 0 is 24-bit RGB video (one solid colour per frame), stream 1 is
//! 16-bit PCM audio holding a constant level per video frame. Every chunk is
//! indexed in `idx1`, so demuxers can seek.

use std::fs;
use std::io;
use std::path::Path;

const AVIF_HASINDEX: u32 = 0x10;
const AVIF_ISINTERLEAVED: u32 = 0x100;
const AVIIF_KEYFRAME: u32 = 0x10;

#[derive(Debug, Clone)]
pub struct AviFixture {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub frames: u32,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AviFixture {
    fn default() -> Self {
        Self {
            width: 16,
            height: 16,
            fps: 10,
            frames: 10,
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

impl AviFixture {
    /// RGB colour of video frame `n`
    pub fn frame_color(n: u32) -> [u8; 3] {
        let ramp = (n * 20 % 256) as u8;
        [ramp, 64, 255 - ramp]
    }

    /// PCM level written for the audio alongside video frame `n`
    pub fn audio_level(n: u32) -> i16 {
        (n as i16 + 1) * 1000
    }

    pub fn duration_ms(&self) -> i64 {
        self.frames as i64 * 1000 / self.fps as i64
    }

    pub fn samples_per_frame(&self) -> u32 {
        self.sample_rate / self.fps
    }

    fn row_bytes(&self) -> usize {
        (self.width as usize * 3 + 3) & !3
    }

    fn video_bytes(&self) -> usize {
        self.row_bytes() * self.height as usize
    }

    fn block_align(&self) -> u32 {
        self.channels as u32 * 2
    }

    fn audio_bytes(&self) -> usize {
        (self.samples_per_frame() * self.block_align()) as usize
    }

    /// Bottom-up BGR rows of one solid frame
    fn video_frame(&self, n: u32) -> Vec<u8> {
        let [r, g, b] = Self::frame_color(n);
        let mut row = Vec::with_capacity(self.row_bytes());
        for _ in 0..self.width {
            row.extend_from_slice(&[b, g, r]);
        }
        row.resize(self.row_bytes(), 0);
        row.repeat(self.height as usize)
    }

    fn audio_chunk(&self, n: u32) -> Vec<u8> {
        let level = Self::audio_level(n).to_le_bytes();
        let samples = (self.samples_per_frame() * self.channels as u32) as usize;
        level.repeat(samples)
    }

    fn main_header(&self) -> Vec<u8> {
        let bytes_per_sec = (self.video_bytes() as u32 * self.fps) + self.sample_rate * self.block_align();
        let mut avih = Vec::with_capacity(56);
        for value in [
            1_000_000 / self.fps,
            bytes_per_sec,
            0,
            AVIF_HASINDEX | AVIF_ISINTERLEAVED,
            self.frames,
            0,
            2,
            self.video_bytes().max(self.audio_bytes()) as u32,
            self.width,
            self.height,
            0,
            0,
            0,
            0,
        ] {
            avih.extend_from_slice(&value.to_le_bytes());
        }
        avih
    }

    fn video_header(&self) -> (Vec<u8>, Vec<u8>) {
        let mut strh = Vec::with_capacity(56);
        strh.extend_from_slice(b"vids");
        strh.extend_from_slice(b"DIB ");
        for value in [0u32, 0, 0, 1, self.fps, 0, self.frames, self.video_bytes() as u32, 0, 0] {
            strh.extend_from_slice(&value.to_le_bytes());
        }
        for value in [0i16, 0, self.width as i16, self.height as i16] {
            strh.extend_from_slice(&value.to_le_bytes());
        }

        let mut strf = Vec::with_capacity(40);
        strf.extend_from_slice(&40u32.to_le_bytes());
        strf.extend_from_slice(&(self.width as i32).to_le_bytes());
        strf.extend_from_slice(&(self.height as i32).to_le_bytes());
        strf.extend_from_slice(&1u16.to_le_bytes());
        strf.extend_from_slice(&24u16.to_le_bytes());
        for value in [0u32, self.video_bytes() as u32, 0, 0, 0, 0] {
            strf.extend_from_slice(&value.to_le_bytes());
        }
        (strh, strf)
    }

    fn audio_header(&self) -> (Vec<u8>, Vec<u8>) {
        let block_align = self.block_align();
        let total_samples = self.samples_per_frame() * self.frames;
        let mut strh = Vec::with_capacity(56);
        strh.extend_from_slice(b"auds");
        strh.extend_from_slice(&[0; 4]);
        for value in [
            0u32,
            0,
            0,
            block_align,
            self.sample_rate * block_align,
            0,
            total_samples,
            self.audio_bytes() as u32,
            0,
            block_align,
        ] {
            strh.extend_from_slice(&value.to_le_bytes());
        }
        strh.extend_from_slice(&[0; 8]);

        let mut strf = Vec::with_capacity(16);
        strf.extend_from_slice(&1u16.to_le_bytes());
        strf.extend_from_slice(&self.channels.to_le_bytes());
        strf.extend_from_slice(&self.sample_rate.to_le_bytes());
        strf.extend_from_slice(&(self.sample_rate * block_align).to_le_bytes());
        strf.extend_from_slice(&(block_align as u16).to_le_bytes());
        strf.extend_from_slice(&16u16.to_le_bytes());
        (strh, strf)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let (video_strh, video_strf) = self.video_header();
        let (audio_strh, audio_strf) = self.audio_header();
        let hdrl = [
            chunk(b"avih", &self.main_header()),
            list(b"strl", &[chunk(b"strh", &video_strh), chunk(b"strf", &video_strf)].concat()),
            list(b"strl", &[chunk(b"strh", &audio_strh), chunk(b"strf", &audio_strf)].concat()),
        ]
        .concat();

        // idx1 offsets are relative to the 'movi' fourcc
        let mut movi = Vec::new();
        let mut index = Vec::new();
        for n in 0..self.frames {
            for (id, data) in [(b"00db", self.video_frame(n)), (b"01wb", self.audio_chunk(n))] {
                index.extend_from_slice(id);
                index.extend_from_slice(&AVIIF_KEYFRAME.to_le_bytes());
                index.extend_from_slice(&(movi.len() as u32 + 4).to_le_bytes());
                index.extend_from_slice(&(data.len() as u32).to_le_bytes());
                movi.extend_from_slice(&chunk(id, &data));
            }
        }

        let body = [
            b"AVI ".to_vec(),
            list(b"hdrl", &hdrl),
            list(b"movi", &movi),
            chunk(b"idx1", &index),
        ]
        .concat();
        [b"RIFF".to_vec(), (body.len() as u32).to_le_bytes().to_vec(), body].concat()
    }

    pub fn write(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.to_bytes())
    }
}

fn chunk(id: &[u8; 4], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 9);
    out.extend_from_slice(id);
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    if data.len() % 2 == 1 {
        out.push(0);
    }
    out
}

fn list(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 12);
    out.extend_from_slice(b"LIST");
    out.extend_from_slice(&(body.len() as u32 + 4).to_le_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out
}
