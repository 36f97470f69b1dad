//! Ogg Opus file decoder.
//!
//! - Demux: Ogg pages → Opus packets (`ogg` crate)
//! - Decode: Opus packet → 48 kHz PCM (`opus` crate), pre-skip removed
//! - Channel convert: stereo streams are averaged down to mono

use std::io::{Read, Seek};

use bytes::Buf;
use ogg::PacketReader;

use super::error::AudioError;
use super::source::{ReadStatus, SampleSource};

/// Opus always decodes at 48 kHz here, matching the voice protocol.
const OPUS_SAMPLE_RATE: u32 = 48000;

/// Largest Opus frame: 120 ms at 48 kHz, per channel.
const MAX_FRAME_SIZE: usize = 5760;

const OPUS_HEAD_MAGIC: &[u8] = b"OpusHead";
const OPUS_TAGS_MAGIC: &[u8] = b"OpusTags";
const OPUS_HEAD_MIN_LEN: usize = 19;

pub struct OpusFileSource<R: Read + Seek> {
    packets: Option<PacketReader<R>>,
    decoder: opus::Decoder,
    channels: usize,
    /// Samples per channel still to be dropped from the start of the stream
    pre_skip: usize,
    /// Decoded mono samples not yet handed out
    pending: Vec<i16>,
    pos: usize,
    decode_buf: Vec<i16>,
}

impl<R: Read + Seek> OpusFileSource<R> {
    /// Parse the `OpusHead`/`OpusTags` header packets and set up a decoder.
    pub fn new(reader: R) -> Result<Self, AudioError> {
        let mut packets = PacketReader::new(reader);

        let head = next_packet(&mut packets)?
            .ok_or_else(|| AudioError::Decode("missing OpusHead packet".into()))?;
        let (channels, pre_skip) = parse_head(&head)?;

        let tags = next_packet(&mut packets)?
            .ok_or_else(|| AudioError::Decode("missing OpusTags packet".into()))?;
        if !tags.starts_with(OPUS_TAGS_MAGIC) {
            return Err(AudioError::Decode("second packet is not OpusTags".into()));
        }

        let opus_channels = if channels == 1 {
            opus::Channels::Mono
        } else {
            opus::Channels::Stereo
        };
        let decoder = opus::Decoder::new(OPUS_SAMPLE_RATE, opus_channels)
            .map_err(|e| AudioError::Decode(format!("failed to create Opus decoder: {}", e)))?;

        log::debug!("Opus stream: {} channel(s), pre-skip {}", channels, pre_skip);

        Ok(Self {
            packets: Some(packets),
            decoder,
            channels,
            pre_skip,
            pending: Vec::new(),
            pos: 0,
            decode_buf: vec![0i16; MAX_FRAME_SIZE * channels],
        })
    }

    /// Decode one packet into `pending`. Returns `false` at end of stream.
    fn decode_next(&mut self) -> Result<bool, AudioError> {
        let Some(packets) = self.packets.as_mut() else {
            return Ok(false);
        };
        let Some(data) = next_packet(packets)? else {
            return Ok(false);
        };
        if data.is_empty() {
            return Ok(true);
        }

        let frames = self
            .decoder
            .decode(&data, &mut self.decode_buf, false)
            .map_err(|e| AudioError::Decode(format!("Opus decode error: {}", e)))?;

        let skip = self.pre_skip.min(frames);
        self.pre_skip -= skip;

        self.pending.clear();
        self.pos = 0;
        let decoded = &self.decode_buf[..frames * self.channels];
        if self.channels == 1 {
            self.pending.extend_from_slice(&decoded[skip..]);
        } else {
            // Multi-channel → mono: average all channels
            self.pending.extend(decoded.chunks_exact(self.channels).skip(skip).map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / self.channels as i32) as i16
            }));
        }
        Ok(true)
    }
}

impl<R: Read + Seek + Send> SampleSource for OpusFileSource<R> {
    fn read(&mut self, pcm: &mut [i16]) -> Result<ReadStatus, AudioError> {
        if pcm.is_empty() {
            return Ok(ReadStatus::More(0));
        }

        while self.pos == self.pending.len() {
            if !self.decode_next()? {
                return Ok(ReadStatus::End(0));
            }
        }

        let available = &self.pending[self.pos..];
        let n = available.len().min(pcm.len());
        pcm[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(ReadStatus::More(n))
    }

    fn close(&mut self) {
        self.packets = None;
        self.pending = Vec::new();
        self.pos = 0;
    }
}

fn next_packet<R: Read + Seek>(packets: &mut PacketReader<R>) -> Result<Option<Vec<u8>>, AudioError> {
    packets
        .read_packet()
        .map(|p| p.map(|p| p.data))
        .map_err(|e| AudioError::Decode(format!("Ogg read error: {}", e)))
}

/// Returns `(channels, pre_skip)` from an `OpusHead` packet.
fn parse_head(head: &[u8]) -> Result<(usize, usize), AudioError> {
    if head.len() < OPUS_HEAD_MIN_LEN || !head.starts_with(OPUS_HEAD_MAGIC) {
        return Err(AudioError::Decode("first packet is not OpusHead".into()));
    }

    let mut fields = &head[OPUS_HEAD_MAGIC.len()..];
    let version = fields.get_u8();
    let channels = fields.get_u8() as usize;
    let pre_skip = fields.get_u16_le() as usize;

    if version >> 4 != 0 {
        return Err(AudioError::Decode(format!("unsupported OpusHead version {}", version)));
    }
    if !(1..=2).contains(&channels) {
        return Err(AudioError::Decode(format!("unsupported channel count {}", channels)));
    }
    Ok((channels, pre_skip))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use ogg::writing::PacketWriteEndInfo;
    use ogg::PacketWriter;

    use super::*;
    use crate::audio::source::read_all;

    const FRAME: usize = 960;
    const PRE_SKIP: u16 = 312;

    fn opus_head(channels: u8) -> Vec<u8> {
        let mut head = OPUS_HEAD_MAGIC.to_vec();
        head.push(1);
        head.push(channels);
        head.extend_from_slice(&PRE_SKIP.to_le_bytes());
        head.extend_from_slice(&OPUS_SAMPLE_RATE.to_le_bytes());
        head.extend_from_slice(&0i16.to_le_bytes());
        head.push(0);
        head
    }

    fn opus_tags() -> Vec<u8> {
        let mut tags = OPUS_TAGS_MAGIC.to_vec();
        tags.extend_from_slice(&4u32.to_le_bytes());
        tags.extend_from_slice(b"test");
        tags.extend_from_slice(&0u32.to_le_bytes());
        tags
    }

    /// A mono Ogg Opus stream of `frames` 20 ms frames of a 440 Hz tone.
    fn encode_tone(frames: usize) -> Vec<u8> {
        let mut encoder =
            opus::Encoder::new(OPUS_SAMPLE_RATE, opus::Channels::Mono, opus::Application::Audio)
                .unwrap();
        let mut out = Vec::new();
        {
            let mut writer = PacketWriter::new(&mut out);
            writer.write_packet(opus_head(1), 1, PacketWriteEndInfo::EndPage, 0).unwrap();
            writer.write_packet(opus_tags(), 1, PacketWriteEndInfo::EndPage, 0).unwrap();

            let mut packet = vec![0u8; 4000];
            for f in 0..frames {
                let pcm: Vec<i16> = (0..FRAME)
                    .map(|i| {
                        let t = (f * FRAME + i) as f32 / OPUS_SAMPLE_RATE as f32;
                        ((t * 440.0 * std::f32::consts::TAU).sin() * 10000.0) as i16
                    })
                    .collect();
                let len = encoder.encode(&pcm, &mut packet).unwrap();
                let info = if f + 1 == frames {
                    PacketWriteEndInfo::EndStream
                } else {
                    PacketWriteEndInfo::NormalPacket
                };
                writer
                    .write_packet(packet[..len].to_vec(), 1, info, ((f + 1) * FRAME) as u64)
                    .unwrap();
            }
        }
        out
    }

    #[test]
    fn test_decodes_all_frames_minus_pre_skip() {
        let frames = 10;
        let mut source = OpusFileSource::new(Cursor::new(encode_tone(frames))).unwrap();
        let samples = read_all(&mut source).unwrap();

        assert_eq!(samples.len(), frames * FRAME - PRE_SKIP as usize);
        let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak > 1000, "decoded tone is too quiet: peak {}", peak);
    }

    #[test]
    fn test_reads_in_small_chunks() {
        let mut source = OpusFileSource::new(Cursor::new(encode_tone(3))).unwrap();
        let mut buf = [0i16; 100];
        let mut total = 0;
        loop {
            let status = source.read(&mut buf).unwrap();
            assert!(status.len() <= buf.len());
            total += status.len();
            if status.is_end() {
                break;
            }
        }
        assert_eq!(total, 3 * FRAME - PRE_SKIP as usize);
    }

    #[test]
    fn test_close_ends_stream() {
        let mut source = OpusFileSource::new(Cursor::new(encode_tone(3))).unwrap();
        source.close();
        let mut buf = [0i16; 100];
        assert_eq!(source.read(&mut buf).unwrap(), ReadStatus::End(0));
    }

    #[test]
    fn test_rejects_non_opus_stream() {
        let mut out = Vec::new();
        {
            let mut writer = PacketWriter::new(&mut out);
            writer
                .write_packet(b"\x01vorbis-header".to_vec(), 7, PacketWriteEndInfo::EndStream, 0)
                .unwrap();
        }
        assert!(matches!(
            OpusFileSource::new(Cursor::new(out)),
            Err(AudioError::Decode(_))
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        let garbage = vec![0x42u8; 64];
        assert!(matches!(
            OpusFileSource::new(Cursor::new(garbage)),
            Err(AudioError::Decode(_))
        ));
    }

    #[test]
    fn test_parse_head() {
        assert_eq!(parse_head(&opus_head(2)).unwrap(), (2, PRE_SKIP as usize));
        assert!(parse_head(&opus_head(3)).is_err());
        assert!(parse_head(b"OpusHead").is_err());
    }
}
