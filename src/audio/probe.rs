//! Ogg/Opus duration probe
//!
//! Reads the Opus identification header for the pre-skip and takes the last
//! page granule position as the end of the stream. Opus granules always
//! count 48 kHz samples regardless of the input rate.

use ogg::reading::{OggReadError, PacketReader};
use std::io::Cursor;
use std::time::Duration;
use thiserror::Error;

const OPUS_GRANULE_RATE: f64 = 48_000.0;
const OPUS_HEAD_MAGIC: &[u8] = b"OpusHead";
const OPUS_HEAD_MIN_LEN: usize = 19;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Ogg error: {0}")]
    Ogg(#[from] OggReadError),
    #[error("Stream is empty")]
    Empty,
    #[error("Not an Opus stream")]
    NotOpus,
}

/// Playback duration of an Ogg/Opus clip, or None if no audio page was found
pub fn opus_duration(bytes: &[u8]) -> Result<Option<Duration>, ProbeError> {
    let mut reader = PacketReader::new(Cursor::new(bytes));

    let head = reader.read_packet()?.ok_or(ProbeError::Empty)?;
    if head.data.len() < OPUS_HEAD_MIN_LEN || !head.data.starts_with(OPUS_HEAD_MAGIC) {
        return Err(ProbeError::NotOpus);
    }
    let pre_skip = u64::from(u16::from_le_bytes([head.data[10], head.data[11]]));
    let serial = head.stream_serial();

    let mut last_granule: Option<u64> = None;
    while let Some(packet) = reader.read_packet()? {
        if packet.stream_serial() != serial {
            continue;
        }
        // All ones means no packet finishes on this page
        let granule = packet.absgp_page();
        if granule != u64::MAX && granule > 0 {
            last_granule = Some(last_granule.map_or(granule, |g| g.max(granule)));
        }
    }

    Ok(last_granule.map(|granule| {
        Duration::from_secs_f64(granule.saturating_sub(pre_skip) as f64 / OPUS_GRANULE_RATE)
    }))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use ogg::writing::{PacketWriteEndInfo, PacketWriter};

    pub const PRE_SKIP: u16 = 312;

    /// Minimal mono Ogg/Opus stream lasting `millis`
    pub fn opus_clip(millis: u64) -> Vec<u8> {
        let mut head = b"OpusHead".to_vec();
        head.push(1);
        head.push(1);
        head.extend_from_slice(&PRE_SKIP.to_le_bytes());
        head.extend_from_slice(&48_000u32.to_le_bytes());
        head.extend_from_slice(&0i16.to_le_bytes());
        head.push(0);

        let mut tags = b"OpusTags".to_vec();
        tags.extend_from_slice(&0u32.to_le_bytes());
        tags.extend_from_slice(&0u32.to_le_bytes());

        let mut bytes = Vec::new();
        {
            let mut writer = PacketWriter::new(&mut bytes);
            writer
                .write_packet(head, 7, PacketWriteEndInfo::EndPage, 0)
                .unwrap();
            writer
                .write_packet(tags, 7, PacketWriteEndInfo::EndPage, 0)
                .unwrap();
            let granule = u64::from(PRE_SKIP) + millis * 48;
            writer
                .write_packet(vec![0xfc, 0xff, 0xfe], 7, PacketWriteEndInfo::EndStream, granule)
                .unwrap();
        }
        bytes
    }
}
