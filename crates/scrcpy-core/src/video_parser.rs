//! Incremental video elementary-stream parser.
//!
//! Supports two wire shapes, chosen once per session (see DESIGN.md):
//! Annex-B start-code delimited NAL units, or scrcpy's per-packet
//! metadata framing (the same 12-byte header shape used by the audio
//! stream) wrapping one complete NAL per packet.

use tracing::{debug, warn};

use scrcpy_codecs::{classify_nal, NalKind, NalUnit};
use scrcpy_common::config::VideoCodecKind;
pub use scrcpy_common::config::VideoFraming;

const START_CODE_3: [u8; 3] = [0x00, 0x00, 0x01];

pub type SpsChangedHandler = Box<dyn FnMut(&[u8]) + Send>;

pub struct VideoStreamParser {
    codec: VideoCodecKind,
    framing: VideoFraming,
    buf: Vec<u8>,
    vps: Option<Vec<u8>>,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    on_sps_changed: Option<SpsChangedHandler>,
}

impl VideoStreamParser {
    pub fn new(codec: VideoCodecKind, framing: VideoFraming) -> Self {
        Self {
            codec,
            framing,
            buf: Vec::new(),
            vps: None,
            sps: None,
            pps: None,
            on_sps_changed: None,
        }
    }

    pub fn set_on_sps_changed(&mut self, handler: SpsChangedHandler) {
        self.on_sps_changed = Some(handler);
    }

    pub fn has_complete_parameter_sets(&self) -> bool {
        match self.codec {
            VideoCodecKind::H264 => self.sps.is_some() && self.pps.is_some(),
            VideoCodecKind::H265 => self.vps.is_some() && self.sps.is_some() && self.pps.is_some(),
        }
    }

    pub fn sps(&self) -> Option<&[u8]> {
        self.sps.as_deref()
    }

    pub fn pps(&self) -> Option<&[u8]> {
        self.pps.as_deref()
    }

    pub fn vps(&self) -> Option<&[u8]> {
        self.vps.as_deref()
    }

    /// Clears the byte buffer and parameter-set cache; keeps codec/framing.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.vps = None;
        self.sps = None;
        self.pps = None;
    }

    pub fn append(&mut self, bytes: &[u8]) -> Vec<NalUnit> {
        self.buf.extend_from_slice(bytes);
        match self.framing {
            VideoFraming::AnnexB => self.drain_annex_b(),
            VideoFraming::MetadataFramed => self.drain_metadata_framed(),
        }
    }

    fn drain_annex_b(&mut self) -> Vec<NalUnit> {
        let mut out = Vec::new();
        let starts = find_start_codes(&self.buf);
        if starts.len() < 2 {
            return out;
        }
        // The last start code might begin a NAL we haven't fully received
        // yet, so only NALs bounded on both sides are emitted.
        for window in starts.windows(2) {
            let (start, start_len) = window[0];
            let (next_start, _) = window[1];
            let payload_start = start + start_len;
            let payload = &self.buf[payload_start..next_start];
            if let Some(unit) = self.classify_and_track(payload) {
                out.push(unit);
            }
        }
        let (last_start, _) = starts[starts.len() - 1];
        self.buf.drain(0..last_start);
        out
    }

    fn drain_metadata_framed(&mut self) -> Vec<NalUnit> {
        const MAX_SANE_PACKET: usize = 64 * 1024 * 1024;
        let mut out = Vec::new();
        loop {
            if self.buf.len() < 12 {
                break;
            }
            let size = u32::from_be_bytes(self.buf[8..12].try_into().unwrap()) as usize;
            if size > MAX_SANE_PACKET {
                warn!(size, "implausible video packet size, dropping a byte to resync");
                self.buf.drain(0..1);
                continue;
            }
            if self.buf.len() < 12 + size {
                break;
            }
            let payload = self.buf[12..12 + size].to_vec();
            if let Some(unit) = self.classify_and_track(&payload) {
                out.push(unit);
            }
            self.buf.drain(0..12 + size);
        }
        out
    }

    fn classify_and_track(&mut self, payload: &[u8]) -> Option<NalUnit> {
        if payload.is_empty() {
            return None;
        }
        let kind = classify_nal(self.codec, payload);
        match kind {
            NalKind::Sps => {
                let changed = self.sps.as_deref() != Some(payload);
                if changed {
                    self.sps = Some(payload.to_vec());
                    debug!(len = payload.len(), "SPS stored");
                    if let Some(handler) = self.on_sps_changed.as_mut() {
                        handler(payload);
                    }
                }
            }
            NalKind::Pps => {
                self.pps = Some(payload.to_vec());
            }
            NalKind::Vps => {
                self.vps = Some(payload.to_vec());
            }
            NalKind::Vcl | NalKind::Other => {}
        }
        Some(NalUnit {
            kind,
            data: payload.to_vec(),
        })
    }
}

/// Returns `(offset_of_start_code, start_code_len)` for every Annex-B
/// start code (`00 00 01` or `00 00 00 01`) found in `buf`, in order.
fn find_start_codes(buf: &[u8]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i + 3 <= buf.len() {
        if buf[i..i + 3] == START_CODE_3 {
            if i > 0 && buf[i - 1] == 0x00 {
                out.push((i - 1, 4));
            } else {
                out.push((i, 3));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annex_b(nal: &[u8]) -> Vec<u8> {
        let mut v = vec![0x00, 0x00, 0x00, 0x01];
        v.extend_from_slice(nal);
        v
    }

    #[test]
    fn assembles_sps_pps_vcl_across_arbitrary_splits() {
        let mut parser = VideoStreamParser::new(VideoCodecKind::H264, VideoFraming::AnnexB);
        let sps = annex_b(&[0x67, 0x42, 0x00, 0x1e]);
        let pps = annex_b(&[0x68, 0xce, 0x3c, 0x80]);
        let vcl = annex_b(&[0x65, 0x88, 0x84]);

        let mut stream = Vec::new();
        stream.extend_from_slice(&sps);
        stream.extend_from_slice(&pps);
        stream.extend_from_slice(&vcl);

        // split arbitrarily across three appends
        let (a, rest) = stream.split_at(3);
        let (b, c) = rest.split_at(stream.len() - 3 - 5);

        let mut units = parser.append(a);
        units.extend(parser.append(b));
        units.extend(parser.append(c));

        assert!(parser.has_complete_parameter_sets());
        let vcl_units: Vec<_> = units.iter().filter(|u| u.kind == NalKind::Vcl).collect();
        assert_eq!(vcl_units.len(), 1);
    }

    #[test]
    fn sps_change_fires_once_and_updates_cache() {
        let mut parser = VideoStreamParser::new(VideoCodecKind::H264, VideoFraming::AnnexB);
        let fired = std::sync::Arc::new(std::sync::Mutex::new(0));
        let fired_clone = fired.clone();
        parser.set_on_sps_changed(Box::new(move |_| {
            *fired_clone.lock().unwrap() += 1;
        }));

        let sps1 = annex_b(&[0x67, 0x01]);
        let sps2 = annex_b(&[0x67, 0x02]);
        let pps = annex_b(&[0x68, 0x00]);
        let vcl = annex_b(&[0x65, 0x00]);

        let mut stream = Vec::new();
        stream.extend_from_slice(&sps1);
        stream.extend_from_slice(&pps);
        stream.extend_from_slice(&vcl);
        stream.extend_from_slice(&sps2);
        stream.extend_from_slice(&pps);
        stream.extend_from_slice(&vcl);
        stream.extend_from_slice(&annex_b(&[0x09])); // trailing AUD to flush last VCL

        parser.append(&stream);
        assert_eq!(*fired.lock().unwrap(), 1);
        assert_eq!(parser.sps(), Some(&[0x67, 0x02][..]));
    }

    #[test]
    fn metadata_framed_mode_consumes_whole_packets() {
        let mut parser = VideoStreamParser::new(VideoCodecKind::H264, VideoFraming::MetadataFramed);
        let mut packet = Vec::new();
        packet.extend_from_slice(&0u64.to_be_bytes());
        let nal = [0x67, 0x42];
        packet.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        packet.extend_from_slice(&nal);

        let units = parser.append(&packet[..packet.len() - 1]);
        assert!(units.is_empty());
        let units = parser.append(&packet[packet.len() - 1..]);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].kind, NalKind::Sps);
    }
}
