//! Audio stream demultiplexer: a length-prefixed packet framing with
//! PTS and flag bits, behind a one-time codec-id prologue.

use scrcpy_codecs::audio::AudioCodecId;

const PTS_CONFIG_BIT: u64 = 1 << 63;
const PTS_KEY_BIT: u64 = 1 << 62;
const PTS_MASK: u64 = (1 << 62) - 1;

#[derive(Debug, Clone, PartialEq)]
pub struct AudioPacket {
    pub pts_us: u64,
    pub is_config: bool,
    pub is_key: bool,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NeedCodecId,
    NeedPacket,
}

pub type CodecIdHandler = Box<dyn FnMut(u32, Option<AudioCodecId>) + Send>;
pub type ConfigPacketHandler = Box<dyn FnMut(&[u8], u32) + Send>;
pub type AudioPacketHandler = Box<dyn FnMut(&AudioPacket) + Send>;

pub struct AudioStreamParser {
    state: State,
    buf: Vec<u8>,
    codec_id: Option<u32>,
    on_codec_id: Option<CodecIdHandler>,
    on_config_packet: Option<ConfigPacketHandler>,
    on_audio_packet: Option<AudioPacketHandler>,
}

impl AudioStreamParser {
    pub fn new() -> Self {
        Self {
            state: State::NeedCodecId,
            buf: Vec::new(),
            codec_id: None,
            on_codec_id: None,
            on_config_packet: None,
            on_audio_packet: None,
        }
    }

    pub fn set_on_codec_id_parsed(&mut self, handler: CodecIdHandler) {
        self.on_codec_id = Some(handler);
    }

    pub fn set_on_config_packet(&mut self, handler: ConfigPacketHandler) {
        self.on_config_packet = Some(handler);
    }

    pub fn set_on_audio_packet(&mut self, handler: AudioPacketHandler) {
        self.on_audio_packet = Some(handler);
    }

    pub fn codec_id(&self) -> Option<u32> {
        self.codec_id
    }

    /// Clears buffered bytes and the codec id, requiring a fresh
    /// codec-id prologue on the next `append`. Handlers are kept.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.codec_id = None;
        self.state = State::NeedCodecId;
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        loop {
            match self.state {
                State::NeedCodecId => {
                    if self.buf.len() < 4 {
                        return;
                    }
                    let id = u32::from_be_bytes(self.buf[0..4].try_into().unwrap());
                    self.buf.drain(0..4);
                    self.codec_id = Some(id);
                    if let Some(handler) = self.on_codec_id.as_mut() {
                        handler(id, AudioCodecId::from_fourcc(id));
                    }
                    self.state = State::NeedPacket;
                }
                State::NeedPacket => {
                    if self.buf.len() < 12 {
                        return;
                    }
                    let pts_and_flags = u64::from_be_bytes(self.buf[0..8].try_into().unwrap());
                    let size = u32::from_be_bytes(self.buf[8..12].try_into().unwrap()) as usize;
                    if self.buf.len() < 12 + size {
                        return;
                    }
                    let payload = self.buf[12..12 + size].to_vec();
                    self.buf.drain(0..12 + size);

                    let is_config = pts_and_flags & PTS_CONFIG_BIT != 0;
                    let is_key = pts_and_flags & PTS_KEY_BIT != 0;
                    let pts_us = pts_and_flags & PTS_MASK;

                    if is_config {
                        if let Some(handler) = self.on_config_packet.as_mut() {
                            handler(&payload, self.codec_id.unwrap_or(0));
                        }
                    }
                    let packet = AudioPacket {
                        pts_us,
                        is_config,
                        is_key,
                        payload,
                    };
                    if let Some(handler) = self.on_audio_packet.as_mut() {
                        handler(&packet);
                    }
                }
            }
        }
    }
}

impl Default for AudioStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn encode_packet(pts: u64, is_config: bool, is_key: bool, payload: &[u8]) -> Vec<u8> {
        let mut flags = pts & PTS_MASK;
        if is_config {
            flags |= PTS_CONFIG_BIT;
        }
        if is_key {
            flags |= PTS_KEY_BIT;
        }
        let mut out = Vec::new();
        out.extend_from_slice(&flags.to_be_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn round_trips_codec_id_and_packets() {
        let mut parser = AudioStreamParser::new();
        let received: Arc<Mutex<Vec<AudioPacket>>> = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        parser.set_on_audio_packet(Box::new(move |p| {
            received_clone.lock().unwrap().push(p.clone());
        }));

        let mut stream = b"raw\0".to_vec();
        stream.extend(encode_packet(1000, false, true, &[0x00, 0x00, 0x00, 0x40]));
        stream.extend(encode_packet(2000, false, false, &[0x01, 0x02]));

        parser.append(&stream);
        assert_eq!(parser.codec_id(), Some(0x7261_7700));
        let got = received.lock().unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].pts_us, 1000);
        assert!(got[0].is_key);
        assert_eq!(got[1].payload, vec![0x01, 0x02]);
    }

    #[test]
    fn truncated_suffix_emits_nothing_until_completed() {
        let mut parser = AudioStreamParser::new();
        let count = Arc::new(Mutex::new(0));
        let count_clone = count.clone();
        parser.set_on_audio_packet(Box::new(move |_| {
            *count_clone.lock().unwrap() += 1;
        }));

        let mut stream = b"opus".to_vec();
        stream.extend(encode_packet(0, false, false, &[0xAA; 8]));

        let (head, tail) = stream.split_at(stream.len() - 3);
        parser.append(head);
        assert_eq!(*count.lock().unwrap(), 0);
        parser.append(tail);
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn config_packet_fires_config_handler() {
        let mut parser = AudioStreamParser::new();
        let config_seen = Arc::new(Mutex::new(false));
        let config_seen_clone = config_seen.clone();
        parser.set_on_config_packet(Box::new(move |_bytes, _codec| {
            *config_seen_clone.lock().unwrap() = true;
        }));

        let mut stream = b"aac\0".to_vec();
        stream.extend(encode_packet(0, true, false, &[0x11, 0x90]));
        parser.append(&stream);
        assert!(*config_seen.lock().unwrap());
    }
}
