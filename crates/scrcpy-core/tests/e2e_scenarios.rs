//! Cross-component scenarios from the component test plan: each test wires
//! together at least two modules the way `ScrcpySession` does internally,
//! rather than exercising a single module in isolation. Scenarios 4
//! (audio discontinuity), 5 (regulator overflow), and 6 (forward dial
//! ordering) are covered at the unit level alongside the module they
//! belong to; they are single-component and don't need a second pass here.

use std::sync::{Arc, Mutex};

use scrcpy_codecs::audio::{AudioDecoder, RawAudioDecoder};
use scrcpy_codecs::video::{SoftwareVideoDecoder, VideoDecoder};
use scrcpy_common::config::VideoCodecKind;

use scrcpy_core::audio_parser::AudioStreamParser;
use scrcpy_core::frame_pipeline::{immediate_scheduler, FramePipeline};
use scrcpy_core::regulator::AudioRegulator;
use scrcpy_core::video_parser::{VideoFraming, VideoStreamParser};

fn annex_b(nal: &[u8]) -> Vec<u8> {
    let mut v = vec![0x00, 0x00, 0x00, 0x01];
    v.extend_from_slice(nal);
    v
}

fn audio_packet(pts: u64, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&pts.to_be_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Scenario 1: codec-id-only prologue plus three RAW packets feeds a
/// `RawAudioDecoder` through an `AudioStreamParser`, landing in the
/// regulator as Float32 PCM.
#[test]
fn raw_codec_round_trip_lands_in_regulator() {
    let mut parser = AudioStreamParser::new();
    let decoder = Arc::new(Mutex::new(RawAudioDecoder::new()));
    decoder.lock().unwrap().initialize(48_000, 2).unwrap();

    let regulator = Arc::new(Mutex::new(AudioRegulator::new(2, 48_000)));
    let regulator_for_handler = regulator.clone();
    decoder.lock().unwrap().set_audio_handler(Box::new(move |frame| {
        regulator_for_handler.lock().unwrap().push(&frame.pcm);
    }));

    let decoder_for_packets = decoder.clone();
    parser.set_on_audio_packet(Box::new(move |packet| {
        decoder_for_packets
            .lock()
            .unwrap()
            .decode(&packet.payload, packet.pts_us, packet.is_key)
            .unwrap();
    }));

    let seen_codec_id = Arc::new(Mutex::new(None));
    let seen_codec_id_clone = seen_codec_id.clone();
    parser.set_on_codec_id_parsed(Box::new(move |id, _kind| {
        *seen_codec_id_clone.lock().unwrap() = Some(id);
    }));

    let mut stream = b"raw\0".to_vec();
    for k in 0..3u64 {
        stream.extend(audio_packet(k * 1000, &[0x00, 0x00, 0x00, 0x40]));
    }
    parser.append(&stream);

    assert_eq!(*seen_codec_id.lock().unwrap(), Some(0x7261_7700));
    assert_eq!(regulator.lock().unwrap().pushed_samples(), 6); // 3 packets x 2 samples
}

/// Scenario 2: SPS/PPS/VCL arriving across arbitrary split boundaries
/// produces a ready decoder and exactly one delivered VCL decode.
#[test]
fn video_nal_assembly_initializes_decoder_and_decodes_vcl() {
    let mut parser = VideoStreamParser::new(VideoCodecKind::H264, VideoFraming::AnnexB);
    let mut decoder = SoftwareVideoDecoder::new();

    let decoded_count = Arc::new(Mutex::new(0usize));
    let decoded_count_clone = decoded_count.clone();
    decoder.set_frame_handler(Box::new(move |_frame| {
        *decoded_count_clone.lock().unwrap() += 1;
    }));

    let sps = annex_b(&[0x67, 0x42, 0x00, 0x1e]);
    let pps = annex_b(&[0x68, 0xce, 0x3c, 0x80]);
    let vcl = annex_b(&[0x65, 0x88, 0x84]);
    let trailer = annex_b(&[0x09]); // flushes the VCL out of the buffer tail

    let mut stream = Vec::new();
    stream.extend_from_slice(&sps);
    stream.extend_from_slice(&pps);
    stream.extend_from_slice(&vcl);
    stream.extend_from_slice(&trailer);

    let (a, rest) = stream.split_at(3);
    let (b, c) = rest.split_at(rest.len() / 2);

    let mut units = parser.append(a);
    units.extend(parser.append(b));
    units.extend(parser.append(c));

    assert!(parser.has_complete_parameter_sets());
    decoder.initialize_h264(parser.sps().unwrap(), parser.pps().unwrap()).unwrap();
    assert!(decoder.is_ready());

    for unit in &units {
        if unit.kind.is_vcl() {
            decoder.decode(unit).unwrap();
        }
    }
    assert_eq!(*decoded_count.lock().unwrap(), 1);
}

/// Scenario 3: a second, different SPS fires the change callback exactly
/// once, and the frame pipeline (stood in for "no pre-rotation frames
/// survive") is empty of any stale skip count after the flush a
/// rotation handler would perform.
#[test]
fn sps_rotation_fires_once_and_pipeline_can_be_flushed() {
    let mut parser = VideoStreamParser::new(VideoCodecKind::H264, VideoFraming::AnnexB);
    let fired = Arc::new(Mutex::new(0));
    let fired_clone = fired.clone();
    parser.set_on_sps_changed(Box::new(move |_| {
        *fired_clone.lock().unwrap() += 1;
    }));

    let sps1 = annex_b(&[0x67, 0x01]);
    let pps = annex_b(&[0x68, 0x00]);
    let vcl = annex_b(&[0x65, 0x00]);
    let sps2 = annex_b(&[0x67, 0x02]);
    let trailer = annex_b(&[0x09]);

    let mut pipeline = FramePipeline::new(immediate_scheduler());
    pipeline.start((1080, 1920));

    let mut stream = Vec::new();
    stream.extend_from_slice(&sps1);
    stream.extend_from_slice(&pps);
    stream.extend_from_slice(&vcl);
    parser.append(&stream);

    // Rotation: a new SPS arrives mid-session.
    let mut rotation = Vec::new();
    rotation.extend_from_slice(&sps2);
    rotation.extend_from_slice(&pps);
    rotation.extend_from_slice(&vcl);
    rotation.extend_from_slice(&trailer);
    parser.append(&rotation);

    assert_eq!(*fired.lock().unwrap(), 1);
    assert_eq!(parser.sps(), Some(&[0x67, 0x02][..]));

    // A rotation handler stops and restarts the pipeline to purge any
    // frame decoded against the stale parameter sets.
    pipeline.stop();
    pipeline.start((1080, 1920));
    assert_eq!(pipeline.skipped_count(), 0);
}
