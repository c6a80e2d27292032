//! macOS `VideoDecoder` backed by VideoToolbox's `VTDecompressionSession`.
//!
//! Decodes H.264/HEVC Annex-B NAL units into NV12 frames. Parameter sets
//! are buffered until the full set required by the codec is present, then
//! used to build a `CMVideoFormatDescription` and a decompression session.

use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use core::ffi::c_int;
use objc2_core_media::{CMBlockBuffer, CMSampleBuffer, CMTime, CMTimeFlags, CMVideoFormatDescription};
use objc2_core_video::CVBuffer;
use objc2_video_toolbox::{
    VTDecodeInfoFlags, VTDecompressionOutputCallbackRecord, VTDecompressionSession,
    VTDecompressionSessionCreate, VTDecompressionSessionDecodeFrame,
};
use tracing::warn;

use scrcpy_common::error::{Error, Result};

use crate::video::{DecodedVideoFrame, FrameHandler, PixelFormat, VideoDecoder};
use crate::{classify_nal, NalKind, NalUnit};
use scrcpy_common::config::VideoCodecKind;

type OSStatus = i32;

#[link(name = "CoreMedia", kind = "framework")]
unsafe extern "C" {
    fn CMVideoFormatDescriptionCreateFromH264ParameterSets(
        allocator: *const c_void,
        parameter_set_count: usize,
        parameter_set_pointers: *const *const u8,
        parameter_set_sizes: *const usize,
        nal_unit_header_length: c_int,
        format_description_out: *mut *mut CMVideoFormatDescription,
    ) -> OSStatus;

    fn CMVideoFormatDescriptionCreateFromHEVCParameterSets(
        allocator: *const c_void,
        parameter_set_count: usize,
        parameter_set_pointers: *const *const u8,
        parameter_set_sizes: *const usize,
        nal_unit_header_length: c_int,
        extensions: *const c_void,
        format_description_out: *mut *mut CMVideoFormatDescription,
    ) -> OSStatus;

    fn CMBlockBufferCreateWithMemoryBlock(
        allocator: *const c_void,
        memory_block: *mut c_void,
        block_length: usize,
        block_allocator: *const c_void,
        custom_block_source: *const c_void,
        offset_to_data: usize,
        data_length: usize,
        flags: u32,
        block_buffer_out: *mut *mut CMBlockBuffer,
    ) -> OSStatus;

    fn CMSampleBufferCreateReady(
        allocator: *const c_void,
        data_buffer: *mut CMBlockBuffer,
        format_description: *mut CMVideoFormatDescription,
        num_samples: i32,
        num_sample_timing_entries: i32,
        sample_timing_array: *const c_void,
        num_sample_size_entries: i32,
        sample_size_array: *const usize,
        sample_buffer_out: *mut *mut CMSampleBuffer,
    ) -> OSStatus;

    fn CFRelease(cf: *const c_void);
    fn VTDecompressionSessionInvalidate(session: *mut VTDecompressionSession);

    fn CVPixelBufferLockBaseAddress(pixel_buffer: *mut CVBuffer, lock_flags: u64) -> OSStatus;
    fn CVPixelBufferUnlockBaseAddress(pixel_buffer: *mut CVBuffer, lock_flags: u64) -> OSStatus;
    fn CVPixelBufferGetWidthOfPlane(pixel_buffer: *mut CVBuffer, plane_index: usize) -> usize;
    fn CVPixelBufferGetHeightOfPlane(pixel_buffer: *mut CVBuffer, plane_index: usize) -> usize;
    fn CVPixelBufferGetBytesPerRowOfPlane(pixel_buffer: *mut CVBuffer, plane_index: usize) -> usize;
    fn CVPixelBufferGetBaseAddressOfPlane(
        pixel_buffer: *mut CVBuffer,
        plane_index: usize,
    ) -> *mut c_void;
    fn CVPixelBufferGetPlaneCount(pixel_buffer: *mut CVBuffer) -> usize;
}

const K_VT_DECODE_FRAME_ENABLE_ASYNC_DECOMPRESSION: u32 = 1 << 0;

/// State shared between `MacVideoDecoder` and the VideoToolbox output
/// callback, which fires on an internal VideoToolbox thread.
struct Shared {
    handler: Option<FrameHandler>,
}

unsafe extern "C-unwind" fn decompression_callback(
    decompression_output_ref_con: *mut c_void,
    _source_frame_ref_con: *mut c_void,
    status: OSStatus,
    _info_flags: VTDecodeInfoFlags,
    image_buffer: *mut CVBuffer,
    presentation_time_stamp: CMTime,
    _presentation_duration: CMTime,
) {
    if status != 0 || image_buffer.is_null() {
        if status != 0 {
            warn!("VideoToolbox decompression callback error: {}", status);
        }
        return;
    }
    let _ = presentation_time_stamp;

    let shared_ptr = decompression_output_ref_con as *mut Mutex<Shared>;
    if shared_ptr.is_null() {
        return;
    }
    let shared = unsafe { &*shared_ptr };

    let Some(frame) = copy_nv12(image_buffer) else {
        return;
    };

    let mut guard = shared.lock().unwrap();
    if let Some(handler) = guard.handler.as_mut() {
        handler(frame);
    }
}

/// Copy the Y and interleaved-UV planes of an NV12 `CVPixelBuffer` out into
/// owned memory so the frame can cross thread boundaries as plain data.
unsafe fn copy_nv12(pixel_buffer: *mut CVBuffer) -> Option<DecodedVideoFrame> {
    const READ_ONLY: u64 = 1;
    if unsafe { CVPixelBufferLockBaseAddress(pixel_buffer, READ_ONLY) } != 0 {
        return None;
    }

    let plane_count = unsafe { CVPixelBufferGetPlaneCount(pixel_buffer) };
    if plane_count < 2 {
        unsafe { CVPixelBufferUnlockBaseAddress(pixel_buffer, READ_ONLY) };
        return None;
    }

    let y_width = unsafe { CVPixelBufferGetWidthOfPlane(pixel_buffer, 0) };
    let y_height = unsafe { CVPixelBufferGetHeightOfPlane(pixel_buffer, 0) };
    let y_stride = unsafe { CVPixelBufferGetBytesPerRowOfPlane(pixel_buffer, 0) };
    let uv_height = unsafe { CVPixelBufferGetHeightOfPlane(pixel_buffer, 1) };
    let uv_stride = unsafe { CVPixelBufferGetBytesPerRowOfPlane(pixel_buffer, 1) };

    let y_base = unsafe { CVPixelBufferGetBaseAddressOfPlane(pixel_buffer, 0) } as *const u8;
    let uv_base = unsafe { CVPixelBufferGetBaseAddressOfPlane(pixel_buffer, 1) } as *const u8;
    if y_base.is_null() || uv_base.is_null() {
        unsafe { CVPixelBufferUnlockBaseAddress(pixel_buffer, READ_ONLY) };
        return None;
    }

    let mut planes = Vec::with_capacity(y_stride * y_height + uv_stride * uv_height);
    unsafe {
        planes.extend_from_slice(std::slice::from_raw_parts(y_base, y_stride * y_height));
        planes.extend_from_slice(std::slice::from_raw_parts(uv_base, uv_stride * uv_height));
        CVPixelBufferUnlockBaseAddress(pixel_buffer, READ_ONLY);
    }

    Some(DecodedVideoFrame {
        width: y_width as u16,
        height: y_height as u16,
        format: PixelFormat::Nv12,
        presentation: Instant::now(),
        planes,
        y_stride: y_stride as u32,
    })
}

pub struct MacVideoDecoder {
    codec: VideoCodecKind,
    session: *mut VTDecompressionSession,
    format_desc: *mut CMVideoFormatDescription,
    shared: Arc<Mutex<Shared>>,

    vps: Option<Vec<u8>>,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

// The raw VideoToolbox handles are only ever touched from the network
// worker; the output callback only touches `shared`, which is `Mutex`-guarded.
unsafe impl Send for MacVideoDecoder {}

impl MacVideoDecoder {
    pub fn new(codec: VideoCodecKind) -> Self {
        Self {
            codec,
            session: std::ptr::null_mut(),
            format_desc: std::ptr::null_mut(),
            shared: Arc::new(Mutex::new(Shared { handler: None })),
            vps: None,
            sps: None,
            pps: None,
        }
    }

    fn teardown(&mut self) {
        unsafe {
            if !self.session.is_null() {
                VTDecompressionSessionInvalidate(self.session);
                CFRelease(self.session as *const c_void);
                self.session = std::ptr::null_mut();
            }
            if !self.format_desc.is_null() {
                CFRelease(self.format_desc as *const c_void);
                self.format_desc = std::ptr::null_mut();
            }
        }
    }

    fn build_h264_format(&mut self) -> Result<()> {
        let sps = self.sps.as_ref().ok_or_else(|| Error::decode_failed("missing SPS"))?;
        let pps = self.pps.as_ref().ok_or_else(|| Error::decode_failed("missing PPS"))?;
        let ptrs: [*const u8; 2] = [sps.as_ptr(), pps.as_ptr()];
        let sizes: [usize; 2] = [sps.len(), pps.len()];
        let mut format_desc: *mut CMVideoFormatDescription = std::ptr::null_mut();
        let status = unsafe {
            CMVideoFormatDescriptionCreateFromH264ParameterSets(
                std::ptr::null(),
                2,
                ptrs.as_ptr(),
                sizes.as_ptr(),
                4,
                &mut format_desc,
            )
        };
        if status != 0 || format_desc.is_null() {
            return Err(Error::decode_failed(format!(
                "CMVideoFormatDescriptionCreateFromH264ParameterSets failed: {status}"
            )));
        }
        self.format_desc = format_desc;
        Ok(())
    }

    fn build_h265_format(&mut self) -> Result<()> {
        let vps = self.vps.as_ref().ok_or_else(|| Error::decode_failed("missing VPS"))?;
        let sps = self.sps.as_ref().ok_or_else(|| Error::decode_failed("missing SPS"))?;
        let pps = self.pps.as_ref().ok_or_else(|| Error::decode_failed("missing PPS"))?;
        let ptrs: [*const u8; 3] = [vps.as_ptr(), sps.as_ptr(), pps.as_ptr()];
        let sizes: [usize; 3] = [vps.len(), sps.len(), pps.len()];
        let mut format_desc: *mut CMVideoFormatDescription = std::ptr::null_mut();
        let status = unsafe {
            CMVideoFormatDescriptionCreateFromHEVCParameterSets(
                std::ptr::null(),
                3,
                ptrs.as_ptr(),
                sizes.as_ptr(),
                4,
                std::ptr::null(),
                &mut format_desc,
            )
        };
        if status != 0 || format_desc.is_null() {
            return Err(Error::decode_failed(format!(
                "CMVideoFormatDescriptionCreateFromHEVCParameterSets failed: {status}"
            )));
        }
        self.format_desc = format_desc;
        Ok(())
    }

    fn create_session(&mut self) -> Result<()> {
        if self.format_desc.is_null() {
            return Err(Error::decode_failed("no format description"));
        }
        if !self.session.is_null() {
            unsafe {
                VTDecompressionSessionInvalidate(self.session);
                CFRelease(self.session as *const c_void);
            }
            self.session = std::ptr::null_mut();
        }

        let record = VTDecompressionOutputCallbackRecord {
            decompressionOutputCallback: Some(decompression_callback),
            decompressionOutputRefCon: Arc::as_ptr(&self.shared) as *mut c_void,
        };

        let mut session: *mut VTDecompressionSession = std::ptr::null_mut();
        let status = unsafe {
            VTDecompressionSessionCreate(
                None,
                &*(self.format_desc as *const _),
                None,
                None,
                &record as *const _,
                NonNull::new(&mut session).ok_or_else(|| Error::decode_failed("null session slot"))?,
            )
        };
        if status != 0 || session.is_null() {
            return Err(Error::decode_failed(format!(
                "VTDecompressionSessionCreate failed: {status}"
            )));
        }
        self.session = session;
        Ok(())
    }

    /// Wrap one Annex-B NAL payload (start code stripped) in an AVCC-framed
    /// `CMBlockBuffer`/`CMSampleBuffer` pair and submit it for decode.
    fn submit(&mut self, nal_payload: &[u8]) -> Result<()> {
        if self.session.is_null() {
            return Err(Error::decode_failed("decoder not initialized"));
        }

        let mut framed = Vec::with_capacity(4 + nal_payload.len());
        framed.extend_from_slice(&(nal_payload.len() as u32).to_be_bytes());
        framed.extend_from_slice(nal_payload);

        let mut block_buffer: *mut CMBlockBuffer = std::ptr::null_mut();
        let len = framed.len();
        let leaked = framed.into_boxed_slice();
        let ptr = Box::into_raw(leaked) as *mut c_void;

        let status = unsafe {
            CMBlockBufferCreateWithMemoryBlock(
                std::ptr::null(),
                ptr,
                len,
                std::ptr::null(),
                std::ptr::null(),
                0,
                len,
                0,
                &mut block_buffer,
            )
        };
        if status != 0 || block_buffer.is_null() {
            unsafe { drop(Box::from_raw(ptr as *mut [u8])) };
            return Err(Error::decode_failed(format!(
                "CMBlockBufferCreateWithMemoryBlock failed: {status}"
            )));
        }

        let mut sample_buffer: *mut CMSampleBuffer = std::ptr::null_mut();
        let sample_sizes = [len];
        let status = unsafe {
            CMSampleBufferCreateReady(
                std::ptr::null(),
                block_buffer,
                self.format_desc,
                1,
                0,
                std::ptr::null(),
                1,
                sample_sizes.as_ptr(),
                &mut sample_buffer,
            )
        };
        if status != 0 || sample_buffer.is_null() {
            unsafe { CFRelease(block_buffer as *const c_void) };
            return Err(Error::decode_failed(format!(
                "CMSampleBufferCreateReady failed: {status}"
            )));
        }

        let mut info_flags: u32 = 0;
        let status = unsafe {
            VTDecompressionSessionDecodeFrame(
                self.session,
                sample_buffer,
                K_VT_DECODE_FRAME_ENABLE_ASYNC_DECOMPRESSION,
                std::ptr::null_mut(),
                &mut info_flags,
            )
        };

        unsafe {
            CFRelease(sample_buffer as *const c_void);
            CFRelease(block_buffer as *const c_void);
        }

        if status != 0 {
            return Err(Error::decode_failed(format!(
                "VTDecompressionSessionDecodeFrame failed: {status}"
            )));
        }
        Ok(())
    }
}

impl Drop for MacVideoDecoder {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl VideoDecoder for MacVideoDecoder {
    fn initialize_h264(&mut self, sps: &[u8], pps: &[u8]) -> Result<()> {
        self.codec = VideoCodecKind::H264;
        self.sps = Some(sps.to_vec());
        self.pps = Some(pps.to_vec());
        self.teardown();
        self.build_h264_format()?;
        self.create_session()
    }

    fn initialize_h265(&mut self, vps: &[u8], sps: &[u8], pps: &[u8]) -> Result<()> {
        self.codec = VideoCodecKind::H265;
        self.vps = Some(vps.to_vec());
        self.sps = Some(sps.to_vec());
        self.pps = Some(pps.to_vec());
        self.teardown();
        self.build_h265_format()?;
        self.create_session()
    }

    fn is_ready(&self) -> bool {
        !self.session.is_null()
    }

    fn decode(&mut self, nal: &NalUnit) -> Result<()> {
        if !self.is_ready() {
            return Err(Error::decode_failed("decoder not initialized"));
        }
        if classify_nal(self.codec, &nal.data).is_parameter_set() {
            return Ok(());
        }
        if nal.kind != NalKind::Vcl {
            return Ok(());
        }
        self.submit(&nal.data)
    }

    fn reset(&mut self) {
        self.teardown();
        self.vps = None;
        self.sps = None;
        self.pps = None;
    }

    fn set_frame_handler(&mut self, handler: FrameHandler) {
        self.shared.lock().unwrap().handler = Some(handler);
    }
}
