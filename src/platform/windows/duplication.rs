use anyhow::Context;
use windows::Win32::Graphics::Direct3D11::{ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D};
use windows::Win32::Graphics::Dxgi::{
    DXGI_ERROR_ACCESS_LOST, DXGI_ERROR_MORE_DATA, DXGI_ERROR_WAIT_TIMEOUT,
    DXGI_OUTDUPL_FRAME_INFO, DXGI_OUTDUPL_MOVE_RECT, IDXGIOutput, IDXGIOutput1,
    IDXGIOutputDuplication, IDXGIResource,
};
use windows::Win32::Foundation::RECT;
use windows::core::Interface;

use crate::bridge::CpuSurface;
use crate::error::{DuplicationError, DuplicationResult};
use crate::source::{DuplicationSource, FrameInfo, OutputDescriptor};

use super::monitor::ResolvedOutput;
use super::surface::read_back;

fn map_duplication_error(error: windows::core::Error, what: &'static str) -> DuplicationError {
    let code = error.code();
    if code == DXGI_ERROR_WAIT_TIMEOUT {
        DuplicationError::Timeout
    } else if code == DXGI_ERROR_ACCESS_LOST {
        DuplicationError::AccessLost
    } else if code == DXGI_ERROR_MORE_DATA {
        DuplicationError::BufferOverflow
    } else {
        DuplicationError::Device(anyhow::Error::from(error).context(what))
    }
}

fn create_duplication(
    output: &IDXGIOutput,
    device: &ID3D11Device,
) -> DuplicationResult<IDXGIOutputDuplication> {
    let output1: IDXGIOutput1 = output
        .cast()
        .context("failed to query IDXGIOutput1")
        .map_err(DuplicationError::Device)?;
    unsafe { output1.DuplicateOutput(device) }.map_err(|error| {
        log::error!("DuplicateOutput failed: {error}");
        map_duplication_error(error, "DuplicateOutput failed")
    })
}

fn frame_info(info: &DXGI_OUTDUPL_FRAME_INFO) -> FrameInfo {
    FrameInfo {
        last_present_time: info.LastPresentTime,
        last_mouse_update_time: info.LastMouseUpdateTime,
        accumulated_frames: info.AccumulatedFrames,
        rects_coalesced: info.RectsCoalesced.as_bool(),
        protected_content_masked_out: info.ProtectedContentMaskedOut.as_bool(),
        total_metadata_bytes: info.TotalMetadataBufferSize,
    }
}

/// Desktop duplication of one output, created on the device of the adapter
/// that output is attached to.
pub struct DxgiDuplicationSource {
    duplication: IDXGIOutputDuplication,
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    descriptor: OutputDescriptor,
    readback_staging: Option<ID3D11Texture2D>,
}

impl DxgiDuplicationSource {
    pub(crate) fn new(
        resolved: &ResolvedOutput,
        device: ID3D11Device,
        context: ID3D11DeviceContext,
    ) -> DuplicationResult<Self> {
        let duplication = create_duplication(&resolved.output, &device)?;
        Ok(Self {
            duplication,
            device,
            context,
            descriptor: resolved.descriptor.clone(),
            readback_staging: None,
        })
    }
}

impl DuplicationSource for DxgiDuplicationSource {
    type Texture = ID3D11Texture2D;

    fn output(&self) -> &OutputDescriptor {
        &self.descriptor
    }

    fn acquire_next_frame(
        &mut self,
        timeout_ms: u32,
    ) -> DuplicationResult<(ID3D11Texture2D, FrameInfo)> {
        let mut info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource: Option<IDXGIResource> = None;
        unsafe {
            self.duplication
                .AcquireNextFrame(timeout_ms, &mut info, &mut resource)
        }
        .map_err(|error| map_duplication_error(error, "AcquireNextFrame failed"))?;

        let Some(resource) = resource else {
            unsafe { self.duplication.ReleaseFrame() }.ok();
            return Err(DuplicationError::Timeout);
        };

        let texture: ID3D11Texture2D = match resource.cast() {
            Ok(texture) => texture,
            Err(error) => {
                unsafe { self.duplication.ReleaseFrame() }.ok();
                return Err(DuplicationError::Device(anyhow::Error::from(error).context(
                    "failed to cast acquired IDXGIResource to ID3D11Texture2D",
                )));
            }
        };
        Ok((texture, frame_info(&info)))
    }

    fn release_frame(&mut self) -> DuplicationResult<()> {
        unsafe { self.duplication.ReleaseFrame() }
            .map_err(|error| map_duplication_error(error, "ReleaseFrame failed"))
    }

    fn frame_move_rects(&mut self, buffer: &mut [u8]) -> DuplicationResult<usize> {
        let capacity = u32::try_from(buffer.len()).map_err(|_| DuplicationError::BufferOverflow)?;
        let mut required = 0u32;
        unsafe {
            self.duplication.GetFrameMoveRects(
                capacity,
                buffer.as_mut_ptr().cast::<DXGI_OUTDUPL_MOVE_RECT>(),
                &mut required,
            )
        }
        .map_err(|error| map_duplication_error(error, "GetFrameMoveRects failed"))?;
        Ok(required as usize)
    }

    fn frame_dirty_rects(&mut self, buffer: &mut [u8]) -> DuplicationResult<usize> {
        let capacity = u32::try_from(buffer.len()).map_err(|_| DuplicationError::BufferOverflow)?;
        let mut required = 0u32;
        unsafe {
            self.duplication.GetFrameDirtyRects(
                capacity,
                buffer.as_mut_ptr().cast::<RECT>(),
                &mut required,
            )
        }
        .map_err(|error| map_duplication_error(error, "GetFrameDirtyRects failed"))?;
        Ok(required as usize)
    }

    fn read_pixels(&mut self, texture: &ID3D11Texture2D) -> DuplicationResult<CpuSurface> {
        read_back(
            &self.device,
            &self.context,
            &mut self.readback_staging,
            texture,
        )
    }
}
