use anyhow::Context;
use windows::Win32::Graphics::Direct3D11::{
    D3D11_CPU_ACCESS_READ, D3D11_MAP_READ, D3D11_MAPPED_SUBRESOURCE, D3D11_TEXTURE2D_DESC,
    D3D11_USAGE_STAGING, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
    DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_FORMAT_R16G16B16A16_FLOAT, DXGI_SAMPLE_DESC,
};

use crate::bridge::CpuSurface;
use crate::error::{DuplicationError, DuplicationResult};
use crate::geometry::Size;
use crate::gpu::PixelFormat;

pub(crate) fn pixel_format_from_dxgi(format: DXGI_FORMAT) -> Option<PixelFormat> {
    match format {
        DXGI_FORMAT_B8G8R8A8_UNORM | DXGI_FORMAT_B8G8R8A8_UNORM_SRGB => Some(PixelFormat::Bgra8),
        DXGI_FORMAT_R8G8B8A8_UNORM => Some(PixelFormat::Rgba8),
        DXGI_FORMAT_R16G16B16A16_FLOAT => Some(PixelFormat::Rgba16Float),
        _ => None,
    }
}

pub(crate) fn dxgi_format(format: PixelFormat) -> DXGI_FORMAT {
    match format {
        PixelFormat::Bgra8 => DXGI_FORMAT_B8G8R8A8_UNORM,
        PixelFormat::Rgba8 => DXGI_FORMAT_R8G8B8A8_UNORM,
        PixelFormat::Rgba16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
    }
}

pub(crate) fn texture_desc(texture: &ID3D11Texture2D) -> D3D11_TEXTURE2D_DESC {
    let mut desc = D3D11_TEXTURE2D_DESC::default();
    unsafe { texture.GetDesc(&mut desc) };
    desc
}

/// Reuse `staging` when it already matches `src`, otherwise replace it with
/// a single-sample CPU-readable copy target of the same size and format.
pub(crate) fn ensure_staging_texture<'a>(
    device: &ID3D11Device,
    staging: &'a mut Option<ID3D11Texture2D>,
    src: &D3D11_TEXTURE2D_DESC,
) -> DuplicationResult<&'a ID3D11Texture2D> {
    let reusable = staging.as_ref().is_some_and(|existing| {
        let desc = texture_desc(existing);
        desc.Width == src.Width && desc.Height == src.Height && desc.Format == src.Format
    });

    if !reusable {
        let desc = D3D11_TEXTURE2D_DESC {
            Width: src.Width,
            Height: src.Height,
            MipLevels: 1,
            ArraySize: 1,
            Format: src.Format,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_STAGING,
            BindFlags: Default::default(),
            CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
            MiscFlags: Default::default(),
        };

        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe { device.CreateTexture2D(&desc, None, Some(&mut texture)) }
            .map_err(|error| DuplicationError::resource(error, "readback staging texture"))?;
        log::debug!(
            "created {}x{} readback staging texture",
            desc.Width,
            desc.Height
        );
        *staging = texture;
    }

    staging
        .as_ref()
        .context("CreateTexture2D did not return a staging texture")
        .map_err(DuplicationError::Device)
}

/// Copy `texture` into `staging`, map it and copy the rows out tightly
/// packed.
pub(crate) fn read_back(
    device: &ID3D11Device,
    context: &ID3D11DeviceContext,
    staging: &mut Option<ID3D11Texture2D>,
    texture: &ID3D11Texture2D,
) -> DuplicationResult<CpuSurface> {
    let desc = texture_desc(texture);
    let format = pixel_format_from_dxgi(desc.Format).ok_or_else(|| {
        DuplicationError::InvalidConfig(format!("unsupported frame format {:?}", desc.Format))
    })?;
    let staging = ensure_staging_texture(device, staging, &desc)?;
    unsafe { context.CopyResource(staging, texture) };

    let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
    // D3D11_MAP_FLAG_DO_NOT_WAIT = 0x100000
    const DO_NOT_WAIT: u32 = 0x100000;
    let non_blocking =
        unsafe { context.Map(staging, 0, D3D11_MAP_READ, DO_NOT_WAIT, Some(&mut mapped)) };
    if non_blocking.is_err() {
        mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe { context.Map(staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped)) }
            .context("failed to map readback staging texture")
            .map_err(DuplicationError::Device)?;
    }

    let result = copy_mapped_rows(Size::new(desc.Width, desc.Height), format, &mapped);
    unsafe { context.Unmap(staging, 0) };
    result
}

fn copy_mapped_rows(
    size: Size,
    format: PixelFormat,
    mapped: &D3D11_MAPPED_SUBRESOURCE,
) -> DuplicationResult<CpuSurface> {
    let mut surface = CpuSurface::new(size, format)?;
    let row_len = surface.row_pitch;
    if row_len == 0 || size.height == 0 {
        return Ok(surface);
    }
    let src_pitch = mapped.RowPitch as usize;
    if src_pitch < row_len || mapped.pData.is_null() {
        return Err(DuplicationError::BufferOverflow);
    }

    let src_base = mapped.pData as *const u8;
    for (y, row) in surface.bytes.chunks_exact_mut(row_len).enumerate() {
        let src = unsafe { std::slice::from_raw_parts(src_base.add(y * src_pitch), row_len) };
        row.copy_from_slice(src);
    }
    Ok(surface)
}
