use anyhow::Context;
use windows::Win32::Graphics::Direct3D::{
    D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_UNKNOWN, D3D_FEATURE_LEVEL_11_0,
    D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE, D3D11_BIND_VERTEX_BUFFER, D3D11_BOX,
    D3D11_BUFFER_DESC, D3D11_COMPARISON_NEVER, D3D11_CPU_ACCESS_WRITE,
    D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_CREATE_DEVICE_SINGLETHREADED,
    D3D11_FILTER_MIN_MAG_MIP_LINEAR, D3D11_INPUT_ELEMENT_DESC, D3D11_INPUT_PER_VERTEX_DATA,
    D3D11_MAP_WRITE_DISCARD, D3D11_MAPPED_SUBRESOURCE, D3D11_SAMPLER_DESC, D3D11_SDK_VERSION,
    D3D11_SUBRESOURCE_DATA, D3D11_TEXTURE_ADDRESS_CLAMP, D3D11_TEXTURE2D_DESC,
    D3D11_USAGE_DEFAULT, D3D11_USAGE_DYNAMIC, D3D11_VIEWPORT,
    D3D11_VIEWPORT_AND_SCISSORRECT_OBJECT_COUNT_PER_PIPELINE, D3D11CreateDevice, ID3D11Buffer,
    ID3D11Device, ID3D11DeviceContext, ID3D11InputLayout, ID3D11PixelShader,
    ID3D11RenderTargetView, ID3D11SamplerState, ID3D11ShaderResourceView, ID3D11Texture2D,
    ID3D11VertexShader,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT_R32G32_FLOAT, DXGI_FORMAT_R32G32B32_FLOAT, DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::{IDXGIAdapter, IDXGIDevice};
use windows::core::{Interface, s};

use crate::bridge::CpuSurface;
use crate::error::{DuplicationError, DuplicationResult};
use crate::geometry::{Rect, Size};
use crate::gpu::{GraphicsDevice, PixelFormat, QuadPass, ShaderSet, SurfaceDesc, SurfaceUsage};
use crate::rotation::Vertex;
use crate::source::AdapterId;

use super::surface::{dxgi_format, pixel_format_from_dxgi, texture_desc};

/// Create a D3D11 device on the given adapter.
///
/// When `single_threaded` is true the device is created with
/// `D3D11_CREATE_DEVICE_SINGLETHREADED`. The capture-side device created
/// for a cross-adapter output is only touched by the duplication thread.
pub(crate) fn create_d3d11_device_for_adapter(
    adapter: &IDXGIAdapter,
    single_threaded: bool,
) -> DuplicationResult<(ID3D11Device, ID3D11DeviceContext)> {
    create_d3d11_device(Some(adapter), single_threaded)
}

/// Create a D3D11 device on the default hardware adapter.
pub fn create_default_device() -> DuplicationResult<(ID3D11Device, ID3D11DeviceContext)> {
    create_d3d11_device(None, false)
}

fn create_d3d11_device(
    adapter: Option<&IDXGIAdapter>,
    single_threaded: bool,
) -> DuplicationResult<(ID3D11Device, ID3D11DeviceContext)> {
    let mut device: Option<ID3D11Device> = None;
    let mut context: Option<ID3D11DeviceContext> = None;
    let feature_levels = [D3D_FEATURE_LEVEL_11_0];

    let mut flags = D3D11_CREATE_DEVICE_BGRA_SUPPORT;
    if single_threaded {
        flags |= D3D11_CREATE_DEVICE_SINGLETHREADED;
    }

    unsafe {
        D3D11CreateDevice(
            adapter,
            if adapter.is_some() {
                D3D_DRIVER_TYPE_UNKNOWN
            } else {
                D3D_DRIVER_TYPE_HARDWARE
            },
            None,
            flags,
            Some(&feature_levels),
            D3D11_SDK_VERSION,
            Some(&mut device),
            None,
            Some(&mut context),
        )
    }
    .context("D3D11CreateDevice failed")
    .map_err(DuplicationError::Device)?;

    let device = device
        .context("D3D11CreateDevice did not return a device")
        .map_err(DuplicationError::Device)?;
    let context = context
        .context("D3D11CreateDevice did not return a device context")
        .map_err(DuplicationError::Device)?;
    Ok((device, context))
}

/// LUID of the adapter a device was created on.
pub(crate) fn device_adapter_id(device: &ID3D11Device) -> DuplicationResult<AdapterId> {
    let dxgi_device: IDXGIDevice = device
        .cast()
        .context("failed to query IDXGIDevice")
        .map_err(DuplicationError::Device)?;
    let adapter = unsafe { dxgi_device.GetAdapter() }
        .context("IDXGIDevice::GetAdapter failed")
        .map_err(DuplicationError::Device)?;
    let desc = unsafe { adapter.GetDesc() }
        .context("IDXGIAdapter::GetDesc failed")
        .map_err(DuplicationError::Device)?;
    Ok(AdapterId::from_luid_parts(
        desc.AdapterLuid.HighPart,
        desc.AdapterLuid.LowPart,
    ))
}

fn created<T>(slot: Option<T>, what: &'static str) -> DuplicationResult<T> {
    slot.ok_or_else(|| DuplicationError::resource(anyhow::anyhow!("driver returned no object"), what))
}

/// Vertex shader, pixel shader, input layout and sampler of the textured
/// quad pass.
pub struct D3D11Pipeline {
    vertex_shader: ID3D11VertexShader,
    pixel_shader: ID3D11PixelShader,
    input_layout: ID3D11InputLayout,
    sampler: ID3D11SamplerState,
}

/// The compositing device: a borrowed D3D11 device and its immediate
/// context.
pub struct D3D11Device {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    adapter: AdapterId,
}

impl D3D11Device {
    pub fn new(device: ID3D11Device, context: ID3D11DeviceContext) -> DuplicationResult<Self> {
        let adapter = device_adapter_id(&device)?;
        Ok(Self {
            device,
            context,
            adapter,
        })
    }

    pub fn device(&self) -> &ID3D11Device {
        &self.device
    }

    pub fn context(&self) -> &ID3D11DeviceContext {
        &self.context
    }
}

impl GraphicsDevice for D3D11Device {
    type Texture = ID3D11Texture2D;
    type RenderTarget = ID3D11RenderTargetView;
    type ShaderView = ID3D11ShaderResourceView;
    type Pipeline = D3D11Pipeline;
    type VertexBuffer = ID3D11Buffer;

    fn adapter(&self) -> AdapterId {
        self.adapter
    }

    fn describe(&self, texture: &ID3D11Texture2D) -> SurfaceDesc {
        let desc = texture_desc(texture);
        let format = pixel_format_from_dxgi(desc.Format).unwrap_or_else(|| {
            log::warn!("unrecognised surface format {:?}, treating as BGRA8", desc.Format);
            PixelFormat::Bgra8
        });
        SurfaceDesc::new(Size::new(desc.Width, desc.Height), format)
    }

    fn create_texture(
        &self,
        desc: &SurfaceDesc,
        usage: SurfaceUsage,
    ) -> DuplicationResult<ID3D11Texture2D> {
        let bind_flags = match usage {
            SurfaceUsage::Intermediate => D3D11_BIND_SHADER_RESOURCE.0,
            SurfaceUsage::RenderTarget => D3D11_BIND_RENDER_TARGET.0 | D3D11_BIND_SHADER_RESOURCE.0,
        };
        let texture_desc = D3D11_TEXTURE2D_DESC {
            Width: desc.size.width,
            Height: desc.size.height,
            MipLevels: 1,
            ArraySize: 1,
            Format: dxgi_format(desc.format),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: bind_flags as u32,
            ..Default::default()
        };

        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe { self.device.CreateTexture2D(&texture_desc, None, Some(&mut texture)) }
            .map_err(|error| DuplicationError::resource(error, "intermediate texture"))?;
        created(texture, "intermediate texture")
    }

    fn create_texture_with_pixels(&self, pixels: &CpuSurface) -> DuplicationResult<ID3D11Texture2D> {
        let desc = D3D11_TEXTURE2D_DESC {
            Width: pixels.size.width,
            Height: pixels.size.height,
            MipLevels: 1,
            ArraySize: 1,
            Format: dxgi_format(pixels.format),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: D3D11_BIND_SHADER_RESOURCE.0 as u32,
            ..Default::default()
        };
        let initial = D3D11_SUBRESOURCE_DATA {
            pSysMem: pixels.bytes.as_ptr().cast(),
            SysMemPitch: u32::try_from(pixels.row_pitch)
                .map_err(|_| DuplicationError::BufferOverflow)?,
            SysMemSlicePitch: 0,
        };

        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe {
            self.device
                .CreateTexture2D(&desc, Some(&initial), Some(&mut texture))
        }
        .map_err(|error| DuplicationError::resource(error, "bridged frame texture"))?;
        created(texture, "bridged frame texture")
    }

    fn create_pipeline(&self, shaders: &ShaderSet) -> DuplicationResult<D3D11Pipeline> {
        let mut vertex_shader: Option<ID3D11VertexShader> = None;
        unsafe {
            self.device
                .CreateVertexShader(&shaders.vertex, None, Some(&mut vertex_shader))
        }
        .map_err(|error| DuplicationError::resource(error, "vertex shader"))?;
        let vertex_shader = created(vertex_shader, "vertex shader")?;

        let mut pixel_shader: Option<ID3D11PixelShader> = None;
        unsafe {
            self.device
                .CreatePixelShader(&shaders.pixel, None, Some(&mut pixel_shader))
        }
        .map_err(|error| DuplicationError::resource(error, "pixel shader"))?;
        let pixel_shader = created(pixel_shader, "pixel shader")?;

        let layout = [
            D3D11_INPUT_ELEMENT_DESC {
                SemanticName: s!("POSITION"),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32B32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: 0,
                InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
            D3D11_INPUT_ELEMENT_DESC {
                SemanticName: s!("TEXCOORD"),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: Vertex::TEX_COORD_OFFSET,
                InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
        ];
        let mut input_layout: Option<ID3D11InputLayout> = None;
        unsafe {
            self.device
                .CreateInputLayout(&layout, &shaders.vertex, Some(&mut input_layout))
        }
        .map_err(|error| DuplicationError::resource(error, "input layout"))?;
        let input_layout = created(input_layout, "input layout")?;

        let sampler_desc = D3D11_SAMPLER_DESC {
            Filter: D3D11_FILTER_MIN_MAG_MIP_LINEAR,
            AddressU: D3D11_TEXTURE_ADDRESS_CLAMP,
            AddressV: D3D11_TEXTURE_ADDRESS_CLAMP,
            AddressW: D3D11_TEXTURE_ADDRESS_CLAMP,
            MipLODBias: 0.0,
            MaxAnisotropy: 1,
            ComparisonFunc: D3D11_COMPARISON_NEVER,
            BorderColor: [0.0; 4],
            MinLOD: 0.0,
            MaxLOD: f32::MAX,
        };
        let mut sampler: Option<ID3D11SamplerState> = None;
        unsafe { self.device.CreateSamplerState(&sampler_desc, Some(&mut sampler)) }
            .map_err(|error| DuplicationError::resource(error, "sampler state"))?;
        let sampler = created(sampler, "sampler state")?;

        Ok(D3D11Pipeline {
            vertex_shader,
            pixel_shader,
            input_layout,
            sampler,
        })
    }

    fn create_render_target(
        &self,
        texture: &ID3D11Texture2D,
    ) -> DuplicationResult<ID3D11RenderTargetView> {
        let mut view: Option<ID3D11RenderTargetView> = None;
        unsafe {
            self.device
                .CreateRenderTargetView(texture, None, Some(&mut view))
        }
        .map_err(|error| DuplicationError::resource(error, "render target view"))?;
        created(view, "render target view")
    }

    fn create_shader_view(
        &self,
        texture: &ID3D11Texture2D,
    ) -> DuplicationResult<ID3D11ShaderResourceView> {
        let mut view: Option<ID3D11ShaderResourceView> = None;
        unsafe {
            self.device
                .CreateShaderResourceView(texture, None, Some(&mut view))
        }
        .map_err(|error| DuplicationError::resource(error, "shader resource view"))?;
        created(view, "shader resource view")
    }

    fn create_vertex_buffer(&self, vertices: &[Vertex]) -> DuplicationResult<ID3D11Buffer> {
        let byte_width = std::mem::size_of_val(vertices);
        let desc = D3D11_BUFFER_DESC {
            ByteWidth: u32::try_from(byte_width).map_err(|_| DuplicationError::BufferOverflow)?,
            Usage: D3D11_USAGE_DYNAMIC,
            BindFlags: D3D11_BIND_VERTEX_BUFFER.0 as u32,
            CPUAccessFlags: D3D11_CPU_ACCESS_WRITE.0 as u32,
            ..Default::default()
        };
        let initial = D3D11_SUBRESOURCE_DATA {
            pSysMem: vertices.as_ptr().cast(),
            SysMemPitch: 0,
            SysMemSlicePitch: 0,
        };

        let mut buffer: Option<ID3D11Buffer> = None;
        unsafe {
            self.device
                .CreateBuffer(&desc, Some(&initial), Some(&mut buffer))
        }
        .map_err(|error| DuplicationError::resource(error, "vertex buffer"))?;
        created(buffer, "vertex buffer")
    }

    fn update_vertex_buffer(
        &self,
        buffer: &ID3D11Buffer,
        vertices: &[Vertex],
    ) -> DuplicationResult<()> {
        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe { self.context.Map(buffer, 0, D3D11_MAP_WRITE_DISCARD, 0, Some(&mut mapped)) }
            .context("failed to map vertex buffer for update")
            .map_err(DuplicationError::Device)?;
        if mapped.pData.is_null() {
            unsafe { self.context.Unmap(buffer, 0) };
            return Err(DuplicationError::Device(anyhow::anyhow!(
                "mapped vertex buffer has no data pointer"
            )));
        }
        unsafe {
            std::ptr::copy_nonoverlapping(
                vertices.as_ptr(),
                mapped.pData.cast::<Vertex>(),
                vertices.len(),
            );
            self.context.Unmap(buffer, 0);
        }
        Ok(())
    }

    fn copy_region(
        &self,
        dst: &ID3D11Texture2D,
        dst_x: u32,
        dst_y: u32,
        src: &ID3D11Texture2D,
        src_rect: &Rect,
    ) {
        if src_rect.is_empty() || src_rect.left < 0 || src_rect.top < 0 {
            log::warn!("dropped copy of {src_rect:?} to ({dst_x}, {dst_y})");
            return;
        }
        let source_box = D3D11_BOX {
            left: src_rect.left as u32,
            top: src_rect.top as u32,
            front: 0,
            right: src_rect.right as u32,
            bottom: src_rect.bottom as u32,
            back: 1,
        };
        unsafe {
            self.context
                .CopySubresourceRegion(dst, 0, dst_x, dst_y, 0, src, 0, Some(&source_box));
        }
    }

    fn draw_quads(&self, pass: QuadPass<'_, Self>) -> DuplicationResult<()> {
        let mut saved =
            [D3D11_VIEWPORT::default(); D3D11_VIEWPORT_AND_SCISSORRECT_OBJECT_COUNT_PER_PIPELINE as usize];
        let mut saved_count = saved.len() as u32;
        unsafe {
            self.context
                .RSGetViewports(&mut saved_count, Some(saved.as_mut_ptr()))
        };

        let viewport = D3D11_VIEWPORT {
            TopLeftX: 0.0,
            TopLeftY: 0.0,
            Width: pass.target_size.width as f32,
            Height: pass.target_size.height as f32,
            MinDepth: 0.0,
            MaxDepth: 1.0,
        };
        let stride = Vertex::STRIDE;
        let offset = 0u32;
        let pipeline = pass.pipeline;

        unsafe {
            self.context.IASetVertexBuffers(
                0,
                1,
                Some(&Some(pass.vertices.clone()) as *const _),
                Some(&stride as *const _),
                Some(&offset as *const _),
            );
            self.context.IASetInputLayout(&pipeline.input_layout);
            self.context
                .IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
            self.context
                .OMSetBlendState(None, Some(&[0.0f32; 4]), 0xffff_ffff);
            self.context
                .OMSetRenderTargets(Some(&[Some(pass.target.clone())]), None);
            self.context.VSSetShader(&pipeline.vertex_shader, None);
            self.context.PSSetShader(&pipeline.pixel_shader, None);
            self.context
                .PSSetShaderResources(0, Some(&[Some(pass.source.clone())]));
            self.context
                .PSSetSamplers(0, Some(&[Some(pipeline.sampler.clone())]));
            self.context.RSSetViewports(Some(&[viewport]));

            self.context.Draw(pass.vertex_count, 0);

            let restored = (saved_count as usize).min(saved.len());
            if restored > 0 {
                self.context.RSSetViewports(Some(&saved[..restored]));
            }
            self.context.PSSetShaderResources(0, Some(&[None]));
        }
        Ok(())
    }
}
