use std::borrow::Cow;
use std::sync::OnceLock;

use crate::error::{DuplicationError, DuplicationResult};
use crate::gpu::ShaderSet;

// Bytecode compiled by build.rs when fxc.exe was found; otherwise each
// stage is compiled with D3DCompile the first time it is requested.

#[cfg(has_precompiled_dirty_quad_vs)]
const PRECOMPILED_VS: &[u8] = include_bytes!(env!("DIRTY_QUAD_VS_CSO_PATH"));

#[cfg(has_precompiled_dirty_quad_ps)]
const PRECOMPILED_PS: &[u8] = include_bytes!(env!("DIRTY_QUAD_PS_CSO_PATH"));

#[cfg(any(
    not(has_precompiled_dirty_quad_vs),
    not(has_precompiled_dirty_quad_ps)
))]
const HLSL_SOURCE: &str = include_str!("dirty_quad.hlsl");

type CachedStage = Result<Cow<'static, [u8]>, String>;

fn vertex_stage() -> &'static CachedStage {
    static BYTECODE: OnceLock<CachedStage> = OnceLock::new();
    BYTECODE.get_or_init(|| {
        #[cfg(has_precompiled_dirty_quad_vs)]
        {
            Ok(Cow::Borrowed(PRECOMPILED_VS))
        }
        #[cfg(not(has_precompiled_dirty_quad_vs))]
        {
            compile_stage_runtime(b"vs_main\0", b"vs_4_0\0").map(Cow::Owned)
        }
    })
}

fn pixel_stage() -> &'static CachedStage {
    static BYTECODE: OnceLock<CachedStage> = OnceLock::new();
    BYTECODE.get_or_init(|| {
        #[cfg(has_precompiled_dirty_quad_ps)]
        {
            Ok(Cow::Borrowed(PRECOMPILED_PS))
        }
        #[cfg(not(has_precompiled_dirty_quad_ps))]
        {
            compile_stage_runtime(b"ps_main\0", b"ps_4_0\0").map(Cow::Owned)
        }
    })
}

/// Vertex/pixel bytecode for the textured-quad pass. Its input signature
/// matches [`Vertex`](crate::rotation::Vertex).
pub fn dirty_quad_shaders() -> DuplicationResult<ShaderSet> {
    let failed = |stage: &str, detail: &String| {
        DuplicationError::resource(
            anyhow::anyhow!("{stage} shader compilation failed: {detail}"),
            "textured quad shaders",
        )
    };
    let vertex = vertex_stage()
        .as_ref()
        .map_err(|detail| failed("vertex", detail))?;
    let pixel = pixel_stage()
        .as_ref()
        .map_err(|detail| failed("pixel", detail))?;
    Ok(ShaderSet {
        vertex: vertex.clone(),
        pixel: pixel.clone(),
    })
}

#[cfg(any(
    not(has_precompiled_dirty_quad_vs),
    not(has_precompiled_dirty_quad_ps)
))]
fn compile_stage_runtime(entry: &[u8], target: &[u8]) -> Result<Vec<u8>, String> {
    use windows::Win32::Graphics::Direct3D::Fxc::D3DCompile;
    use windows::core::PCSTR;

    let source = HLSL_SOURCE.as_bytes();
    let mut blob = None;
    let mut errors = None;

    let hr = unsafe {
        D3DCompile(
            source.as_ptr() as *const _,
            source.len(),
            None,
            None,
            None,
            PCSTR::from_raw(entry.as_ptr()),
            PCSTR::from_raw(target.as_ptr()),
            0,
            0,
            &mut blob,
            Some(&mut errors),
        )
    };

    if let Err(e) = hr {
        let msg = errors
            .map(|b| {
                let ptr = unsafe { b.GetBufferPointer() } as *const u8;
                let len = unsafe { b.GetBufferSize() };
                let slice = unsafe { std::slice::from_raw_parts(ptr, len) };
                String::from_utf8_lossy(slice).trim().to_string()
            })
            .unwrap_or_default();
        return Err(format!("{e}: {msg}"));
    }

    let blob = blob.ok_or_else(|| "D3DCompile returned no blob".to_string())?;
    let ptr = unsafe { blob.GetBufferPointer() } as *const u8;
    let len = unsafe { blob.GetBufferSize() };
    Ok(unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec())
}
