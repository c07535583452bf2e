//! Direct3D 11 compositing device and DXGI desktop duplication source.

pub(crate) mod d3d11;
pub(crate) mod duplication;
pub(crate) mod monitor;
pub(crate) mod shaders;
pub(crate) mod surface;

use windows::Win32::Graphics::Direct3D11::{ID3D11Device, ID3D11DeviceContext};

use crate::error::DuplicationResult;
use crate::gpu::GraphicsDevice;
use crate::manager::{DuplicationManager, ManagerConfig};

pub use d3d11::{D3D11Device, D3D11Pipeline, create_default_device};
pub use duplication::DxgiDuplicationSource;
pub use shaders::dirty_quad_shaders;

pub type WindowsDuplicationManager = DuplicationManager<D3D11Device, DxgiDuplicationSource>;

/// Start duplicating the output named `output_name` (e.g. `\\.\DISPLAY1`)
/// and compositing it with `device`/`context`.
///
/// When the output is attached to a different adapter than `device`, the
/// duplication is created on a private device for the output's adapter and
/// frames cross over through CPU memory.
pub fn initialize_for_output(
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    output_name: &str,
    config: ManagerConfig,
) -> DuplicationResult<WindowsDuplicationManager> {
    let compositing = D3D11Device::new(device, context)?;
    let resolved = monitor::find_output(output_name)?;

    let cross_adapter = resolved.descriptor.adapter != compositing.adapter();
    let source = if cross_adapter {
        log::debug!(
            "output {} is on adapter {:#x}, compositing device on {:#x}; creating a capture device",
            resolved.descriptor.device_name,
            resolved.descriptor.adapter.0,
            compositing.adapter().0
        );
        let (capture_device, capture_context) =
            d3d11::create_d3d11_device_for_adapter(&resolved.adapter, true)?;
        DxgiDuplicationSource::new(&resolved, capture_device, capture_context)?
    } else {
        DxgiDuplicationSource::new(
            &resolved,
            compositing.device().clone(),
            compositing.context().clone(),
        )?
    };

    let shaders = dirty_quad_shaders()?;
    Ok(DuplicationManager::new(compositing, shaders, source, config))
}
