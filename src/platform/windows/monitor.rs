use anyhow::Context;
use windows::Win32::Foundation::LUID;
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory1, DXGI_ERROR_NOT_FOUND, DXGI_OUTPUT_DESC, IDXGIAdapter, IDXGIFactory1,
    IDXGIOutput,
};
use windows::core::Interface;

use crate::error::{DuplicationError, DuplicationResult};
use crate::geometry::{Rect, Rotation};
use crate::source::{AdapterId, OutputDescriptor};

/// A desktop-attached output together with the adapter driving it.
#[derive(Clone)]
pub(crate) struct ResolvedOutput {
    pub adapter: IDXGIAdapter,
    pub output: IDXGIOutput,
    pub descriptor: OutputDescriptor,
}

fn luid_to_adapter_id(luid: LUID) -> AdapterId {
    AdapterId::from_luid_parts(luid.HighPart, luid.LowPart)
}

fn utf16z_to_string(input: &[u16]) -> String {
    let len = input.iter().position(|&ch| ch == 0).unwrap_or(input.len());
    String::from_utf16_lossy(&input[..len])
}

fn describe_output(desc: &DXGI_OUTPUT_DESC, adapter: AdapterId) -> OutputDescriptor {
    let coords = desc.DesktopCoordinates;
    OutputDescriptor {
        device_name: utf16z_to_string(&desc.DeviceName),
        bounds: Rect::new(coords.left, coords.top, coords.right, coords.bottom),
        rotation: Rotation::from_raw(desc.Rotation.0 as u32),
        adapter,
    }
}

/// Walk every adapter's outputs and return the desktop-attached one whose
/// GDI device name matches `device_name` (case-insensitive).
pub(crate) fn find_output(device_name: &str) -> DuplicationResult<ResolvedOutput> {
    let factory: IDXGIFactory1 = unsafe { CreateDXGIFactory1() }
        .context("CreateDXGIFactory1 failed")
        .map_err(DuplicationError::Device)?;

    let mut adapter_idx = 0u32;
    loop {
        let adapter1 = match unsafe { factory.EnumAdapters1(adapter_idx) } {
            Ok(a) => a,
            Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
            Err(e) => {
                return Err(DuplicationError::Device(
                    anyhow::Error::from(e).context(format!("EnumAdapters1({adapter_idx}) failed")),
                ));
            }
        };
        let adapter_desc = unsafe { adapter1.GetDesc1() }
            .context("IDXGIAdapter1::GetDesc1 failed")
            .map_err(DuplicationError::Device)?;
        let adapter_id = luid_to_adapter_id(adapter_desc.AdapterLuid);

        let adapter: IDXGIAdapter = adapter1
            .cast()
            .context("failed to cast IDXGIAdapter1 to IDXGIAdapter")
            .map_err(DuplicationError::Device)?;

        let mut output_idx = 0u32;
        loop {
            let output = match unsafe { adapter.EnumOutputs(output_idx) } {
                Ok(o) => o,
                Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
                Err(e) => {
                    return Err(DuplicationError::Device(anyhow::Error::from(e).context(
                        format!("EnumOutputs({output_idx}) on adapter {adapter_idx} failed"),
                    )));
                }
            };

            let desc = unsafe { output.GetDesc() }
                .context("IDXGIOutput::GetDesc failed")
                .map_err(DuplicationError::Device)?;

            if desc.AttachedToDesktop.as_bool() {
                let descriptor = describe_output(&desc, adapter_id);
                if descriptor.device_name.eq_ignore_ascii_case(device_name) {
                    log::debug!(
                        "resolved output {} on adapter {:#x} ({:?}, {:?})",
                        descriptor.device_name,
                        adapter_id.0,
                        descriptor.bounds,
                        descriptor.rotation
                    );
                    return Ok(ResolvedOutput {
                        adapter,
                        output,
                        descriptor,
                    });
                }
            }

            output_idx += 1;
        }

        adapter_idx += 1;
    }

    Err(DuplicationError::InvalidConfig(format!(
        "no desktop output named {device_name}"
    )))
}
