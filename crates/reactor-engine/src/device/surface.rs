use winit::dpi::PhysicalSize;

use crate::error::SurfaceError;

pub(crate) fn choose_surface_format(
    caps: &wgpu::SurfaceCapabilities,
    prefer_srgb: bool,
) -> Option<wgpu::TextureFormat> {
    let first = caps.formats.first().copied()?;
    if prefer_srgb {
        if let Some(f) = caps.formats.iter().copied().find(|f| f.is_srgb()) {
            return Some(f);
        }
    }
    Some(first)
}

pub(crate) fn choose_alpha_mode(
    caps: &wgpu::SurfaceCapabilities,
    requested: Option<wgpu::CompositeAlphaMode>,
) -> wgpu::CompositeAlphaMode {
    requested
        .filter(|m| caps.alpha_modes.contains(m))
        .or_else(|| caps.alpha_modes.first().copied())
        .unwrap_or(wgpu::CompositeAlphaMode::Auto)
}

/// Updates the stored size and reconfigures when the new size is drawable.
///
/// wgpu rejects a 0x0 configuration, so a minimized window only records the
/// size; the next non-zero resize configures again.
pub(crate) fn apply_resize(
    surface: &wgpu::Surface,
    device: &wgpu::Device,
    config: &mut wgpu::SurfaceConfiguration,
    size: &mut PhysicalSize<u32>,
    new_size: PhysicalSize<u32>,
) {
    *size = new_size;
    if new_size.width == 0 || new_size.height == 0 {
        return;
    }
    config.width = new_size.width;
    config.height = new_size.height;
    surface.configure(device, config);
}

/// Maps an acquisition failure onto the renderer's surface error classes.
pub(crate) fn classify(err: wgpu::SurfaceError) -> SurfaceError {
    match err {
        wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => SurfaceError::Stale,
        wgpu::SurfaceError::Timeout | wgpu::SurfaceError::Other => SurfaceError::Timeout,
        wgpu::SurfaceError::OutOfMemory => {
            SurfaceError::Fatal("out of memory acquiring the surface texture".to_string())
        }
    }
}
