//! Shared-texture backing for the zero-copy GPU mode (Windows only).
//!
//! The channel owns a D3D11 texture created with the shareable misc flag
//! and advertises its DXGI shared handle in the header. Readers open the
//! handle on their own device and sample the texture directly; the
//! payload bytes never cross the shared-memory region.
//!
//! Upload path per frame: map the CPU-writable staging texture, copy the
//! converted rows in, unmap, then copy staging to the shared texture
//! GPU-side and flush.

use windows::core::Interface;
use windows::Win32::Graphics::Direct3D::D3D_DRIVER_TYPE_HARDWARE;
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE,
    D3D11_CPU_ACCESS_WRITE, D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_MAPPED_SUBRESOURCE,
    D3D11_MAP_WRITE, D3D11_RESOURCE_MISC_SHARED, D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC,
    D3D11_USAGE_DEFAULT, D3D11_USAGE_STAGING, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::IDXGIResource;

use crate::error::ShareError;

/// Device, staging + shareable textures, and the handle advertised to
/// readers.
#[derive(Debug)]
pub(super) struct GpuBacking {
    // Kept so the device outlives the textures and context.
    _device: ID3D11Device,
    context: ID3D11DeviceContext,
    staging: ID3D11Texture2D,
    shared: ID3D11Texture2D,
    shared_handle: u64,
    width: u32,
    height: u32,
}

// SAFETY: D3D11 interfaces are free-threaded COM objects; the backing
// moves to the publisher worker and is used from that one thread.
unsafe impl Send for GpuBacking {}

impl GpuBacking {
    /// Create a device, a CPU-writable staging texture and a shareable
    /// BGRA texture, both at the channel's maximum geometry.
    pub fn new(max_width: u32, max_height: u32) -> Result<Self, ShareError> {
        let mut device = None;
        let mut context = None;
        unsafe {
            D3D11CreateDevice(
                None,
                D3D_DRIVER_TYPE_HARDWARE,
                None,
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                None,
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )
            .map_err(|e| ShareError::GpuUnavailable(format!("D3D11CreateDevice: {e}")))?;
        }
        let device =
            device.ok_or_else(|| ShareError::GpuUnavailable("device is None".into()))?;
        let context =
            context.ok_or_else(|| ShareError::GpuUnavailable("context is None".into()))?;

        let base = D3D11_TEXTURE2D_DESC {
            Width: max_width,
            Height: max_height,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: (D3D11_BIND_SHADER_RESOURCE.0 | D3D11_BIND_RENDER_TARGET.0) as u32,
            CPUAccessFlags: 0,
            MiscFlags: D3D11_RESOURCE_MISC_SHARED.0 as u32,
        };
        let shared = create_texture(&device, &base, "shared texture")?;

        let staging_desc = D3D11_TEXTURE2D_DESC {
            Usage: D3D11_USAGE_STAGING,
            BindFlags: 0,
            CPUAccessFlags: D3D11_CPU_ACCESS_WRITE.0 as u32,
            MiscFlags: 0,
            ..base
        };
        let staging = create_texture(&device, &staging_desc, "staging texture")?;

        let resource: IDXGIResource = shared
            .cast()
            .map_err(|e| ShareError::GpuUnavailable(format!("IDXGIResource cast: {e}")))?;
        let shared_handle = unsafe {
            resource
                .GetSharedHandle()
                .map_err(|e| ShareError::GpuUnavailable(format!("GetSharedHandle: {e}")))?
        };

        Ok(Self {
            _device: device,
            context,
            staging,
            shared,
            shared_handle: shared_handle.0 as usize as u64,
            width: max_width,
            height: max_height,
        })
    }

    pub fn shared_handle(&self) -> u64 {
        self.shared_handle
    }

    /// Push packed BGRA rows through the staging texture into the shared
    /// texture and flush so readers observe the new pixels.
    pub fn upload(
        &self,
        pixels: &[u8],
        stride: usize,
        width: u32,
        height: u32,
    ) -> Result<(), ShareError> {
        if width > self.width || height > self.height {
            return Err(ShareError::GpuTransfer(format!(
                "frame {width}x{height} exceeds shared texture {}x{}",
                self.width, self.height
            )));
        }
        let need = stride * height as usize;
        if pixels.len() < need {
            return Err(ShareError::GpuTransfer(format!(
                "upload buffer {} short of {need}",
                pixels.len()
            )));
        }

        unsafe {
            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            self.context
                .Map(&self.staging, 0, D3D11_MAP_WRITE, 0, Some(&mut mapped))
                .map_err(|e| ShareError::GpuTransfer(format!("map failed: {e}")))?;

            // Row-by-row: the staging RowPitch need not match our stride.
            let row_len = width as usize * 4;
            let dst_pitch = mapped.RowPitch as usize;
            let dst = mapped.pData as *mut u8;
            for y in 0..height as usize {
                std::ptr::copy_nonoverlapping(
                    pixels.as_ptr().add(y * stride),
                    dst.add(y * dst_pitch),
                    row_len,
                );
            }
            self.context.Unmap(&self.staging, 0);

            self.context.CopyResource(&self.shared, &self.staging);
            self.context.Flush();
        }
        Ok(())
    }
}

fn create_texture(
    device: &ID3D11Device,
    desc: &D3D11_TEXTURE2D_DESC,
    what: &str,
) -> Result<ID3D11Texture2D, ShareError> {
    let mut texture = None;
    unsafe {
        device
            .CreateTexture2D(desc, None, Some(&mut texture))
            .map_err(|e| ShareError::GpuUnavailable(format!("{what}: {e}")))?;
    }
    texture.ok_or_else(|| ShareError::GpuUnavailable(format!("{what} is None")))
}
