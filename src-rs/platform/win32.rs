use anyhow::{bail, Context, Result};
use image::RgbaImage;
use std::ffi::c_void;
use windows::Win32::Foundation::{BOOL, HWND, LPARAM, RECT, TRUE};
use windows::Win32::Graphics::Gdi::{
    BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, GetDC, GetDIBits,
    ReleaseDC, SelectObject, BITMAPINFO, BITMAPINFOHEADER, BI_RGB, DIB_RGB_COLORS, HGDIOBJ,
    SRCCOPY,
};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetWindowRect, GetWindowTextW, SetProcessDPIAware,
};

use crate::window::{CaptureRegion, Desktop, WindowCandidate, WindowRect};

/// `EnumWindows` listing plus a GDI grab of the desktop DC.
#[derive(Debug)]
pub struct HostDesktop;

impl HostDesktop {
    pub fn new() -> Self {
        // Without this, rectangles on scaled displays are in virtualised units
        // and the grab misses part of the window.
        unsafe {
            let _ = SetProcessDPIAware();
        }
        Self
    }
}

impl Default for HostDesktop {
    fn default() -> Self {
        Self::new()
    }
}

unsafe extern "system" fn enum_windows_cb(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let handles = &mut *(lparam.0 as *mut Vec<HWND>);
    handles.push(hwnd);
    TRUE
}

fn window_title(hwnd: HWND) -> String {
    let mut buffer = vec![0u16; 512];
    let len = unsafe { GetWindowTextW(hwnd, &mut buffer) };
    let len = usize::try_from(len).unwrap_or(0).min(buffer.len());
    String::from_utf16_lossy(&buffer[..len])
}

fn window_rect(hwnd: HWND) -> Option<WindowRect> {
    let mut rect = RECT::default();
    unsafe { GetWindowRect(hwnd, &mut rect) }.ok()?;
    Some(WindowRect {
        left: rect.left,
        top: rect.top,
        right: rect.right,
        bottom: rect.bottom,
    })
}

impl Desktop for HostDesktop {
    fn top_level_windows(&mut self) -> Result<Vec<WindowCandidate>> {
        let mut handles: Vec<HWND> = Vec::new();
        unsafe {
            EnumWindows(
                Some(enum_windows_cb),
                LPARAM(&mut handles as *mut Vec<HWND> as isize),
            )
        }
        .context("EnumWindows failed")?;

        Ok(handles
            .into_iter()
            .filter_map(|hwnd| {
                let title = window_title(hwnd);
                if title.is_empty() {
                    return None;
                }
                window_rect(hwnd).map(|rect| WindowCandidate { title, rect })
            })
            .collect())
    }

    fn grab(&mut self, region: &CaptureRegion) -> Result<RgbaImage> {
        let (width, height) = (region.width(), region.height());
        if width <= 0 || height <= 0 {
            bail!("empty capture region {region:?}");
        }
        let row_pixels = usize::try_from(width)?;
        let rows = usize::try_from(height)?;
        let mut bgra = vec![0u8; row_pixels * rows * 4];

        unsafe {
            let screen = GetDC(HWND::default());
            if screen.is_invalid() {
                bail!("GetDC failed for the desktop");
            }
            let memory = CreateCompatibleDC(screen);
            let bitmap = CreateCompatibleBitmap(screen, width, height);
            let previous = SelectObject(memory, HGDIOBJ(bitmap.0));

            let blit = BitBlt(
                memory,
                0,
                0,
                width,
                height,
                screen,
                region.left,
                region.top,
                SRCCOPY,
            );

            let mut info = BITMAPINFO {
                bmiHeader: BITMAPINFOHEADER {
                    biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                    biWidth: width,
                    // negative height: top-down rows
                    biHeight: -height,
                    biPlanes: 1,
                    biBitCount: 32,
                    biCompression: BI_RGB.0,
                    ..Default::default()
                },
                ..Default::default()
            };
            let copied = if blit.is_ok() {
                GetDIBits(
                    memory,
                    bitmap,
                    0,
                    height as u32,
                    Some(bgra.as_mut_ptr() as *mut c_void),
                    &mut info,
                    DIB_RGB_COLORS,
                )
            } else {
                0
            };

            SelectObject(memory, previous);
            let _ = DeleteObject(HGDIOBJ(bitmap.0));
            let _ = DeleteDC(memory);
            ReleaseDC(HWND::default(), screen);

            blit.context("BitBlt from desktop failed")?;
            if copied == 0 {
                bail!("GetDIBits copied no rows");
            }
        }

        for px in bgra.chunks_exact_mut(4) {
            px.swap(0, 2);
            px[3] = 255;
        }
        RgbaImage::from_raw(width as u32, height as u32, bgra)
            .context("capture buffer has the wrong size")
    }
}
