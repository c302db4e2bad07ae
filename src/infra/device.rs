// ============================================================
// Layer 6 — Device Selection
// ============================================================
// Maps the --device flag onto a WGPU device:
//
//   default | best          → the default adapter (best available)
//   cpu                     → software adapter
//   gpu | cuda              → discrete GPU 0
//   gpu:N | cuda:N          → discrete GPU N
//   integrated[:N]          → integrated GPU N (default 0)
//
// "cuda:N" is accepted so command lines written for other
// trainers keep working.

use anyhow::{bail, Context, Result};
use burn::backend::wgpu::WgpuDevice;

pub fn parse_device(spec: &str) -> Result<WgpuDevice> {
    let spec = spec.trim().to_ascii_lowercase();
    let (kind, index) = match spec.split_once(':') {
        Some((kind, idx)) => {
            let idx: usize = idx
                .parse()
                .with_context(|| format!("Invalid device index in '{spec}'"))?;
            (kind.to_string(), Some(idx))
        }
        None => (spec.clone(), None),
    };

    let device = match (kind.as_str(), index) {
        ("default" | "best", None) => WgpuDevice::DefaultDevice,
        ("cpu", None) => WgpuDevice::Cpu,
        ("gpu" | "cuda", idx) => WgpuDevice::DiscreteGpu(idx.unwrap_or(0)),
        ("integrated", idx) => WgpuDevice::IntegratedGpu(idx.unwrap_or(0)),
        _ => bail!(
            "Unknown device '{spec}', expected default, cpu, gpu[:N], cuda[:N] or integrated[:N]"
        ),
    };
    Ok(device)
}
