use crate::error::{Error, Result};

/// Workgroup size for `phoenix.wgsl#phoenix`.
pub const PHOENIX_WORKGROUP_SIZE_Y: u32 = 64;

/// `y` dispatch size for `phoenix.wgsl#phoenix`.
pub const PHOENIX_DISPATCH_SIZE_Y: u32 = 1024;

/// Lanes covered by one step of the `x` dispatch dimension. `phoenix.wgsl` hard-codes this as
/// its index stride.
pub const PHOENIX_LANES_PER_X: u64 = (PHOENIX_DISPATCH_SIZE_Y * PHOENIX_WORKGROUP_SIZE_Y) as u64;

/// wgpu's default `max_compute_workgroups_per_dimension`.
const MAX_WORKGROUPS_PER_DIMENSION: u32 = 65535;

/**
Dispatch size for `phoenix.wgsl#phoenix`.

Every sample needs its own lane, and a 1024×1024 grid is over a million lanes. A one-dimensional
dispatch can't express that: wgpu caps each dispatch dimension at 65535 workgroups. So the lanes
are laid out in two dimensions. With `@workgroup_size(1, 64, 1)` and a `y` dispatch of 1024, each
step in `x` covers `1024 * 64 = 65536` lanes, and the shader recovers the flat sample index as
`global_invocation_id.x * 65536 + global_invocation_id.y`.

The last `x` column is usually only partly used. Lanes past the end of the point buffer return
without writing.
*/
pub fn phoenix_dispatch_size(total_work: usize) -> Result<(u32, u32, u32)> {
    let columns = (total_work as u64 + PHOENIX_LANES_PER_X - 1) / PHOENIX_LANES_PER_X;
    let x = u32::try_from(columns)
        .ok()
        .filter(|&x| x <= MAX_WORKGROUPS_PER_DIMENSION)
        .ok_or_else(|| {
            Error::DispatchError(format!(
                "{} samples need {} workgroups in x, more than the limit of {}",
                total_work, columns, MAX_WORKGROUPS_PER_DIMENSION
            ))
        })?;
    Ok((x, PHOENIX_DISPATCH_SIZE_Y, 1))
}
