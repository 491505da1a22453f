//! WGSL shader sources for ray formation.

/// The ray formation compute shader, without its tile size.
pub const FORM_RAYS_SHADER: &str = include_str!("form_rays.wgsl");

/// Shader source with `TILE_SIZE` defined as `tile_size`.
pub fn shader_source(tile_size: u32) -> String {
    format!("const TILE_SIZE: u32 = {tile_size}u;\n{FORM_RAYS_SHADER}")
}
