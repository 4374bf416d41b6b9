//! WGSL to SPIR-V through naga, and the built-in shader sources.

use ash::vk;

use super::device::Device;
use crate::error::{RendererError, RendererResult};

pub const MESH_WGSL: &str = include_str!("../shaders/mesh.wgsl");
pub const PICKING_WGSL: &str = include_str!("../shaders/picking.wgsl");
pub const SKYBOX_WGSL: &str = include_str!("../shaders/skybox.wgsl");
pub const GRID_WGSL: &str = include_str!("../shaders/grid.wgsl");

/// Entry point names shared by the built-in shaders.
pub const VERTEX_ENTRY: &str = "vs_main";
pub const FRAGMENT_ENTRY: &str = "fs_main";

/// Parse, validate and translate one entry point of a WGSL module.
pub fn compile_wgsl(
    name: &str,
    source: &str,
    stage: naga::ShaderStage,
    entry_point: &str,
) -> RendererResult<Vec<u32>> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| {
        RendererError::ShaderCompilationFailed(format!("{name}: {}", e.emit_to_string(source)))
    })?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    let info = validator.validate(&module).map_err(|e| {
        RendererError::ShaderCompilationFailed(format!("{name}: validation error: {e}"))
    })?;

    if !module
        .entry_points
        .iter()
        .any(|ep| ep.name == entry_point && ep.stage == stage)
    {
        return Err(RendererError::ShaderCompilationFailed(format!(
            "{name}: entry point '{entry_point}' not found for {stage:?}"
        )));
    }

    let options = naga::back::spv::Options {
        lang_version: (1, 3),
        ..Default::default()
    };
    let pipeline_options = naga::back::spv::PipelineOptions {
        shader_stage: stage,
        entry_point: entry_point.to_string(),
    };

    naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options)).map_err(|e| {
        RendererError::ShaderCompilationFailed(format!("{name}: SPIR-V generation error: {e}"))
    })
}

/// Vertex and fragment modules of one pipeline.
pub struct ShaderPair {
    pub vertex: vk::ShaderModule,
    pub fragment: vk::ShaderModule,
}

impl ShaderPair {
    /// Compile `vs_main` and `fs_main` of `source` into shader modules.
    pub fn new(device: &Device, name: &str, source: &str) -> RendererResult<Self> {
        let vertex = create_module(
            device,
            &compile_wgsl(name, source, naga::ShaderStage::Vertex, VERTEX_ENTRY)?,
        )?;
        let fragment_code = compile_wgsl(name, source, naga::ShaderStage::Fragment, FRAGMENT_ENTRY)
            .and_then(|code| create_module(device, &code));
        match fragment_code {
            Ok(fragment) => Ok(Self { vertex, fragment }),
            Err(e) => {
                unsafe { device.raw().destroy_shader_module(vertex, None) };
                Err(e)
            }
        }
    }

    /// Shader modules are only needed while pipelines are built.
    pub fn destroy(self, device: &Device) {
        unsafe {
            device.raw().destroy_shader_module(self.vertex, None);
            device.raw().destroy_shader_module(self.fragment, None);
        }
    }
}

fn create_module(device: &Device, code: &[u32]) -> RendererResult<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(code);
    unsafe { device.raw().create_shader_module(&create_info, None) }.map_err(|e| {
        RendererError::ShaderCompilationFailed(format!("failed to create shader module: {e:?}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn test_builtin_shaders_compile() {
        for (name, source) in [
            ("mesh", MESH_WGSL),
            ("picking", PICKING_WGSL),
            ("skybox", SKYBOX_WGSL),
            ("grid", GRID_WGSL),
        ] {
            for (stage, entry) in [
                (naga::ShaderStage::Vertex, VERTEX_ENTRY),
                (naga::ShaderStage::Fragment, FRAGMENT_ENTRY),
            ] {
                let spirv = compile_wgsl(name, source, stage, entry)
                    .unwrap_or_else(|e| panic!("{name} {stage:?}: {e}"));
                assert_eq!(spirv[0], SPIRV_MAGIC);
            }
        }
    }

    #[test]
    fn test_missing_entry_point() {
        let result = compile_wgsl("mesh", MESH_WGSL, naga::ShaderStage::Compute, "cs_main");
        assert!(matches!(
            result,
            Err(RendererError::ShaderCompilationFailed(_))
        ));
    }

    #[test]
    fn test_parse_error_is_reported() {
        let result = compile_wgsl("broken", "fn main( {", naga::ShaderStage::Vertex, "main");
        assert!(matches!(
            result,
            Err(RendererError::ShaderCompilationFailed(_))
        ));
    }
}
