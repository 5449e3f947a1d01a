//! GPU programs and their entry points.
//!
//! The WGSL sources are compiled into the crate. At plugin finish every
//! program is checked for its required entry points and the workgroup sizes
//! of its compute kernels are resolved once; a missing program or entry
//! point is fatal for the whole feature.

use std::collections::HashMap;

use bevy::prelude::*;

use crate::error::{VxgiError, VxgiResult};
use crate::num_threads::NumThreads;

/// A WGSL program compiled into the crate.
#[derive(Clone, Copy, Debug)]
pub struct GpuProgram {
    pub name: &'static str,
    /// Asset path the shader is registered under
    pub path: &'static str,
    pub source: &'static str,
}

impl GpuProgram {
    /// Whether `entry_point` is declared as a function of this program.
    pub fn declares(&self, entry_point: &str) -> bool {
        let pattern = format!("fn {entry_point}(");
        self.source.match_indices(&pattern).any(|(at, _)| {
            at == 0 || !self.source[..at].ends_with(|c: char| c.is_alphanumeric() || c == '_')
        })
    }
}

pub const VOXELIZE_PROGRAM: GpuProgram = GpuProgram {
    name: "vxgi_voxelize",
    path: "shaders/vxgi/voxelize.wgsl",
    source: include_str!("shaders/voxelize.wgsl"),
};

pub const VOXEL_SHADER_PROGRAM: GpuProgram = GpuProgram {
    name: "vxgi_voxel_shader",
    path: "shaders/vxgi/voxel_shader.wgsl",
    source: include_str!("shaders/voxel_shader.wgsl"),
};

pub const MIPMAPPER_PROGRAM: GpuProgram = GpuProgram {
    name: "vxgi_mipmapper",
    path: "shaders/vxgi/mipmapper.wgsl",
    source: include_str!("shaders/mipmapper.wgsl"),
};

pub const PARAMETERIZER_PROGRAM: GpuProgram = GpuProgram {
    name: "vxgi_parameterizer",
    path: "shaders/vxgi/parameterizer.wgsl",
    source: include_str!("shaders/parameterizer.wgsl"),
};

pub const LIGHTING_PROGRAM: GpuProgram = GpuProgram {
    name: "vxgi_lighting",
    path: "shaders/vxgi/lighting.wgsl",
    source: include_str!("shaders/lighting.wgsl"),
};

/// Every program shipped with the crate.
pub const PROGRAMS: &[GpuProgram] = &[
    VOXELIZE_PROGRAM,
    VOXEL_SHADER_PROGRAM,
    MIPMAPPER_PROGRAM,
    PARAMETERIZER_PROGRAM,
    LIGHTING_PROGRAM,
];

/// Filter entry points, indexed by `2 * mode + variant` where variant 0
/// reads with `textureLoad` and variant 1 samples texel centres.
pub const FILTER_ENTRY_POINTS: [&str; 6] = [
    "filter_box_load",
    "filter_box_sample",
    "filter_gaussian3_load",
    "filter_gaussian3_sample",
    "filter_gaussian4_load",
    "filter_gaussian4_sample",
];

/// Entry points each program must declare.
pub const REQUIRED_ENTRY_POINTS: &[(&str, &[&str])] = &[
    ("vxgi_voxelize", &["vertex", "fragment"]),
    ("vxgi_voxel_shader", &["clear", "render", "aggregate"]),
    (
        "vxgi_mipmapper",
        &[
            "filter_box_load",
            "filter_box_sample",
            "filter_gaussian3_load",
            "filter_gaussian3_sample",
            "filter_gaussian4_load",
            "filter_gaussian4_sample",
            "shift",
        ],
    ),
    ("vxgi_parameterizer", &["parameterize"]),
    ("vxgi_lighting", &["vertex", "indirect_diffuse", "indirect_specular"]),
];

pub fn find_program<'a>(programs: &'a [GpuProgram], name: &str) -> VxgiResult<&'a GpuProgram> {
    programs
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| VxgiError::MissingProgram(name.to_string()))
}

/// Check that every required program exists and declares its entry points.
pub fn verify_programs(programs: &[GpuProgram], required: &[(&str, &[&str])]) -> VxgiResult<()> {
    for (name, entry_points) in required {
        let program = find_program(programs, name)?;
        for entry_point in *entry_points {
            if !program.declares(entry_point) {
                return Err(VxgiError::MissingEntryPoint {
                    program: program.name.to_string(),
                    entry_point: entry_point.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Memoized workgroup sizes of compute entry points.
#[derive(Debug, Default)]
pub struct ThreadCache {
    entries: HashMap<(&'static str, &'static str), NumThreads>,
}

impl ThreadCache {
    /// Workgroup size of `entry_point` in `program`, parsed on first use.
    pub fn get(&mut self, program: &GpuProgram, entry_point: &'static str) -> VxgiResult<NumThreads> {
        if let Some(threads) = self.entries.get(&(program.name, entry_point)) {
            return Ok(*threads);
        }
        let threads = NumThreads::from_wgsl(program.source, entry_point).map_err(|e| match e {
            VxgiError::MissingEntryPoint { entry_point, .. } => VxgiError::MissingEntryPoint {
                program: program.name.to_string(),
                entry_point,
            },
            other => other,
        })?;
        self.entries.insert((program.name, entry_point), threads);
        Ok(threads)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget every cached size. The next lookup parses the source again.
    pub fn invalidate_thread_cache(&mut self) {
        self.entries.clear();
    }
}

/// Workgroup sizes of every compute kernel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KernelThreads {
    pub clear: NumThreads,
    pub render: NumThreads,
    pub aggregate: NumThreads,
    pub parameterize: NumThreads,
    pub filters: [NumThreads; 6],
    pub shift: NumThreads,
}

impl KernelThreads {
    pub fn resolve(cache: &mut ThreadCache) -> VxgiResult<Self> {
        let mut filters = [NumThreads::default(); 6];
        for (threads, entry_point) in filters.iter_mut().zip(FILTER_ENTRY_POINTS) {
            *threads = cache.get(&MIPMAPPER_PROGRAM, entry_point)?;
        }
        Ok(Self {
            clear: cache.get(&VOXEL_SHADER_PROGRAM, "clear")?,
            render: cache.get(&VOXEL_SHADER_PROGRAM, "render")?,
            aggregate: cache.get(&VOXEL_SHADER_PROGRAM, "aggregate")?,
            parameterize: cache.get(&PARAMETERIZER_PROGRAM, "parameterize")?,
            filters,
            shift: cache.get(&MIPMAPPER_PROGRAM, "shift")?,
        })
    }
}

/// Shader handles and kernel sizes, inserted into the render world once
/// every program checked out.
#[derive(Resource)]
pub struct VxgiPrograms {
    pub voxelize: Handle<Shader>,
    pub voxel_shader: Handle<Shader>,
    pub mipmapper: Handle<Shader>,
    pub parameterizer: Handle<Shader>,
    pub lighting: Handle<Shader>,
    pub threads: KernelThreads,
}

/// Verify every program and resolve the kernel sizes.
pub fn load_programs(cache: &mut ThreadCache) -> VxgiResult<KernelThreads> {
    verify_programs(PROGRAMS, REQUIRED_ENTRY_POINTS)?;
    KernelThreads::resolve(cache)
}
