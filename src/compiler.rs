//! GLSL compute shader compilation through naga.
//!
//! Compilation is device independent; the resulting SPIR-V is handed to every device the
//! catalog builds for.

use naga::back::spv;
use naga::front::glsl;
use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{AddressSpace, ShaderStage};

/// SPIR-V for one kernel plus what the pipeline layout needs to know about it
pub struct CompiledKernel {
    pub spirv: Vec<u32>,
    /// Number of storage buffer bindings in set 0
    pub bindings: u32,
    /// `local_size` of the entry point
    pub workgroup_size: [u32; 3],
}

/// Compile one compute shader, returning the rendered diagnostics on failure
pub fn compile(source: &str) -> Result<CompiledKernel, String> {
    let mut frontend = glsl::Frontend::default();
    let options = glsl::Options::from(ShaderStage::Compute);
    let module = frontend
        .parse(&options, source)
        .map_err(|errors| render_parse_errors(&errors, source))?;

    // Barrier placement is checked by the driver; naga's uniformity pass rejects tiled loops
    let flags = ValidationFlags::all() & !ValidationFlags::CONTROL_FLOW_UNIFORMITY;
    let info = Validator::new(flags, Capabilities::PUSH_CONSTANT)
        .validate(&module)
        .map_err(|e| e.emit_to_string(source))?;

    let workgroup_size = match module
        .entry_points
        .iter()
        .find(|ep| ep.stage == ShaderStage::Compute && ep.name == "main")
    {
        Some(entry_point) => entry_point.workgroup_size,
        None => return Err("no compute entry point named `main`".into()),
    };

    let mut bindings = 0;
    for (_, var) in module.global_variables.iter() {
        if let (AddressSpace::Storage { .. }, Some(binding)) = (var.space, &var.binding) {
            if binding.group != 0 {
                return Err(format!(
                    "storage buffer `{}` must be in set 0",
                    var.name.as_deref().unwrap_or("?")
                ));
            }
            bindings = bindings.max(binding.binding + 1);
        }
    }

    let options = spv::Options {
        lang_version: (1, 3),
        ..Default::default()
    };
    let spirv = spv::write_vec(&module, &info, &options, None).map_err(|e| e.to_string())?;

    Ok(CompiledKernel {
        spirv,
        bindings,
        workgroup_size,
    })
}

/// One line per front-end error, prefixed with its `line:column`
fn render_parse_errors(errors: &[glsl::Error], source: &str) -> String {
    errors
        .iter()
        .map(|error| {
            let location = error.meta.location(source);
            format!(
                "{}:{}: {}",
                location.line_number, location.line_position, error
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::KernelSource;

    #[test]
    fn builtin_kernels_compile() {
        let source = KernelSource::builtin();
        for (name, glsl) in source.iter() {
            let compiled = compile(glsl).unwrap_or_else(|log| panic!("{}: {}", name, log));
            assert!(!compiled.spirv.is_empty(), "{}", name);
            assert!(compiled.bindings >= 1, "{}", name);
        }
    }

    #[test]
    fn binding_counts_reflect_source() {
        let source = KernelSource::builtin();
        let count = |name| compile(source.get(name).unwrap()).unwrap().bindings;
        assert_eq!(count("elem_add"), 2);
        assert_eq!(count("sigmoid"), 1);
        assert_eq!(count("matmul"), 3);
    }

    #[test]
    fn malformed_source_has_diagnostics() {
        let log = match compile("#version 450\nvoid main() { float x = ; }\n") {
            Ok(_) => panic!("malformed source compiled"),
            Err(log) => log,
        };
        assert!(!log.trim().is_empty());
        // Front-end errors carry the offending line
        assert!(log.contains("2:"), "{}", log);
    }

    #[test]
    fn every_parse_error_is_reported() {
        let source = "#version 450\nlayout(local_size_x = 1) in;\nvoid main() {\n    a = 1.0;\n    b = 2.0;\n}\n";
        let log = match compile(source) {
            Ok(_) => panic!("undeclared identifiers compiled"),
            Err(log) => log,
        };
        assert!(log.lines().count() >= 1);
        assert!(log.lines().all(|line| line.contains(": ")), "{}", log);
    }

    #[test]
    fn workgroup_size_is_reflected() {
        let source = KernelSource::builtin();
        let size = |name| compile(source.get(name).unwrap()).unwrap().workgroup_size;
        assert_eq!(size("elem_add"), [64, 1, 1]);
        assert_eq!(size("matmul"), [16, 16, 1]);
    }

    #[test]
    fn missing_main_is_rejected() {
        let source = "#version 450\nlayout(local_size_x = 1) in;\nvoid helper() {}\n";
        assert!(compile(source).is_err());
    }
}
