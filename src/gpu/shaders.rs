//! WGSL sources of the stage programs.
//!
//! Every stage shader is compiled as `common.wgsl` followed by the stage
//! file, so the hash, projection and spawn helpers exist once.

use crate::substrate::Stage;

pub const COMMON: &str = include_str!("shaders/common.wgsl");
pub const SPLAT: &str = include_str!("shaders/splat.wgsl");
pub const BLUR_HORIZONTAL: &str = include_str!("shaders/blur_h.wgsl");
pub const BLUR_VERTICAL: &str = include_str!("shaders/blur_v.wgsl");
pub const VELOCITY: &str = include_str!("shaders/velocity.wgsl");
pub const POSITION: &str = include_str!("shaders/position.wgsl");

/// Threads per workgroup of every stage shader.
pub const WORKGROUP_SIZE: u32 = 64;

/// Binding kinds of a stage's bind group, in binding order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    /// Read-only storage buffer.
    Read,
    /// Read-write storage buffer.
    Write,
    /// Uniform parameter block.
    Uniform,
}

/// Complete WGSL source for `stage`.
pub fn stage_source(stage: Stage) -> String {
    let body = match stage {
        Stage::DensitySplat => SPLAT,
        Stage::BlurHorizontal => BLUR_HORIZONTAL,
        Stage::BlurVertical => BLUR_VERTICAL,
        Stage::Velocity => VELOCITY,
        Stage::Position => POSITION,
    };
    format!("{}\n{}", COMMON, body)
}

/// Bind group layout of `stage`.
pub fn stage_slots(stage: Stage) -> &'static [Slot] {
    use Slot::*;
    match stage {
        // positions, density (atomic), params
        Stage::DensitySplat => &[Read, Write, Uniform],
        // source, target, params
        Stage::BlurHorizontal | Stage::BlurVertical => &[Read, Write, Uniform],
        // positions, velocities, next velocities, density, sdf, params
        Stage::Velocity => &[Read, Read, Write, Read, Read, Uniform],
        // positions, velocities, next positions, params
        Stage::Position => &[Read, Read, Write, Uniform],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validate WGSL code using naga.
    fn validate_wgsl(code: &str) -> Result<naga::Module, String> {
        let module = naga::front::wgsl::parse_str(code).map_err(|e| format!("WGSL parse error: {}", e.emit_to_string(code)))?;

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        validator
            .validate(&module)
            .map_err(|e| format!("WGSL validation error: {:?}", e))?;

        Ok(module)
    }

    #[test]
    fn test_every_stage_shader_validates() {
        for stage in Stage::ALL {
            let source = stage_source(stage);
            if let Err(e) = validate_wgsl(&source) {
                panic!("{} shader failed:\n{}", stage.label(), e);
            }
        }
    }

    #[test]
    fn test_binding_count_matches_layout() {
        for stage in Stage::ALL {
            let module = validate_wgsl(&stage_source(stage)).unwrap();
            let bindings = module
                .global_variables
                .iter()
                .filter(|(_, var)| var.binding.is_some())
                .count();
            assert_eq!(bindings, stage_slots(stage).len(), "{}", stage.label());
        }
    }

    #[test]
    fn test_every_stage_has_main_entry_point() {
        for stage in Stage::ALL {
            let module = validate_wgsl(&stage_source(stage)).unwrap();
            assert!(module.entry_points.iter().any(|ep| ep.name == "main"));
        }
    }

    #[test]
    fn test_common_hash_matches_host() {
        // Same constants on both sides.
        assert!(COMMON.contains("747796405u"));
        assert!(COMMON.contains("2891336453u"));
        assert!(COMMON.contains("277803737u"));
        assert!(COMMON.contains("16777216.0"));
    }

    #[test]
    fn test_fixed_point_writes_round() {
        // Truncation biases every splat toward zero.
        for source in [SPLAT, BLUR_VERTICAL] {
            for line in source.lines().filter(|l| l.contains("* FIELD_SCALE")) {
                assert!(line.contains("i32(round("), "unrounded fixed-point write: {}", line.trim());
            }
        }
        assert!(SPLAT.contains("i32(round(w * FIELD_SCALE))"));
    }
}
