//! Compute kernel workgroup sizes.
//!
//! A kernel's thread-group size is declared once, in the WGSL source, with
//! `@workgroup_size(x, y, z)`. [`NumThreads::from_wgsl`] reads it back so
//! dispatch sizes are derived from the program instead of duplicated in Rust.

use bevy::math::UVec3;

use crate::error::{VxgiError, VxgiResult};

/// Thread-group size of a compute entry point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NumThreads {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Default for NumThreads {
    fn default() -> Self {
        Self::new(1, 1, 1)
    }
}

impl NumThreads {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Read the `@workgroup_size` attribute of `entry_point` in `source`.
    ///
    /// Missing dimensions default to 1. Each dimension is either an integer
    /// literal (with optional `u`/`i` suffix) or the name of a module-scope
    /// `const` holding one.
    pub fn from_wgsl(source: &str, entry_point: &str) -> VxgiResult<Self> {
        let invalid = |reason: &str| VxgiError::InvalidWorkgroupSize {
            entry_point: entry_point.to_string(),
            reason: reason.to_string(),
        };

        let fn_start = find_fn(source, entry_point).ok_or_else(|| VxgiError::MissingEntryPoint {
            program: String::new(),
            entry_point: entry_point.to_string(),
        })?;

        // Attributes sit between the previous item and the `fn` keyword.
        let head = &source[..fn_start];
        let item_start = head.rfind(['}', ';']).map_or(0, |i| i + 1);
        let attributes = &head[item_start..];

        let Some(attr) = attributes.find("@workgroup_size") else {
            return Err(invalid("no @workgroup_size attribute"));
        };
        let args = &attributes[attr + "@workgroup_size".len()..];
        let open = args.find('(').ok_or_else(|| invalid("missing '('"))?;
        let close = args.find(')').ok_or_else(|| invalid("missing ')'"))?;
        if close < open {
            return Err(invalid("malformed attribute"));
        }

        let mut dims = [1u32; 3];
        let parts: Vec<&str> = args[open + 1..close]
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() || parts.len() > 3 {
            return Err(invalid("expected one to three dimensions"));
        }
        for (dim, part) in dims.iter_mut().zip(&parts) {
            let value = parse_int(part)
                .or_else(|| lookup_const(source, part))
                .ok_or_else(|| invalid(&format!("cannot evaluate '{}'", part)))?;
            if value == 0 {
                return Err(invalid("dimension is zero"));
            }
            *dim = value;
        }

        Ok(Self::new(dims[0], dims[1], dims[2]))
    }

    /// Workgroup counts that cover `extent` threads per axis.
    pub fn groups_for(&self, extent: UVec3) -> UVec3 {
        UVec3::new(
            extent.x.div_ceil(self.x),
            extent.y.div_ceil(self.y),
            extent.z.div_ceil(self.z),
        )
    }
}

/// Byte offset of the `fn` keyword declaring `name`.
fn find_fn(source: &str, name: &str) -> Option<usize> {
    let mut offset = 0;
    while let Some(pos) = source[offset..].find("fn ") {
        let start = offset + pos;
        offset = start + 3;

        let boundary = start == 0
            || !source[..start]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric() || c == '_');
        if !boundary {
            continue;
        }
        let rest = source[offset..].trim_start();
        if let Some(after) = rest.strip_prefix(name) {
            if after.trim_start().starts_with('(') {
                return Some(start);
            }
        }
    }
    None
}

fn parse_int(token: &str) -> Option<u32> {
    token.trim_end_matches(['u', 'i']).parse().ok()
}

/// Value of `const name = N;` or `const name: u32 = N;`.
fn lookup_const(source: &str, name: &str) -> Option<u32> {
    source.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("const ")?;
        let rest = rest.strip_prefix(name)?;
        if !rest.starts_with([' ', ':', '=']) {
            return None;
        }
        let (_, value) = rest.split_once('=')?;
        parse_int(value.trim().trim_end_matches(';').trim())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
const GROUP: u32 = 4u;

@compute @workgroup_size(8, 8, 8)
fn clear(@builtin(global_invocation_id) id: vec3<u32>) {
}

@compute
@workgroup_size(256)
fn render(@builtin(global_invocation_id) id: vec3<u32>) {
}

@compute @workgroup_size(GROUP, GROUP, 2u)
fn filter_box(@builtin(global_invocation_id) id: vec3<u32>) {
}

fn helper() -> u32 { return 1u; }
"#;

    #[test]
    fn test_reads_three_dimensions() {
        let n = NumThreads::from_wgsl(SOURCE, "clear").unwrap();
        assert_eq!(n, NumThreads::new(8, 8, 8));
    }

    #[test]
    fn test_missing_dimensions_default_to_one() {
        let n = NumThreads::from_wgsl(SOURCE, "render").unwrap();
        assert_eq!(n, NumThreads::new(256, 1, 1));
    }

    #[test]
    fn test_resolves_module_constants() {
        let n = NumThreads::from_wgsl(SOURCE, "filter_box").unwrap();
        assert_eq!(n, NumThreads::new(4, 4, 2));
    }

    #[test]
    fn test_missing_entry_point() {
        let err = NumThreads::from_wgsl(SOURCE, "aggregate").unwrap_err();
        assert!(matches!(err, VxgiError::MissingEntryPoint { .. }));
    }

    #[test]
    fn test_non_compute_function_is_rejected() {
        let err = NumThreads::from_wgsl(SOURCE, "helper").unwrap_err();
        assert!(matches!(err, VxgiError::InvalidWorkgroupSize { .. }));
    }

    #[test]
    fn test_groups_for_rounds_up() {
        let n = NumThreads::new(8, 8, 8);
        assert_eq!(n.groups_for(UVec3::splat(64)), UVec3::splat(8));
        assert_eq!(n.groups_for(UVec3::splat(65)), UVec3::splat(9));
        assert_eq!(n.groups_for(UVec3::new(1, 9, 16)), UVec3::new(1, 2, 2));
    }
}
