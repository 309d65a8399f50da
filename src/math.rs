//! Math utilities (§4.C): vectors and 4x4 matrix algebra on top of `glam`,
//! plus base64 decoding for glTF's embedded `data:` URIs.

use glam::{Mat4, Vec3};

/// An axis-aligned bounding box, initialised inverted (the identity element
/// of "expand by point"): `vmin = +inf`, `vmax = -inf`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AaBox {
    pub vmin: Vec3,
    pub vmax: Vec3,
}

impl Default for AaBox {
    fn default() -> Self {
        Self::INVERTED
    }
}

impl AaBox {
    pub const INVERTED: Self = Self {
        vmin: Vec3::splat(f32::INFINITY),
        vmax: Vec3::splat(f32::NEG_INFINITY),
    };

    /// `true` if no point has ever been folded in.
    pub fn is_inverted(&self) -> bool {
        self.vmin.x > self.vmax.x || self.vmin.y > self.vmax.y || self.vmin.z > self.vmax.z
    }

    /// Expands the box to include `point`, in place.
    pub fn add_point(&mut self, point: Vec3) {
        self.vmin = self.vmin.min(point);
        self.vmax = self.vmax.max(point);
    }

    /// Expands `self` to also cover `other`.
    pub fn add_box(&mut self, other: &AaBox) {
        if !other.is_inverted() {
            self.vmin = self.vmin.min(other.vmin);
            self.vmax = self.vmax.max(other.vmax);
        }
    }

    /// Returns the box transformed by `matrix`, by transforming each of its
    /// 8 corners and re-deriving min/max. `None` if `self` is inverted.
    pub fn transformed(&self, matrix: Mat4) -> Option<AaBox> {
        if self.is_inverted() {
            return None;
        }

        let mut result = AaBox::INVERTED;
        for corner in corners(self) {
            result.add_point(matrix.transform_point3(corner));
        }
        Some(result)
    }
}

fn corners(b: &AaBox) -> [Vec3; 8] {
    [
        Vec3::new(b.vmin.x, b.vmin.y, b.vmin.z),
        Vec3::new(b.vmax.x, b.vmin.y, b.vmin.z),
        Vec3::new(b.vmin.x, b.vmax.y, b.vmin.z),
        Vec3::new(b.vmax.x, b.vmax.y, b.vmin.z),
        Vec3::new(b.vmin.x, b.vmin.y, b.vmax.z),
        Vec3::new(b.vmax.x, b.vmin.y, b.vmax.z),
        Vec3::new(b.vmin.x, b.vmax.y, b.vmax.z),
        Vec3::new(b.vmax.x, b.vmax.y, b.vmax.z),
    ]
}

/// Inverts `matrix`, returning `None` for a singular matrix (determinant
/// zero) rather than `glam`'s usual NaN-filled result (distilled spec:
/// "Inverse via cofactor/determinant, returns failure if det=0").
pub fn try_inverse(matrix: Mat4) -> Option<Mat4> {
    if matrix.determinant() == 0.0 {
        None
    } else {
        Some(matrix.inverse())
    }
}

/// Encodes bytes as standard padded base64 (glTF's embedded `data:` URIs on
/// save).
pub fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decodes base64 text (optionally `=`-padded), ignoring bytes outside the
/// base64 alphabet — the distilled spec's forgiving decoder, realised atop
/// the `base64` crate's standard engine plus a pre-filter pass.
pub fn base64_decode(text: &str) -> anyhow::Result<Vec<u8>> {
    use base64::Engine as _;

    let filtered: String = text
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '+' || *c == '/' || *c == '=')
        .collect();

    // Strip any trailing padding beyond what's needed, then let the engine
    // re-derive correct padding from the input length.
    let trimmed = filtered.trim_end_matches('=');
    base64::engine::general_purpose::STANDARD_NO_PAD
        .decode(trimmed)
        .map_err(|err| anyhow::anyhow!("invalid base64 data: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn inverted_box_has_no_points() {
        let b = AaBox::default();
        assert!(b.is_inverted());
    }

    #[test]
    fn add_point_expands() {
        let mut b = AaBox::default();
        b.add_point(Vec3::new(1.0, 2.0, 3.0));
        b.add_point(Vec3::new(-1.0, 0.0, 5.0));
        assert!(!b.is_inverted());
        assert_eq!(b.vmin, Vec3::new(-1.0, 0.0, 3.0));
        assert_eq!(b.vmax, Vec3::new(1.0, 2.0, 5.0));
    }

    #[test]
    fn singular_matrix_inverse_fails() {
        let singular = Mat4::from_cols(
            glam::Vec4::ZERO,
            glam::Vec4::Y,
            glam::Vec4::Z,
            glam::Vec4::W,
        );
        assert!(try_inverse(singular).is_none());
    }

    #[test]
    fn base64_roundtrip() {
        let decoded = base64_decode("aGVsbG8=").unwrap();
        assert_eq!(decoded, b"hello");
    }

    #[test]
    fn base64_ignores_whitespace() {
        let decoded = base64_decode("aGVs\nbG8=").unwrap();
        assert_eq!(decoded, b"hello");
    }
}
