use crate::{Error, Result};
use nalgebra::{Matrix3, Matrix3x4, Point2, Vector3};
use serde::{Deserialize, Serialize};
use std::ops::Mul;
use std::path::Path;
use yaml_rust::{Yaml, YamlLoader};

/// Pinhole intrinsics of one camera, in pixels.
///
/// Cameras are registered once with [`VMap::add_camera_parameter`](crate::VMap::add_camera_parameter)
/// and referenced by index from every keyframe they produced.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraPinholeParams {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: u32,
    pub height: u32,
}

impl CameraPinholeParams {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, width: u32, height: u32) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            width,
            height,
        }
    }

    /// Parses a camera description from a YAML mapping.
    ///
    /// The recognized keys are `fx`, `fy`, `cx`, `cy`, `width` and `height`. Keys that are
    /// missing default to `0`.
    ///
    /// ```
    /// use vmap::CameraPinholeParams;
    /// let camera =
    ///     CameraPinholeParams::from_yaml_str("fx: 500\nfy: 500\ncx: 320.5\ncy: 240\nwidth: 640").unwrap();
    /// assert_eq!(camera.cx, 320.5);
    /// assert_eq!(camera.width, 640);
    /// assert_eq!(camera.height, 0);
    /// ```
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let documents =
            YamlLoader::load_from_str(text).map_err(|e| Error::CameraFile(e.to_string()))?;
        match documents.first() {
            Some(document) => Self::from_yaml(document),
            None => Ok(Self::default()),
        }
    }

    /// Loads a camera description from a file, see [`CameraPinholeParams::from_yaml_str`].
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_yaml_str(&std::fs::read_to_string(path)?)
    }

    fn from_yaml(document: &Yaml) -> Result<Self> {
        let real = |key: &str| match &document[key] {
            Yaml::BadValue | Yaml::Null => Ok(0.0),
            Yaml::Integer(value) => Ok(*value as f64),
            Yaml::Real(_) => document[key]
                .as_f64()
                .ok_or_else(|| Error::CameraFile(format!("invalid number for {}", key))),
            other => Err(Error::CameraFile(format!("invalid value {:?} for {}", other, key))),
        };
        let size = |key: &str| match &document[key] {
            Yaml::BadValue | Yaml::Null => Ok(0),
            Yaml::Integer(value) => u32::try_from(*value)
                .map_err(|_| Error::CameraFile(format!("{} is out of range for {}", value, key))),
            other => Err(Error::CameraFile(format!("invalid value {:?} for {}", other, key))),
        };
        Ok(Self {
            fx: real("fx")?,
            fy: real("fy")?,
            cx: real("cx")?,
            cy: real("cy")?,
            width: size("width")?,
            height: size("height")?,
        })
    }

    /// The 3x3 intrinsic matrix `K`.
    #[rustfmt::skip]
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0,     self.cx,
            0.0,     self.fy, self.cy,
            0.0,     0.0,     1.0,
        )
    }

    /// The intrinsic matrix padded with a zero column, ready to be multiplied with a 4x4 extrinsic.
    pub fn to_matrix(&self) -> Matrix3x4<f64> {
        let mut k = Matrix3x4::zeros();
        k.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.matrix());
        k
    }

    /// Horizontal field of view in radians.
    pub fn horizontal_fov(&self) -> f64 {
        2.0 * (self.cx / self.fx).atan()
    }

    /// Vertical field of view in radians.
    pub fn vertical_fov(&self) -> f64 {
        2.0 * (self.cy / self.fy).atan()
    }

    /// Intrinsics of the same camera when its images are resized by `ratio`.
    pub fn scaled(self, ratio: f64) -> Self {
        Self {
            fx: self.fx * ratio,
            fy: self.fy * ratio,
            cx: self.cx * ratio,
            cy: self.cy * ratio,
            width: (self.width as f64 * ratio) as u32,
            height: (self.height as f64 * ratio) as u32,
        }
    }

    /// Projects a point expressed in the camera frame to pixel coordinates.
    ///
    /// Returns `None` for points at or behind the optical center.
    pub fn project(&self, point: Vector3<f64>) -> Option<Point2<f64>> {
        if point.z <= 0.0 {
            return None;
        }
        Some(Point2::new(
            self.fx * point.x / point.z + self.cx,
            self.fy * point.y / point.z + self.cy,
        ))
    }

    /// Converts a pixel to the matching point on the normalized image plane (`z = 1`).
    pub fn unproject(&self, pixel: Point2<f64>) -> Vector3<f64> {
        Vector3::new((pixel.x - self.cx) / self.fx, (pixel.y - self.cy) / self.fy, 1.0)
    }
}

impl Mul<f64> for CameraPinholeParams {
    type Output = Self;

    fn mul(self, ratio: f64) -> Self {
        self.scaled(ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera() -> CameraPinholeParams {
        CameraPinholeParams::new(500.0, 400.0, 320.0, 240.0, 640, 480)
    }

    #[test]
    fn projection_matrix_layout() {
        let k = camera().to_matrix();
        assert_eq!(k[(0, 0)], 500.0);
        assert_eq!(k[(1, 1)], 400.0);
        assert_eq!(k[(0, 2)], 320.0);
        assert_eq!(k[(1, 2)], 240.0);
        assert_eq!(k[(2, 2)], 1.0);
        assert_eq!(k.column(3).norm(), 0.0);
    }

    #[test]
    fn project_unproject() {
        let camera = camera();
        let pixel = camera.project(Vector3::new(0.2, -0.1, 2.0)).unwrap();
        assert_relative_eq!(pixel, Point2::new(370.0, 220.0));
        let back = camera.unproject(pixel) * 2.0;
        assert_relative_eq!(back, Vector3::new(0.2, -0.1, 2.0), epsilon = 1e-12);
        assert!(camera.project(Vector3::new(0.0, 0.0, -1.0)).is_none());
    }

    #[test]
    fn field_of_view() {
        let camera = CameraPinholeParams::new(320.0, 240.0, 320.0, 240.0, 640, 480);
        assert_relative_eq!(camera.horizontal_fov(), std::f64::consts::FRAC_PI_2);
        assert_relative_eq!(camera.vertical_fov(), std::f64::consts::FRAC_PI_2);
    }

    #[test]
    fn scaling() {
        let half = camera() * 0.5;
        assert_eq!(half, CameraPinholeParams::new(250.0, 200.0, 160.0, 120.0, 320, 240));
    }

    #[test]
    fn yaml_parsing() {
        let camera = CameraPinholeParams::from_yaml_str(
            "fx: 1150.96938467\nfy: 1150.96938467\ncx: 988.511326762\ncy: 692.803953253\nwidth: 1920\nheight: 1440\n",
        )
        .unwrap();
        assert_relative_eq!(camera.fx, 1150.96938467);
        assert_relative_eq!(camera.cy, 692.803953253);
        assert_eq!((camera.width, camera.height), (1920, 1440));

        let empty = CameraPinholeParams::from_yaml_str("").unwrap();
        assert_eq!(empty, CameraPinholeParams::default());

        assert!(matches!(
            CameraPinholeParams::from_yaml_str("fx: fast"),
            Err(Error::CameraFile(_))
        ));
        assert!(matches!(
            CameraPinholeParams::from_yaml_str("width: -3"),
            Err(Error::CameraFile(_))
        ));
    }
}
