use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector2, Vector3};
use rand::Rng;
use vmap::{CameraPinholeParams, Descriptor, Feature};

/// Random landmarks in front of the first camera, each with its own binary descriptor.
pub struct Scene {
    points: Vec<Vector3<f64>>,
    descriptors: Vec<Descriptor>,
}

impl Scene {
    pub fn new(num_points: usize, rng: &mut impl Rng) -> Self {
        let points = (0..num_points)
            .map(|_| {
                Vector3::new(
                    rng.gen_range(-1.5..1.5),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(4.0..8.0),
                )
            })
            .collect();
        let descriptors = (0..num_points).map(|_| Descriptor::new(rng.gen())).collect();
        Self {
            points,
            descriptors,
        }
    }

    /// Extracts the features a camera at `position` looking along +z would see.
    ///
    /// Every feature is moved by up to `pixel_noise` pixels and gets `bit_flips` random
    /// descriptor bits flipped. Landmarks that do not project inside the image are skipped.
    pub fn observe(
        &self,
        camera: &CameraPinholeParams,
        position: Vector3<f64>,
        pixel_noise: f64,
        bit_flips: usize,
        rng: &mut impl Rng,
    ) -> Vec<Feature> {
        let world_to_camera =
            Isometry3::from_parts(Translation3::from(position), UnitQuaternion::identity())
                .inverse();
        let mut features = vec![];
        for (point, descriptor) in self.points.iter().zip(&self.descriptors) {
            let keypoint = match camera.project((world_to_camera * Point3::from(*point)).coords) {
                Some(keypoint) => keypoint,
                None => continue,
            };
            let noise = if pixel_noise > 0.0 {
                Vector2::new(
                    rng.gen_range(-pixel_noise..pixel_noise),
                    rng.gen_range(-pixel_noise..pixel_noise),
                )
            } else {
                Vector2::zeros()
            };
            let keypoint = keypoint + noise;
            if keypoint.x < 0.0
                || keypoint.y < 0.0
                || keypoint.x >= camera.width as f64
                || keypoint.y >= camera.height as f64
            {
                continue;
            }
            let mut descriptor = *descriptor;
            for _ in 0..bit_flips {
                let bit = rng.gen_range(0..256);
                descriptor.bytes_mut()[bit / 8] ^= 1 << (bit % 8);
            }
            features.push(Feature::new(keypoint, descriptor));
        }
        features
    }
}
